//! services/api/src/adapters/import.rs
//!
//! Loads a JSON array of card records from disk and writes them into a card
//! store. Used to populate the memory backend at startup and to refresh
//! descriptive attributes in Postgres from a bulk export.

use crate::error::ApiError;
use guide_core::{Card, CardAttributes, CardStore};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;
use tracing::{info, warn};

/// One card as it appears in an export file. The identifier is taken from
/// Scryfall's `id`, then `uuid`, then `scryfall_id`. Records carrying none of
/// them get a name-based v5 uuid, so importing the same file again updates
/// the same cards instead of adding new ones.
#[derive(Debug, Deserialize)]
struct CardRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    scryfall_id: Option<String>,
    #[serde(flatten)]
    attributes: CardAttributes,
}

impl CardRecord {
    fn into_card(self) -> Card {
        let uuid = [self.id, self.uuid, self.scryfall_id]
            .into_iter()
            .flatten()
            .map(|u| u.trim().to_string())
            .find(|u| !u.is_empty())
            .unwrap_or_else(|| derived_uuid(&self.attributes));
        Card::new(uuid, self.attributes)
    }
}

fn derived_uuid(attributes: &CardAttributes) -> String {
    let key = format!(
        "{}|{}|{}",
        attributes.name.trim().to_lowercase(),
        attributes.set_code.as_deref().unwrap_or_default(),
        attributes.lang
    );
    warn!(name = %attributes.name, "Card record has no identifier; deriving one from its name");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

pub fn parse_cards(raw: &str) -> Result<Vec<Card>, ApiError> {
    let records: Vec<CardRecord> = serde_json::from_str(raw)
        .map_err(|e| ApiError::Internal(format!("Invalid card file: {}", e)))?;
    Ok(records.into_iter().map(CardRecord::into_card).collect())
}

pub fn load_cards_file(path: &Path) -> Result<Vec<Card>, ApiError> {
    let raw = std::fs::read_to_string(path)?;
    parse_cards(&raw)
}

/// Upserts every card; existing guides are left untouched.
pub async fn import_cards(store: &dyn CardStore, cards: &[Card]) -> Result<usize, ApiError> {
    for card in cards {
        store.upsert_card(card).await?;
    }
    info!(count = cards.len(), "Imported cards");
    Ok(cards.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use guide_core::CardFilter;
    use std::io::Write;

    const CARDS: &str = r#"[
        {"uuid": "c1", "name": "Beacon", "type_line": "Artifact", "popularity_rank": 12},
        {"scryfall_id": "sf-2", "name": "Island", "lang": "de"},
        {"id": "0000579f-7b35-4ed3-b44c-db2a538066fe", "name": "Fury Sliver"},
        {"name": "Nameless"}
    ]"#;

    #[test]
    fn identifier_prefers_scryfall_id_then_derives_a_stable_one() {
        let cards = parse_cards(CARDS).unwrap();
        assert_eq!(cards[0].uuid, "c1");
        assert_eq!(cards[0].attributes.popularity_rank, Some(12));
        assert_eq!(cards[1].uuid, "sf-2");
        assert_eq!(cards[1].attributes.lang, "de");
        assert_eq!(cards[2].uuid, "0000579f-7b35-4ed3-b44c-db2a538066fe");
        assert_eq!(cards[2].attributes.lang, "en");

        let derived = Uuid::parse_str(&cards[3].uuid).unwrap();
        assert_eq!(derived.get_version_num(), 5);
        assert_eq!(parse_cards(CARDS).unwrap()[3].uuid, cards[3].uuid);

        let both = parse_cards(r#"[{"id": "sf-id", "uuid": "local", "name": "Both"}]"#).unwrap();
        assert_eq!(both[0].uuid, "sf-id");
    }

    #[tokio::test]
    async fn reimporting_keeps_one_card_per_record() {
        let store = MemoryStore::new();
        for _ in 0..2 {
            let cards = parse_cards(CARDS).unwrap();
            import_cards(&store, &cards).await.unwrap();
        }
        assert_eq!(store.count_cards(&CardFilter::default()).await.unwrap(), 4);
        assert_eq!(
            store
                .find_card("0000579f-7b35-4ed3-b44c-db2a538066fe")
                .await
                .unwrap()
                .unwrap()
                .name(),
            "Fury Sliver"
        );
    }

    #[tokio::test]
    async fn loads_file_into_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CARDS.as_bytes()).unwrap();

        let cards = load_cards_file(file.path()).unwrap();
        let store = MemoryStore::new();
        assert_eq!(import_cards(&store, &cards).await.unwrap(), 4);
        assert_eq!(
            store.find_card("c1").await.unwrap().unwrap().name(),
            "Beacon"
        );
    }
}
