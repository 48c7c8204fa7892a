//! services/api/src/guide/selector.rs
//!
//! Chooses the single card a worker should process next. Sources are tried
//! in a fixed order and the first hit wins:
//!
//! 1. the priority queue (explicit requests and auto-discovered cards),
//! 2. the mention histogram (cards other guides keep referencing),
//! 3. the popularity scan (best rank first),
//! 4. a random unranked card.
//!
//! Every source skips cards that already satisfy the requested tier. No lease
//! is taken on the returned card; concurrent workers may occasionally receive
//! the same one, which only costs a redundant generation.

use super::{GuideSettings, Stores};
use crate::error::GuideError;
use guide_core::{
    Card, CardFilter, CardSort, GuideTier, PortResult, SectionCatalog, SelectionSource,
    TierRequirement, WorkItem,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Pending priority entries inspected per round trip.
const PRIORITY_BATCH: usize = 20;
/// Upper bound on priority rounds per fetch, each of which retires a full batch.
const MAX_PRIORITY_ROUNDS: usize = 10;

pub struct WorkSelector {
    stores: Stores,
    catalog: Arc<SectionCatalog>,
    settings: GuideSettings,
}

impl WorkSelector {
    pub fn new(stores: Stores, catalog: Arc<SectionCatalog>, settings: GuideSettings) -> Self {
        Self {
            stores,
            catalog,
            settings,
        }
    }

    /// Picks the next card for `tier` (default tier when `None`) and `lang`
    /// (configured language when `None`). `Ok(None)` means there is no work.
    pub async fn next_work(
        &self,
        tier: Option<&str>,
        lang: Option<&str>,
    ) -> Result<Option<WorkItem>, GuideError> {
        let tier = self
            .catalog
            .tier(tier.unwrap_or(&self.settings.default_tier))?;
        let lang = lang.unwrap_or(&self.settings.work_lang);
        let requirement = TierRequirement::from(tier);
        let retire_when = TierRequirement::from(self.catalog.tier(&self.settings.default_tier)?);

        let picked = match self.from_priority_queue(&requirement, &retire_when).await? {
            Some(card) => Some((card, SelectionSource::Priority)),
            None => match self.from_mentions(&requirement, lang).await? {
                Some(card) => Some((card, SelectionSource::Mentions)),
                None => match self.from_popularity(&requirement, lang).await? {
                    Some(card) => Some((card, SelectionSource::Popularity)),
                    None => self
                        .from_random(&requirement, lang)
                        .await?
                        .map(|card| (card, SelectionSource::Random)),
                },
            },
        };

        let Some((card, selection)) = picked else {
            debug!(tier = %tier.name, lang, "No work available");
            return Ok(None);
        };
        info!(uuid = %card.uuid, name = %card.name(), %selection, tier = %tier.name, "Selected card");
        Ok(Some(work_item(card, tier, selection)))
    }

    /// Head of the queue whose card still needs work for the requested tier.
    /// Entries are retired on the way only when their card is gone or already
    /// satisfies the default tier; entries that are merely complete for a
    /// smaller requested tier stay queued for workers of the default tier.
    async fn from_priority_queue(
        &self,
        requirement: &TierRequirement,
        retire_when: &TierRequirement,
    ) -> PortResult<Option<Card>> {
        let mut kept = 0;
        for _ in 0..MAX_PRIORITY_ROUNDS {
            let batch = self.stores.priority.pending(kept + PRIORITY_BATCH).await?;
            if batch.len() <= kept {
                return Ok(None);
            }
            for entry in batch.into_iter().skip(kept) {
                let card = match self.stores.cards.find_card(&entry.uuid).await? {
                    Some(card) => Some(card),
                    None => {
                        self.stores
                            .cards
                            .find_card_by_name(&entry.name, &CardFilter::default())
                            .await?
                    }
                };
                match card {
                    Some(card) if !requirement.is_met_by(&card) => return Ok(Some(card)),
                    Some(card) if !retire_when.is_met_by(&card) => {
                        debug!(
                            name = %entry.name,
                            uuid = %card.uuid,
                            "Priority card complete for this tier only"
                        );
                        kept += 1;
                        continue;
                    }
                    Some(_) => debug!(name = %entry.name, "Priority card already complete"),
                    None => debug!(name = %entry.name, "Priority card no longer exists"),
                }
                self.stores.priority.mark_processed(&entry.name).await?;
            }
        }
        Ok(None)
    }

    /// Most-mentioned card that still needs work. The store applies the
    /// filter, so cards that were completed earlier never hide the rest.
    async fn from_mentions(
        &self,
        requirement: &TierRequirement,
        lang: &str,
    ) -> PortResult<Option<Card>> {
        let filter = CardFilter {
            lang: Some(lang.to_string()),
            incomplete_for: Some(requirement.clone()),
            ranked: None,
            has_guide: None,
        };
        let Some(entry) = self.stores.mentions.most_mentioned(&filter).await? else {
            return Ok(None);
        };
        debug!(uuid = %entry.uuid, count = entry.mention_count, "Mention candidate");
        self.stores.cards.find_card(&entry.uuid).await
    }

    /// Best-ranked card below the threshold. Sorting by rank first means the
    /// first hit is also the best-ranked printing of its name.
    async fn from_popularity(
        &self,
        requirement: &TierRequirement,
        lang: &str,
    ) -> PortResult<Option<Card>> {
        let filter = CardFilter {
            lang: Some(lang.to_string()),
            incomplete_for: Some(requirement.clone()),
            ranked: Some(true),
            has_guide: None,
        };
        let cards = self
            .stores
            .cards
            .scan_cards(&filter, CardSort::Popularity, 1)
            .await?;
        Ok(cards.into_iter().next())
    }

    async fn from_random(
        &self,
        requirement: &TierRequirement,
        lang: &str,
    ) -> PortResult<Option<Card>> {
        let filter = CardFilter {
            lang: Some(lang.to_string()),
            incomplete_for: Some(requirement.clone()),
            ranked: Some(false),
            has_guide: None,
        };
        self.stores.cards.sample_card(&filter).await
    }
}

fn work_item(card: Card, tier: &GuideTier, selection: SelectionSource) -> WorkItem {
    let missing_sections = tier
        .missing(&card.present_keys())
        .into_iter()
        .map(str::to_string)
        .collect();
    WorkItem {
        card,
        tier: tier.name.clone(),
        selection,
        missing_sections,
    }
}
