//! crates/guide_core/src/ports.rs
//!
//! Defines the service contracts (traits) the guide pipeline depends on.
//! Storage, model backends and notification sinks all sit behind these
//! traits so the selection and submission logic never sees a concrete
//! database or HTTP client.

use crate::domain::{AnalysisStatus, Card, MentionEntry, PriorityEntry, PublicationStatus, Section};
use crate::tier::{GuideTier, ModelProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Query Shapes
//=========================================================================================

/// The section keys a card must carry to satisfy a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRequirement {
    pub keys: Vec<String>,
    pub required: usize,
}

impl TierRequirement {
    pub fn is_met_by(&self, card: &Card) -> bool {
        let present = card.present_keys();
        let count = self
            .keys
            .iter()
            .filter(|k| present.contains(k.as_str()))
            .count();
        count >= self.required
    }
}

impl From<&GuideTier> for TierRequirement {
    fn from(tier: &GuideTier) -> Self {
        Self {
            keys: tier.keys().map(str::to_string).collect(),
            required: tier.required(),
        }
    }
}

/// Filter for card scans. Every `None` field matches everything.
#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    pub lang: Option<String>,
    /// Only cards that do NOT yet satisfy this requirement.
    pub incomplete_for: Option<TierRequirement>,
    /// `Some(true)`: only cards with a popularity rank. `Some(false)`: only without.
    pub ranked: Option<bool>,
    /// `Some(true)`: only cards with any guide (sectioned or legacy).
    pub has_guide: Option<bool>,
}

impl CardFilter {
    pub fn matches(&self, card: &Card) -> bool {
        if let Some(lang) = &self.lang {
            if &card.attributes.lang != lang {
                return false;
            }
        }
        if let Some(req) = &self.incomplete_for {
            if req.is_met_by(card) {
                return false;
            }
        }
        if let Some(ranked) = self.ranked {
            if card.attributes.popularity_rank.is_some() != ranked {
                return false;
            }
        }
        if let Some(has_guide) = self.has_guide {
            if card.analysis.is_some() != has_guide {
                return false;
            }
        }
        true
    }
}

/// Sort orders supported by [`CardStore::scan_cards`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardSort {
    /// Best (lowest) rank first, unranked last; then earliest release; then name.
    Popularity,
    Name,
}

/// Partial update of a card's top-level and analysis metadata.
/// Only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct CardFields {
    pub status: Option<PublicationStatus>,
    pub analysis_status: Option<AnalysisStatus>,
    pub content: Option<String>,
    pub model_used: Option<String>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub guide_version: Option<String>,
}

/// A card the priority queue should hold a slot for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityRequest {
    pub name: String,
    pub uuid: String,
    pub reason: String,
}

/// Keyset position for paging cards in name order. Pages resume strictly
/// after `(lower(name), uuid)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCursor {
    pub name: String,
    pub uuid: String,
}

impl NameCursor {
    pub fn after(card: &Card) -> Self {
        Self {
            name: card.attributes.name.clone(),
            uuid: card.uuid.clone(),
        }
    }
}

/// Derives the metadata written alongside a section from the card as it
/// stands once the section is stored.
pub type SectionRefresh<'a> = dyn Fn(&Card) -> CardFields + Send + Sync + 'a;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityCounts {
    pub total: u64,
    pub processed: u64,
}

//=========================================================================================
// Storage Ports
//=========================================================================================

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn find_card(&self, uuid: &str) -> PortResult<Option<Card>>;

    /// Exact, case-insensitive name lookup. With several matching printings
    /// the best-ranked one is returned.
    async fn find_card_by_name(&self, name: &str, filter: &CardFilter) -> PortResult<Option<Card>>;

    /// Inserts a card or refreshes its descriptive attributes. Existing guide
    /// data is left untouched.
    async fn upsert_card(&self, card: &Card) -> PortResult<()>;

    /// Writes the `Some` fields of `fields` onto an existing card.
    async fn upsert_card_fields(&self, uuid: &str, fields: CardFields) -> PortResult<()>;

    /// Writes or overwrites exactly one section. Other keys are not touched.
    async fn put_section(&self, uuid: &str, key: &str, section: &Section) -> PortResult<()>;

    /// Writes one section, then applies `refresh` to the stored card and
    /// writes the resulting fields, all as one unit. Concurrent calls for the
    /// same card are serialized, so the last writer always derives its fields
    /// from every section stored before it. Returns the card as written.
    async fn put_section_and_refresh(
        &self,
        uuid: &str,
        key: &str,
        section: &Section,
        refresh: &SectionRefresh<'_>,
    ) -> PortResult<Card>;

    async fn scan_cards(
        &self,
        filter: &CardFilter,
        sort: CardSort,
        limit: usize,
    ) -> PortResult<Vec<Card>>;

    /// Name-ordered page of cards strictly after `after`.
    async fn scan_cards_after(
        &self,
        filter: &CardFilter,
        after: Option<&NameCursor>,
        limit: usize,
    ) -> PortResult<Vec<Card>>;

    /// One uniformly chosen card matching `filter`.
    async fn sample_card(&self, filter: &CardFilter) -> PortResult<Option<Card>>;

    async fn count_cards(&self, filter: &CardFilter) -> PortResult<u64>;
}

#[async_trait]
pub trait PriorityQueueStore: Send + Sync {
    /// Drops every active entry and inserts `requests` in order.
    async fn replace_active(&self, requests: &[PriorityRequest]) -> PortResult<usize>;

    /// Appends an entry unless one for the same name is already active.
    /// Returns whether an entry was added.
    async fn enqueue(&self, request: &PriorityRequest) -> PortResult<bool>;

    /// Active entries, lowest `priority_order` (then oldest) first.
    async fn pending(&self, limit: usize) -> PortResult<Vec<PriorityEntry>>;

    /// Marks every active entry with this name as processed.
    async fn mark_processed(&self, name: &str) -> PortResult<u64>;

    async fn counts(&self) -> PortResult<PriorityCounts>;
}

#[async_trait]
pub trait MentionStore: Send + Sync {
    /// Atomically adds one to `uuid`'s count, creating the entry if needed.
    /// Returns the new count.
    async fn increment(&self, uuid: &str, card_name: &str, mentioned_in: &str) -> PortResult<i64>;

    /// The highest-count entry whose card matches `filter`, ties broken by
    /// the most recent mention.
    async fn most_mentioned(&self, filter: &CardFilter) -> PortResult<Option<MentionEntry>>;

    async fn get_mention(&self, uuid: &str) -> PortResult<Option<MentionEntry>>;

    async fn count_entries(&self) -> PortResult<u64>;
}

//=========================================================================================
// Generation and Notification Ports
//=========================================================================================

#[async_trait]
pub trait TextGenerationService: Send + Sync {
    fn provider(&self) -> ModelProvider;

    /// Runs one prompt against `model` and returns the raw completion.
    async fn generate(&self, model: &str, prompt: &str) -> PortResult<String>;
}

/// Summary of one worker pass over a card.
#[derive(Debug, Clone, PartialEq)]
pub struct GuideEvent {
    pub card_uuid: String,
    pub card_name: String,
    pub tier: String,
    pub sections_submitted: Vec<String>,
    pub sections_failed: usize,
    pub providers: BTreeMap<ModelProvider, usize>,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, event: &GuideEvent) -> PortResult<()>;
}
