//! services/api/src/guide/mod.rs
//!
//! The guide pipeline's server side: picking the next card to work on,
//! accepting sections one at a time, and maintaining the two demand signals
//! (priority queue and mention histogram). Everything here talks to storage
//! only through the `guide_core` ports.

pub mod mention_index;
pub mod priority;
pub mod selector;
pub mod submission;

pub use mention_index::{MentionIndex, MentionOutcome, SeedReport};
pub use priority::{PriorityService, PriorityStatus, PrioritySubmission};
pub use selector::WorkSelector;
pub use submission::{SectionSubmission, SubmissionOutcome, SubmissionService};

use crate::config::Config;
use guide_core::{CardStore, MentionStore, PriorityQueueStore};
use std::sync::Arc;

/// The three storage ports, usually all backed by the same adapter.
#[derive(Clone)]
pub struct Stores {
    pub cards: Arc<dyn CardStore>,
    pub priority: Arc<dyn PriorityQueueStore>,
    pub mentions: Arc<dyn MentionStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: CardStore + PriorityQueueStore + MentionStore + 'static,
    {
        Self {
            cards: backend.clone(),
            priority: backend.clone(),
            mentions: backend,
        }
    }
}

/// Tunables shared by the selector, submission and mention services.
#[derive(Clone, Debug)]
pub struct GuideSettings {
    pub default_tier: String,
    pub work_lang: String,
    pub seed_batch_size: usize,
    pub auto_queue_mentions: i64,
}

impl Default for GuideSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GuideSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_tier: config.default_tier.clone(),
            work_lang: config.work_lang.clone(),
            seed_batch_size: config.seed_batch_size,
            auto_queue_mentions: config.auto_queue_mentions,
        }
    }
}
