//! services/worker/src/worker_loop.rs
//!
//! The worker's outer driver: fetch a card, generate each missing section,
//! submit each one, pause, repeat. Individual failures are logged and
//! skipped; the loop itself only stops on shutdown or after `limit` cards.
//! Shutdown interrupts the pauses between calls, never a call in flight.
//!
//! A card that yields no section at all is put on a cooldown. If the work
//! source hands it out again before the cooldown ends, the worker backs off
//! instead of spending another round of model calls on it.

use crate::generator::{PriorSection, SectionGenerator};
use async_trait::async_trait;
use guide_core::{
    GuideEvent, NotificationService, PortResult, SectionCatalog, SectionSpec, WorkItem,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

//=========================================================================================
// Work Source Port
//=========================================================================================

/// One card handed out by the work source, with the text of sections that
/// already exist for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub item: WorkItem,
    pub existing_sections: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionUpload {
    pub uuid: String,
    pub section_key: String,
    pub content: String,
    pub title: String,
    pub model_used: String,
    pub tier: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    pub sections_complete: usize,
    pub sections_total: usize,
    pub analysis_status: String,
}

#[async_trait]
pub trait WorkSource: Send + Sync {
    /// `Ok(None)` means no card currently needs work for `tier`.
    async fn next_assignment(&self, tier: &str) -> PortResult<Option<Assignment>>;

    async fn submit(&self, upload: &SectionUpload) -> PortResult<UploadReceipt>;
}

//=========================================================================================
// Loop
//=========================================================================================

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub tier: String,
    /// Stop after this many cards. `None` runs until shutdown.
    pub limit: Option<usize>,
    pub section_delay: Duration,
    pub card_delay: Duration,
    pub idle_backoff: Duration,
    pub stall_cooldown: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cards_processed: usize,
    pub sections_submitted: usize,
    pub sections_failed: usize,
    pub idle_polls: usize,
    /// Assignments passed over because the card recently produced nothing.
    pub stalled_skips: usize,
}

pub struct WorkerLoop {
    source: Arc<dyn WorkSource>,
    generator: SectionGenerator,
    catalog: Arc<SectionCatalog>,
    notifier: Option<Arc<dyn NotificationService>>,
    settings: LoopSettings,
}

impl WorkerLoop {
    pub fn new(
        source: Arc<dyn WorkSource>,
        generator: SectionGenerator,
        catalog: Arc<SectionCatalog>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            generator,
            catalog,
            notifier: None,
            settings,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn run(&self, shutdown: CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut stalled: HashMap<String, Instant> = HashMap::new();
        info!(tier = %self.settings.tier, limit = ?self.settings.limit, "Worker loop started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if self
                .settings
                .limit
                .is_some_and(|limit| summary.cards_processed >= limit)
            {
                info!("Card limit reached");
                break;
            }

            let delay = match self.source.next_assignment(&self.settings.tier).await {
                Ok(Some(assignment)) => {
                    let now = Instant::now();
                    stalled.retain(|_, until| *until > now);
                    let uuid = assignment.item.card.uuid.clone();
                    if stalled.contains_key(&uuid) {
                        summary.stalled_skips += 1;
                        warn!(
                            uuid = %uuid,
                            "Card produced nothing recently, sleeping {:?}",
                            self.settings.idle_backoff
                        );
                        self.settings.idle_backoff
                    } else {
                        let event = self.process(assignment, &shutdown).await;
                        summary.cards_processed += 1;
                        summary.sections_submitted += event.sections_submitted.len();
                        summary.sections_failed += event.sections_failed;
                        self.notify(&event).await;
                        if event.sections_submitted.is_empty() {
                            stalled.insert(uuid, Instant::now() + self.settings.stall_cooldown);
                            self.settings.idle_backoff
                        } else {
                            self.settings.card_delay
                        }
                    }
                }
                Ok(None) => {
                    summary.idle_polls += 1;
                    info!(
                        "No work available, sleeping {:?}",
                        self.settings.idle_backoff
                    );
                    self.settings.idle_backoff
                }
                Err(e) => {
                    error!("Failed to fetch work: {}", e);
                    self.settings.idle_backoff
                }
            };

            if !pause(&shutdown, delay).await {
                break;
            }
        }

        info!(
            cards = summary.cards_processed,
            submitted = summary.sections_submitted,
            failed = summary.sections_failed,
            stalled = summary.stalled_skips,
            "Worker loop stopped"
        );
        summary
    }

    /// Generates and submits every missing section of one card. Synthesis
    /// sections go last so they can see what was just written.
    pub async fn process(&self, assignment: Assignment, shutdown: &CancellationToken) -> GuideEvent {
        let Assignment {
            item,
            existing_sections,
        } = assignment;
        let card = &item.card;
        info!(uuid = %card.uuid, name = %card.name(), selection = %item.selection,
              missing = item.missing_sections.len(), "Processing card");

        let mut event = GuideEvent {
            card_uuid: card.uuid.clone(),
            card_name: card.name().to_string(),
            tier: item.tier.clone(),
            sections_submitted: Vec::new(),
            sections_failed: 0,
            providers: BTreeMap::new(),
        };

        let specs = self.ordered_specs(&item.missing_sections);
        if specs.len() < item.missing_sections.len() {
            event.sections_failed += item.missing_sections.len() - specs.len();
        }

        let mut written: HashMap<String, String> = existing_sections.into_iter().collect();
        let mut first = true;
        for spec in specs {
            if !first && !pause(shutdown, self.settings.section_delay).await {
                break;
            }
            first = false;

            let prior = if spec.uses_prior_sections {
                self.prior_sections(&written, &spec.key)
            } else {
                Vec::new()
            };

            let content = match self.generator.generate(card, spec, &prior).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(uuid = %card.uuid, section = %spec.key, "Skipping section: {}", e);
                    event.sections_failed += 1;
                    continue;
                }
            };

            let upload = SectionUpload {
                uuid: card.uuid.clone(),
                section_key: spec.key.clone(),
                content,
                title: spec.title.clone(),
                model_used: spec.model.to_string(),
                tier: item.tier.clone(),
            };
            match self.source.submit(&upload).await {
                Ok(receipt) => {
                    info!(uuid = %card.uuid, section = %spec.key,
                          status = %receipt.analysis_status, "Section submitted");
                    *event.providers.entry(spec.model.provider).or_insert(0) += 1;
                    event.sections_submitted.push(spec.key.clone());
                    written.insert(upload.section_key, upload.content);
                }
                Err(e) => {
                    error!(uuid = %card.uuid, section = %spec.key, "Submission failed: {}", e);
                    event.sections_failed += 1;
                }
            }
        }

        if event.sections_submitted.is_empty() {
            warn!(uuid = %card.uuid, "No sections produced for card");
        }
        event
    }

    /// Specs for `missing`, canonical order, synthesis sections moved last.
    fn ordered_specs(&self, missing: &[String]) -> Vec<&SectionSpec> {
        let mut specs: Vec<&SectionSpec> = self
            .catalog
            .sections()
            .iter()
            .filter(|s| missing.contains(&s.key))
            .collect();
        for key in missing {
            if self.catalog.section(key).is_none() {
                warn!(section = %key, "Work item names a section this worker does not know");
            }
        }
        specs.sort_by_key(|s| s.uses_prior_sections);
        specs
    }

    fn prior_sections(&self, written: &HashMap<String, String>, except: &str) -> Vec<PriorSection> {
        self.catalog
            .sections()
            .iter()
            .filter(|s| s.key != except)
            .filter_map(|s| {
                written
                    .get(&s.key)
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| PriorSection {
                        title: s.title.clone(),
                        content: c.clone(),
                    })
            })
            .collect()
    }

    async fn notify(&self, event: &GuideEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.notify(event).await {
            warn!(uuid = %event.card_uuid, "Notification failed: {}", e);
        }
    }
}

/// Sleeps for `delay` unless shutdown comes first. Returns `false` on shutdown.
async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => {
            debug!("Pause of {:?} elapsed", delay);
            true
        }
    }
}
