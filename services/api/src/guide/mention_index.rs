//! services/api/src/guide/mention_index.rs
//!
//! Maintains the mention histogram: how often each card is referenced from
//! other cards' guides. Updates are best-effort. A failed lookup or counter
//! write is logged and never undoes the section write that triggered it.

use super::{GuideSettings, Stores};
use guide_core::mentions::extract_mentions_excluding;
use guide_core::{
    Card, CardFilter, NameCursor, PortResult, PriorityRequest, SectionCatalog, TierRequirement,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const AUTO_QUEUE_REASON: &str = "mentions";

/// What one pass over a piece of guide text did to the histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MentionOutcome {
    pub incremented: usize,
    pub unresolved: usize,
    pub queued: usize,
}

impl MentionOutcome {
    fn absorb(&mut self, other: MentionOutcome) {
        self.incremented += other.incremented;
        self.unresolved += other.unresolved;
        self.queued += other.queued;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub guides_scanned: usize,
    pub failed: usize,
    pub mentions: MentionOutcome,
}

pub struct MentionIndex {
    stores: Stores,
    catalog: Arc<SectionCatalog>,
    settings: GuideSettings,
}

impl MentionIndex {
    pub fn new(stores: Stores, catalog: Arc<SectionCatalog>, settings: GuideSettings) -> Self {
        Self {
            stores,
            catalog,
            settings,
        }
    }

    /// Counts each distinct card named in `text` once, skipping `source` itself.
    pub async fn record(&self, source: &Card, text: &str) -> PortResult<MentionOutcome> {
        let mut outcome = MentionOutcome::default();
        for name in extract_mentions_excluding(text, source.name()) {
            let Some(target) = self
                .stores
                .cards
                .find_card_by_name(&name, &CardFilter::default())
                .await?
            else {
                debug!(mention = %name, source = %source.uuid, "Mentioned card not in catalog");
                outcome.unresolved += 1;
                continue;
            };
            if target.uuid == source.uuid {
                continue;
            }

            let count = self
                .stores
                .mentions
                .increment(&target.uuid, target.name(), &source.uuid)
                .await?;
            outcome.incremented += 1;

            if self.maybe_auto_queue(&target, count).await? {
                outcome.queued += 1;
            }
        }
        Ok(outcome)
    }

    /// Like [`record`](Self::record) but never fails; errors are logged.
    pub async fn record_best_effort(&self, source: &Card, text: &str) -> MentionOutcome {
        match self.record(source, text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(uuid = %source.uuid, error = %e, "Mention tracking failed");
                MentionOutcome::default()
            }
        }
    }

    /// Enqueues `target` once its count reaches the threshold while its own
    /// guide is still below the default tier.
    async fn maybe_auto_queue(&self, target: &Card, count: i64) -> PortResult<bool> {
        let threshold = self.settings.auto_queue_mentions;
        if threshold <= 0 || count < threshold {
            return Ok(false);
        }
        let tier = match self.catalog.tier(&self.settings.default_tier) {
            Ok(tier) => tier,
            Err(e) => {
                warn!(error = %e, "Default tier missing; skipping auto-queue");
                return Ok(false);
            }
        };
        if TierRequirement::from(tier).is_met_by(target) {
            return Ok(false);
        }
        let added = self
            .stores
            .priority
            .enqueue(&PriorityRequest {
                name: target.name().to_string(),
                uuid: target.uuid.clone(),
                reason: AUTO_QUEUE_REASON.to_string(),
            })
            .await?;
        if added {
            info!(uuid = %target.uuid, name = %target.name(), count, "Auto-queued frequently mentioned card");
        }
        Ok(added)
    }

    /// Walks every card that carries a guide, in name order and one page of
    /// `seed_batch_size` cards at a time, and applies the same per-guide
    /// increment rule to each. `limit` caps the number of cards visited.
    pub async fn seed_from_guides(&self, limit: Option<usize>) -> PortResult<SeedReport> {
        let filter = CardFilter {
            has_guide: Some(true),
            ..CardFilter::default()
        };
        let batch = self.settings.seed_batch_size.max(1);

        let mut report = SeedReport::default();
        let mut cursor: Option<NameCursor> = None;
        let mut visited = 0usize;
        loop {
            let want = limit.map_or(batch, |cap| batch.min(cap.saturating_sub(visited)));
            if want == 0 {
                break;
            }
            let page = self
                .stores
                .cards
                .scan_cards_after(&filter, cursor.as_ref(), want)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(NameCursor::after(last));
            visited += page.len();

            for card in &page {
                let Some(text) = card.analysis.as_ref().map(|a| a.body.text()) else {
                    continue;
                };
                if text.trim().is_empty() {
                    continue;
                }
                report.guides_scanned += 1;
                match self.record(card, &text).await {
                    Ok(outcome) => report.mentions.absorb(outcome),
                    Err(e) => {
                        report.failed += 1;
                        warn!(uuid = %card.uuid, error = %e, "Failed to seed mentions from guide");
                    }
                }
            }
            debug!(visited, "Seeded page of guides");
            if page.len() < want {
                break;
            }
        }
        info!(
            scanned = report.guides_scanned,
            incremented = report.mentions.incremented,
            unresolved = report.mentions.unresolved,
            "Mention seeding finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guide::test_support::{card, section, stores};
    use guide_core::{Analysis, AnalysisStatus, CardStore, GuideBody, MentionStore, PriorityQueueStore};

    fn index(stores: Stores, threshold: i64) -> MentionIndex {
        MentionIndex::new(
            stores,
            Arc::new(SectionCatalog::builtin()),
            GuideSettings {
                auto_queue_mentions: threshold,
                ..GuideSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn repeated_mentions_in_one_text_count_once() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None), card("c2", "Forge", None)]);
        let index = index(stores, 0);
        let source = backend.find_card("c2").await.unwrap().unwrap();

        let outcome = index
            .record(&source, "synergizes with [[Beacon]] and [[Beacon]]")
            .await
            .unwrap();
        assert_eq!(outcome.incremented, 1);
        assert_eq!(backend.get_mention("c1").await.unwrap().unwrap().mention_count, 1);
    }

    #[tokio::test]
    async fn self_mentions_are_ignored() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let index = index(stores, 0);
        let source = backend.find_card("c1").await.unwrap().unwrap();

        let outcome = index.record(&source, "[[Beacon]] is great. [[beacon]]!").await.unwrap();
        assert_eq!(outcome, MentionOutcome::default());
        assert!(backend.get_mention("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_names_are_skipped() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None), card("c2", "Forge", None)]);
        let index = index(stores, 0);
        let source = backend.find_card("c2").await.unwrap().unwrap();

        let outcome = index
            .record(&source, "Try [[Not A Real Card]] with [[Beacon]].")
            .await
            .unwrap();
        assert_eq!(outcome.incremented, 1);
        assert_eq!(outcome.unresolved, 1);
        assert_eq!(backend.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reaching_threshold_queues_incomplete_card_once() {
        let (backend, stores) = stores(vec![
            card("c1", "Beacon", None),
            card("a", "Alpha", None),
            card("b", "Bravo", None),
            card("c", "Charlie", None),
        ]);
        let index = index(stores, 2);

        let alpha = backend.find_card("a").await.unwrap().unwrap();
        let bravo = backend.find_card("b").await.unwrap().unwrap();
        let charlie = backend.find_card("c").await.unwrap().unwrap();

        assert_eq!(index.record(&alpha, "[[Beacon]]").await.unwrap().queued, 0);
        assert_eq!(index.record(&bravo, "[[Beacon]]").await.unwrap().queued, 1);
        // Already active: not queued again.
        assert_eq!(index.record(&charlie, "[[Beacon]]").await.unwrap().queued, 0);

        let pending = backend.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].uuid, "c1");
        assert_eq!(pending[0].reason, AUTO_QUEUE_REASON);
    }

    #[tokio::test]
    async fn complete_cards_are_not_auto_queued() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None), card("a", "Alpha", None)]);
        for key in ["tldr", "mechanics", "strategic", "advanced", "mistakes", "conclusion"] {
            backend.put_section("c1", key, &section("text")).await.unwrap();
        }
        let index = index(stores, 1);
        let alpha = backend.find_card("a").await.unwrap().unwrap();

        let outcome = index.record(&alpha, "[[Beacon]]").await.unwrap();
        assert_eq!(outcome.incremented, 1);
        assert_eq!(outcome.queued, 0);
    }

    #[tokio::test]
    async fn seeding_scans_sectioned_and_legacy_guides() {
        let mut legacy = card("l1", "Old Card", None);
        legacy.analysis = Some(Analysis {
            body: GuideBody::Legacy {
                long_form: "Pairs with [[Beacon]] and [Sol Ring].".to_string(),
            },
            status: AnalysisStatus::Complete,
            model_used: None,
            analyzed_at: None,
            guide_version: None,
        });
        let (backend, stores) = stores(vec![
            card("c1", "Beacon", None),
            card("c2", "Sol Ring", None),
            card("c3", "Fresh", None),
            legacy,
        ]);
        backend
            .put_section("c3", "deckbuilding", &section("Run it with [[Beacon]]."))
            .await
            .unwrap();
        let index = index(stores, 0);

        let report = index.seed_from_guides(None).await.unwrap();
        assert_eq!(report.guides_scanned, 2);
        assert_eq!(report.mentions.incremented, 3);
        assert_eq!(backend.get_mention("c1").await.unwrap().unwrap().mention_count, 2);
        assert_eq!(backend.get_mention("c2").await.unwrap().unwrap().mention_count, 1);
    }

    #[tokio::test]
    async fn seeding_pages_through_every_guide() {
        let mut cards = vec![card("target", "Beacon", None)];
        for i in 0..7 {
            cards.push(card(&format!("g{}", i), &format!("Guide {}", i), None));
        }
        let (backend, stores) = stores(cards);
        for i in 0..7 {
            backend
                .put_section(&format!("g{}", i), "tldr", &section("Great with [[Beacon]]."))
                .await
                .unwrap();
        }
        let paged = MentionIndex::new(
            stores,
            Arc::new(SectionCatalog::builtin()),
            GuideSettings {
                auto_queue_mentions: 0,
                seed_batch_size: 3,
                ..GuideSettings::default()
            },
        );

        let report = paged.seed_from_guides(Some(5)).await.unwrap();
        assert_eq!(report.guides_scanned, 5);
        assert_eq!(backend.get_mention("target").await.unwrap().unwrap().mention_count, 5);

        let report = paged.seed_from_guides(None).await.unwrap();
        assert_eq!(report.guides_scanned, 7);
        assert_eq!(backend.get_mention("target").await.unwrap().unwrap().mention_count, 12);
    }
}
