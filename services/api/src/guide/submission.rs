//! services/api/src/guide/submission.rs
//!
//! Accepts one generated section at a time and keeps the card's guide state
//! consistent with its section map.
//!
//! A submission is validated completely before anything is written. The
//! section is a single keyed write, and completeness, the assembled text and
//! the publication flag are recomputed from the stored sections in the same
//! store operation. Concurrent submissions for one card are serialized there,
//! so the last one always sees every section written before it.

use super::{GuideSettings, MentionIndex, MentionOutcome, Stores};
use crate::error::GuideError;
use chrono::Utc;
use guide_core::{
    analysis_status, assemble_guide, AnalysisStatus, Card, CardFields, GuideBody, GuideTier,
    PublicationStatus, Section, SectionCatalog,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

/// One section as submitted by a worker.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SectionSubmission {
    pub uuid: String,
    pub section_key: String,
    pub content: String,
    /// Falls back to the catalog title for the key when blank.
    #[serde(default)]
    pub title: String,
    pub model_used: String,
    /// Tier used to judge completeness; the configured default when absent.
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    pub sections_complete: usize,
    pub sections_total: usize,
    pub analysis_status: AnalysisStatus,
    pub mentions: MentionOutcome,
}

pub struct SubmissionService {
    stores: Stores,
    catalog: Arc<SectionCatalog>,
    mentions: Arc<MentionIndex>,
    settings: GuideSettings,
}

fn require(field: &str, value: &str) -> Result<(), GuideError> {
    if value.trim().is_empty() {
        return Err(GuideError::Validation(format!("Missing required field: {}", field)));
    }
    Ok(())
}

impl SubmissionService {
    pub fn new(
        stores: Stores,
        catalog: Arc<SectionCatalog>,
        mentions: Arc<MentionIndex>,
        settings: GuideSettings,
    ) -> Self {
        Self {
            stores,
            catalog,
            mentions,
            settings,
        }
    }

    /// Status, cached text and metadata for `card` as it stands with the new
    /// section stored. The cached text is rebuilt whenever the tier is
    /// complete or a cached text already exists, so it never lags behind the
    /// sections it was built from.
    fn derived_fields(&self, card: &Card, tier: &GuideTier, section: &Section) -> CardFields {
        let status = analysis_status(&card.present_keys(), tier);
        let cached = matches!(
            card.analysis.as_ref().map(|a| &a.body),
            Some(GuideBody::Sectioned { content: Some(_), .. })
        );
        let content = if status.is_complete() || cached {
            card.sections().map(|s| assemble_guide(s, &self.catalog))
        } else {
            None
        };

        // Guides are published as soon as any section exists.
        CardFields {
            status: Some(PublicationStatus::Public),
            analysis_status: Some(status),
            content,
            model_used: Some(section.model_used.clone()),
            analyzed_at: Some(section.generated_at),
            guide_version: Some(format!("{}guide_v1", tier.name)),
        }
    }

    pub async fn submit_section(
        &self,
        submission: SectionSubmission,
    ) -> Result<SubmissionOutcome, GuideError> {
        // --- 1. Validate everything before touching storage ---
        require("uuid", &submission.uuid)?;
        require("section_key", &submission.section_key)?;
        require("content", &submission.content)?;
        require("model_used", &submission.model_used)?;

        let spec = self.catalog.validate_key(&submission.section_key)?;
        let tier_name = submission
            .tier
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.settings.default_tier);
        let tier = self.catalog.tier(tier_name)?;

        let uuid = submission.uuid.trim();
        if self.stores.cards.find_card(uuid).await?.is_none() {
            return Err(GuideError::NotFound(format!("Card {} not found", uuid)));
        }

        // --- 2. Write exactly one section and refresh the derived fields ---
        let title = if submission.title.trim().is_empty() {
            spec.title.clone()
        } else {
            submission.title.trim().to_string()
        };
        let section = Section {
            title,
            content: submission.content.trim().to_string(),
            model_used: submission.model_used.trim().to_string(),
            generated_at: Utc::now(),
        };
        let refresh = |card: &Card| self.derived_fields(card, tier, &section);
        let card = self
            .stores
            .cards
            .put_section_and_refresh(uuid, &spec.key, &section, &refresh)
            .await?;

        let present = card.present_keys();
        let status = analysis_status(&present, tier);
        let sections_complete = tier.count_present(&present);

        // Queue entries are judged against the default tier, whatever tier
        // this submission was made for.
        let default_tier = self.catalog.tier(&self.settings.default_tier)?;
        if analysis_status(&present, default_tier).is_complete() {
            if let Err(e) = self.stores.priority.mark_processed(card.name()).await {
                warn!(uuid, error = %e, "Failed to retire priority entry");
            }
        }

        info!(
            uuid,
            section = %spec.key,
            model = %section.model_used,
            %status,
            "Stored guide section"
        );

        // --- 3. Best-effort mention tracking ---
        let mentions = self.mentions.record_best_effort(&card, &section.content).await;

        Ok(SubmissionOutcome {
            sections_complete,
            sections_total: tier.total(),
            analysis_status: status,
            mentions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guide::test_support::{card, stores};
    use crate::guide::PriorityService;
    use async_trait::async_trait;
    use guide_core::{
        CardFilter, CardSort, CardStore, MentionEntry, MentionStore, PortError, PortResult,
        PriorityQueueStore,
    };

    const HALF: [&str; 6] = ["tldr", "mechanics", "strategic", "advanced", "mistakes", "conclusion"];

    fn service_with(stores: Stores) -> SubmissionService {
        let catalog = Arc::new(SectionCatalog::builtin());
        let settings = GuideSettings::default();
        let mentions = Arc::new(MentionIndex::new(stores.clone(), catalog.clone(), settings.clone()));
        SubmissionService::new(stores, catalog, mentions, settings)
    }

    fn submission(uuid: &str, key: &str, content: &str) -> SectionSubmission {
        SectionSubmission {
            uuid: uuid.to_string(),
            section_key: key.to_string(),
            content: content.to_string(),
            title: String::new(),
            model_used: "llama3.1:latest".to_string(),
            tier: None,
        }
    }

    #[tokio::test]
    async fn resubmitting_a_key_overwrites_it() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let service = service_with(stores);

        service.submit_section(submission("c1", "tldr", "first")).await.unwrap();
        let outcome = service.submit_section(submission("c1", "tldr", "second")).await.unwrap();
        assert_eq!(outcome.sections_complete, 1);

        let stored = backend.find_card("c1").await.unwrap().unwrap();
        let sections = stored.sections().unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections["tldr"].content, "second");
        assert_eq!(sections["tldr"].title, "TL;DR Summary");
    }

    #[tokio::test]
    async fn different_keys_accumulate() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let service = service_with(stores);

        service.submit_section(submission("c1", "tldr", "A")).await.unwrap();
        service.submit_section(submission("c1", "mechanics", "B")).await.unwrap();

        let stored = backend.find_card("c1").await.unwrap().unwrap();
        assert_eq!(stored.sections().unwrap()["tldr"].content, "A");
        assert_eq!(stored.sections().unwrap()["mechanics"].content, "B");
    }

    #[tokio::test]
    async fn half_tier_walkthrough_assembles_in_canonical_order() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let service = service_with(stores);

        // Submit out of canonical order, holding back the conclusion.
        for key in ["mistakes", "tldr", "advanced", "strategic", "mechanics"] {
            let outcome = service
                .submit_section(submission("c1", key, &format!("{} text", key)))
                .await
                .unwrap();
            assert!(!outcome.analysis_status.is_complete());
        }
        let stored = backend.find_card("c1").await.unwrap().unwrap();
        let analysis = stored.analysis.clone().unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Partial { present: 5, total: 6 });
        assert_eq!(analysis.status.to_string(), "partial (5/6 sections)");
        assert!(matches!(analysis.body, GuideBody::Sectioned { content: None, .. }));

        let outcome = service
            .submit_section(submission("c1", "conclusion", "conclusion text"))
            .await
            .unwrap();
        assert_eq!(outcome.analysis_status, AnalysisStatus::Complete);
        assert_eq!(outcome.sections_complete, 6);
        assert_eq!(outcome.sections_total, 6);

        let stored = backend.find_card("c1").await.unwrap().unwrap();
        let expected = "## TL;DR Summary\n\ntldr text\n\n\
                        ## Card Mechanics & Interactions\n\nmechanics text\n\n\
                        ## Strategic Applications\n\nstrategic text\n\n\
                        ## Advanced Techniques\n\nadvanced text\n\n\
                        ## Common Mistakes\n\nmistakes text\n\n\
                        ## Conclusion\n\nconclusion text\n";
        match stored.analysis.unwrap().body {
            GuideBody::Sectioned { content, .. } => assert_eq!(content.as_deref(), Some(expected)),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn first_section_publishes_the_card() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let service = service_with(stores);

        service.submit_section(submission("c1", "tldr", "A")).await.unwrap();
        let stored = backend.find_card("c1").await.unwrap().unwrap();
        assert_eq!(stored.status, PublicationStatus::Public);
        assert_eq!(stored.analysis.unwrap().guide_version.as_deref(), Some("halfguide_v1"));
    }

    #[tokio::test]
    async fn rejected_submissions_write_nothing() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let service = service_with(stores);

        let reserved = service.submit_section(submission("c1", "section", "text")).await;
        assert!(matches!(reserved, Err(GuideError::Validation(_))));
        let unknown = service.submit_section(submission("c1", "lore", "text")).await;
        assert!(matches!(unknown, Err(GuideError::Validation(_))));
        let blank = service.submit_section(submission("c1", "tldr", "   ")).await;
        assert!(matches!(blank, Err(GuideError::Validation(_))));
        let mut bad_tier = submission("c1", "tldr", "text");
        bad_tier.tier = Some("quarter".to_string());
        assert!(matches!(
            service.submit_section(bad_tier).await,
            Err(GuideError::Validation(_))
        ));
        let missing = service.submit_section(submission("zzz", "tldr", "text")).await;
        assert!(matches!(missing, Err(GuideError::NotFound(_))));

        let stored = backend.find_card("c1").await.unwrap().unwrap();
        assert!(stored.analysis.is_none());
        assert_eq!(stored.status, PublicationStatus::Draft);
    }

    #[tokio::test]
    async fn completion_retires_the_priority_entry() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        PriorityService::new(stores.clone())
            .submit(&["Beacon".to_string()])
            .await
            .unwrap();
        let service = service_with(stores);

        for key in HALF {
            service.submit_section(submission("c1", key, "text")).await.unwrap();
        }
        assert!(backend.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mentions_in_submitted_text_are_counted() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None), card("c2", "Forge", None)]);
        let service = service_with(stores);

        let outcome = service
            .submit_section(submission(
                "c2",
                "deckbuilding",
                "Forge synergizes with [[Beacon]] and [[Beacon]]; [[Forge]] itself is fine.",
            ))
            .await
            .unwrap();
        assert_eq!(outcome.mentions.incremented, 1);
        assert_eq!(backend.get_mention("c1").await.unwrap().unwrap().mention_count, 1);
        assert!(backend.get_mention("c2").await.unwrap().is_none());
    }

    /// A mention store whose every call fails.
    struct BrokenMentions;

    #[async_trait]
    impl MentionStore for BrokenMentions {
        async fn increment(&self, _: &str, _: &str, _: &str) -> PortResult<i64> {
            Err(PortError::Unavailable("histogram offline".to_string()))
        }
        async fn most_mentioned(&self, _: &CardFilter) -> PortResult<Option<MentionEntry>> {
            Ok(None)
        }
        async fn get_mention(&self, _: &str) -> PortResult<Option<MentionEntry>> {
            Ok(None)
        }
        async fn count_entries(&self) -> PortResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn mention_failures_do_not_fail_the_submission() {
        let (backend, mut stores) = stores(vec![card("c1", "Beacon", None), card("c2", "Forge", None)]);
        stores.mentions = Arc::new(BrokenMentions);
        let service = service_with(stores);

        let outcome = service
            .submit_section(submission("c2", "tldr", "Works with [[Beacon]]."))
            .await
            .unwrap();
        assert_eq!(outcome.mentions, MentionOutcome::default());
        assert_eq!(backend.find_card("c2").await.unwrap().unwrap().present_keys().len(), 1);
    }

    fn full_tier(mut submission: SectionSubmission) -> SectionSubmission {
        submission.tier = Some("full".to_string());
        submission
    }

    fn cached_content(card: &Card) -> Option<String> {
        match card.analysis.as_ref().map(|a| &a.body) {
            Some(GuideBody::Sectioned { content, .. }) => content.clone(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn cached_text_follows_sections_added_for_a_larger_tier() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let service = service_with(stores);
        let catalog = SectionCatalog::builtin();

        for key in HALF {
            service.submit_section(submission("c1", key, "text")).await.unwrap();
        }
        let outcome = service
            .submit_section(full_tier(submission("c1", "history", "reprinted often")))
            .await
            .unwrap();
        assert_eq!(outcome.analysis_status, AnalysisStatus::Partial { present: 7, total: 12 });

        let stored = backend.find_card("c1").await.unwrap().unwrap();
        let content = cached_content(&stored).unwrap();
        assert!(content.contains("## Historical Context\n\nreprinted often\n"));
        assert_eq!(content, assemble_guide(stored.sections().unwrap(), &catalog));
    }

    #[tokio::test]
    async fn larger_tier_submissions_leave_queue_entries_for_the_default_tier() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        PriorityService::new(stores.clone())
            .submit(&["Beacon".to_string()])
            .await
            .unwrap();
        let service = service_with(stores);

        for key in ["tldr", "mechanics", "strategic"] {
            service
                .submit_section(full_tier(submission("c1", key, "text")))
                .await
                .unwrap();
        }
        assert_eq!(backend.pending(10).await.unwrap().len(), 1);
        for key in ["advanced", "mistakes", "conclusion"] {
            service
                .submit_section(full_tier(submission("c1", key, "text")))
                .await
                .unwrap();
        }
        assert!(backend.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_leave_status_matching_stored_sections() {
        let cards: Vec<Card> = (0..20)
            .map(|i| card(&format!("c{}", i), &format!("Card {}", i), None))
            .collect();
        let (backend, stores) = stores(cards);
        let service = Arc::new(service_with(stores));
        let catalog = SectionCatalog::builtin();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            for key in HALF {
                let service = service.clone();
                let uuid = format!("c{}", i);
                tasks.spawn(async move {
                    service.submit_section(submission(&uuid, key, "text")).await
                });
            }
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let all = backend.scan_cards(&CardFilter::default(), CardSort::Name, 100).await.unwrap();
        assert_eq!(all.len(), 20);
        for stored in all {
            assert_eq!(stored.present_keys().len(), 6);
            let analysis = stored.analysis.clone().unwrap();
            assert_eq!(analysis.status, AnalysisStatus::Complete, "card {}", stored.uuid);
            assert_eq!(
                cached_content(&stored),
                Some(assemble_guide(stored.sections().unwrap(), &catalog))
            );
        }
    }
}
