//! services/api/src/guide/priority.rs
//!
//! Operator-facing priority list: resolve a batch of identifiers (uuids or
//! card names) and make them the active queue, or report queue progress.

use super::Stores;
use crate::error::GuideError;
use guide_core::{Card, CardFilter, PriorityEntry, PriorityRequest};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};
use utoipa::ToSchema;

pub const MANUAL_REASON: &str = "manual";

/// How many upcoming entries the status report lists.
const STATUS_PREVIEW: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PrioritySubmission {
    /// Entries now active, in queue order.
    pub queued: usize,
    /// Identifiers that resolved to a name already taken earlier in the batch.
    pub duplicates: usize,
    pub not_found: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PriorityStatus {
    pub total_submitted: u64,
    pub processed: u64,
    pub pending: u64,
    pub completion_percentage: f64,
    #[schema(value_type = Vec<Object>)]
    pub next: Vec<PriorityEntry>,
}

pub struct PriorityService {
    stores: Stores,
}

impl PriorityService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    async fn resolve(&self, identifier: &str) -> Result<Option<Card>, GuideError> {
        if let Some(card) = self.stores.cards.find_card(identifier).await? {
            return Ok(Some(card));
        }
        Ok(self
            .stores
            .cards
            .find_card_by_name(identifier, &CardFilter::default())
            .await?)
    }

    /// Replaces the active queue with the resolved identifiers, one entry per
    /// distinct card name, in submission order. Nothing is written unless at
    /// least one identifier resolves.
    pub async fn submit(&self, identifiers: &[String]) -> Result<PrioritySubmission, GuideError> {
        let identifiers: Vec<&str> = identifiers
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if identifiers.is_empty() {
            return Err(GuideError::Validation(
                "identifiers must be a non-empty list".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut requests = Vec::new();
        let mut duplicates = 0;
        let mut not_found = Vec::new();
        for identifier in identifiers {
            let Some(card) = self.resolve(identifier).await? else {
                debug!(identifier, "Priority identifier did not match any card");
                not_found.push(identifier.to_string());
                continue;
            };
            if !seen.insert(card.name().to_lowercase()) {
                duplicates += 1;
                continue;
            }
            requests.push(PriorityRequest {
                name: card.name().to_string(),
                uuid: card.uuid.clone(),
                reason: MANUAL_REASON.to_string(),
            });
        }

        if requests.is_empty() {
            return Err(GuideError::Validation(
                "none of the identifiers matched a card".to_string(),
            ));
        }

        let queued = self.stores.priority.replace_active(&requests).await?;
        info!(queued, duplicates, missing = not_found.len(), "Priority queue replaced");
        Ok(PrioritySubmission {
            queued,
            duplicates,
            not_found,
        })
    }

    pub async fn status(&self) -> Result<PriorityStatus, GuideError> {
        let counts = self.stores.priority.counts().await?;
        let next = self.stores.priority.pending(STATUS_PREVIEW).await?;
        let pending = counts.total.saturating_sub(counts.processed);
        let completion_percentage = if counts.total == 0 {
            0.0
        } else {
            ((counts.processed as f64 / counts.total as f64) * 10_000.0).round() / 100.0
        };
        Ok(PriorityStatus {
            total_submitted: counts.total,
            processed: counts.processed,
            pending,
            completion_percentage,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guide::test_support::{card, stores};
    use guide_core::PriorityQueueStore;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn printings_of_one_name_collapse_to_one_entry() {
        let (backend, stores) = stores(vec![
            card("p1", "Sol Ring", Some(3)),
            card("p2", "Sol Ring", Some(9)),
            card("b", "Beacon", None),
        ]);
        let service = PriorityService::new(stores);

        let result = service.submit(&ids(&["p2", "p1", "beacon", "Nope"])).await.unwrap();
        assert_eq!(result.queued, 2);
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.not_found, vec!["Nope".to_string()]);

        let pending = backend.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].uuid, "p2");
        assert_eq!(pending[1].name, "Beacon");
        assert_eq!(pending[1].reason, MANUAL_REASON);
    }

    #[tokio::test]
    async fn new_submission_replaces_active_queue() {
        let (backend, stores) = stores(vec![card("a", "Alpha", None), card("b", "Bravo", None)]);
        let service = PriorityService::new(stores);

        service.submit(&ids(&["Alpha"])).await.unwrap();
        service.submit(&ids(&["Bravo"])).await.unwrap();

        let names: Vec<String> = backend.pending(10).await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Bravo".to_string()]);
    }

    #[tokio::test]
    async fn rejects_empty_or_unresolvable_batches_without_writing() {
        let (backend, stores) = stores(vec![card("a", "Alpha", None)]);
        let service = PriorityService::new(stores);
        service.submit(&ids(&["Alpha"])).await.unwrap();

        assert!(matches!(
            service.submit(&ids(&["", "  "])).await,
            Err(GuideError::Validation(_))
        ));
        assert!(matches!(
            service.submit(&ids(&["Ghost"])).await,
            Err(GuideError::Validation(_))
        ));
        assert_eq!(backend.pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_reports_progress() {
        let (backend, stores) = stores(vec![
            card("a", "Alpha", None),
            card("b", "Bravo", None),
            card("c", "Charlie", None),
        ]);
        let service = PriorityService::new(stores);
        service.submit(&ids(&["Alpha", "Bravo", "Charlie"])).await.unwrap();
        backend.mark_processed("Alpha").await.unwrap();

        let status = service.status().await.unwrap();
        assert_eq!(status.total_submitted, 3);
        assert_eq!(status.processed, 1);
        assert_eq!(status.pending, 2);
        assert_eq!(status.completion_percentage, 33.33);
        assert_eq!(status.next[0].name, "Bravo");
    }
}
