//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between guide workers (and operators)
//! and the API server.

use guide_core::{Card, SelectionSource, WorkItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

pub const STATUS_OK: &str = "ok";
pub const STATUS_NO_WORK: &str = "no_work";

//=========================================================================================
// Work Fetch
//=========================================================================================

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WorkQuery {
    /// Guide tier to fill (`half` or `full` with the built-in catalog).
    pub tier: Option<String>,
    /// Card language, e.g. `en`.
    pub lang: Option<String>,
}

/// One card to work on, with what it still needs.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkResponse {
    pub status: String,
    #[schema(value_type = String)]
    pub selection: SelectionSource,
    pub tier: String,
    pub missing_sections: Vec<String>,
    /// Text of sections already stored, keyed by section key.
    pub existing_sections: BTreeMap<String, String>,
    #[schema(value_type = Object)]
    pub card: Card,
}

impl From<WorkItem> for WorkResponse {
    fn from(item: WorkItem) -> Self {
        let existing_sections = item
            .card
            .sections()
            .map(|sections| {
                sections
                    .iter()
                    .map(|(key, s)| (key.clone(), s.content.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            status: STATUS_OK.to_string(),
            selection: item.selection,
            tier: item.tier,
            missing_sections: item.missing_sections,
            existing_sections,
            card: item.card,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NoWorkResponse {
    pub status: String,
    pub message: String,
}

//=========================================================================================
// Section Submission
//=========================================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitSectionResponse {
    pub status: String,
    pub sections_complete: usize,
    pub sections_total: usize,
    /// `not_started`, `partial (k/n sections)` or `complete`.
    pub analysis_status: String,
}

//=========================================================================================
// Priority Queue
//=========================================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PriorityListRequest {
    /// Card uuids or exact card names, in the desired processing order.
    pub identifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PrioritySubmitResponse {
    pub status: String,
    pub queued: usize,
    pub duplicates: usize,
    pub not_found: Vec<String>,
}

//=========================================================================================
// Stats and Errors
//=========================================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsResponse {
    pub status: String,
    pub tier: String,
    pub total_cards: u64,
    pub cards_with_guides: u64,
    pub cards_complete: u64,
    pub completion_percentage: f64,
    pub mention_entries: u64,
    pub priority_pending: u64,
}

/// Body of every 4xx/5xx response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}
