//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::GuideError;
use crate::guide::SectionSubmission;
use crate::web::protocol::{
    ErrorResponse, NoWorkResponse, PriorityListRequest, PrioritySubmitResponse, StatsResponse,
    SubmitSectionResponse, WorkQuery, WorkResponse, STATUS_NO_WORK, STATUS_OK,
};
use crate::web::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use guide_core::{CardFilter, TierRequirement};
use std::sync::Arc;
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_work_handler,
        submit_section_handler,
        submit_priority_handler,
        priority_status_handler,
        stats_handler,
        get_card_handler,
    ),
    components(
        schemas(
            WorkResponse,
            NoWorkResponse,
            SectionSubmission,
            SubmitSectionResponse,
            PriorityListRequest,
            PrioritySubmitResponse,
            crate::guide::PriorityStatus,
            StatsResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Card Guide API", description = "Work distribution and section submission for card guide workers.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Worker Endpoints
//=========================================================================================

/// Fetch the next card that needs guide sections.
///
/// Returns 404 with `status = "no_work"` when nothing needs work; callers
/// should back off before asking again.
#[utoipa::path(
    get,
    path = "/api/work",
    params(WorkQuery),
    responses(
        (status = 200, description = "A card to work on", body = WorkResponse),
        (status = 404, description = "No work available", body = NoWorkResponse),
        (status = 400, description = "Unknown tier", body = ErrorResponse)
    )
)]
pub async fn get_work_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<WorkQuery>,
) -> Result<Response, GuideError> {
    let item = app_state
        .selector
        .next_work(query.tier.as_deref(), query.lang.as_deref())
        .await?;

    Ok(match item {
        Some(item) => (StatusCode::OK, Json(WorkResponse::from(item))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(NoWorkResponse {
                status: STATUS_NO_WORK.to_string(),
                message: "No cards currently need work".to_string(),
            }),
        )
            .into_response(),
    })
}

/// Submit one generated section for a card.
#[utoipa::path(
    post,
    path = "/api/sections",
    request_body = SectionSubmission,
    responses(
        (status = 200, description = "Section stored", body = SubmitSectionResponse),
        (status = 400, description = "Malformed body, missing field, reserved or unknown section key", body = ErrorResponse),
        (status = 404, description = "Unknown card", body = ErrorResponse)
    )
)]
pub async fn submit_section_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<SectionSubmission>, JsonRejection>,
) -> Result<impl IntoResponse, GuideError> {
    let Json(submission) = payload?;
    let outcome = app_state.submissions.submit_section(submission).await?;
    Ok(Json(SubmitSectionResponse {
        status: STATUS_OK.to_string(),
        sections_complete: outcome.sections_complete,
        sections_total: outcome.sections_total,
        analysis_status: outcome.analysis_status.to_string(),
    }))
}

//=========================================================================================
// Operator Endpoints
//=========================================================================================

/// Replace the active priority queue.
#[utoipa::path(
    post,
    path = "/api/priority",
    request_body = PriorityListRequest,
    responses(
        (status = 200, description = "Queue replaced", body = PrioritySubmitResponse),
        (status = 400, description = "Malformed body, empty list or nothing resolved", body = ErrorResponse)
    )
)]
pub async fn submit_priority_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<PriorityListRequest>, JsonRejection>,
) -> Result<impl IntoResponse, GuideError> {
    let Json(request) = payload?;
    let result = app_state.priority.submit(&request.identifiers).await?;
    Ok(Json(PrioritySubmitResponse {
        status: STATUS_OK.to_string(),
        queued: result.queued,
        duplicates: result.duplicates,
        not_found: result.not_found,
    }))
}

/// Report priority queue progress and the next pending entries.
#[utoipa::path(
    get,
    path = "/api/priority",
    responses(
        (status = 200, description = "Queue status", body = crate::guide::PriorityStatus)
    )
)]
pub async fn priority_status_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, GuideError> {
    Ok(Json(app_state.priority.status().await?))
}

/// Guide coverage statistics for the default tier.
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Coverage statistics", body = StatsResponse)
    )
)]
pub async fn stats_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, GuideError> {
    let tier = app_state.catalog.tier(&app_state.config.default_tier)?;
    let cards = &app_state.stores.cards;

    let total_cards = cards.count_cards(&CardFilter::default()).await?;
    let cards_with_guides = cards
        .count_cards(&CardFilter {
            has_guide: Some(true),
            ..CardFilter::default()
        })
        .await?;
    let incomplete = cards
        .count_cards(&CardFilter {
            incomplete_for: Some(TierRequirement::from(tier)),
            ..CardFilter::default()
        })
        .await?;
    let cards_complete = total_cards.saturating_sub(incomplete);
    let completion_percentage = if total_cards == 0 {
        0.0
    } else {
        ((cards_complete as f64 / total_cards as f64) * 10_000.0).round() / 100.0
    };

    let mention_entries = app_state.stores.mentions.count_entries().await?;
    let counts = app_state.stores.priority.counts().await?;

    Ok(Json(StatsResponse {
        status: STATUS_OK.to_string(),
        tier: tier.name.clone(),
        total_cards,
        cards_with_guides,
        cards_complete,
        completion_percentage,
        mention_entries,
        priority_pending: counts.total.saturating_sub(counts.processed),
    }))
}

/// Read one card with its guide.
#[utoipa::path(
    get,
    path = "/api/cards/{uuid}",
    params(("uuid" = String, Path, description = "The card's uuid.")),
    responses(
        (status = 200, description = "The card, with its guide tagged by `format`"),
        (status = 404, description = "Unknown card", body = ErrorResponse)
    )
)]
pub async fn get_card_handler(
    State(app_state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, GuideError> {
    let card = app_state
        .stores
        .cards
        .find_card(&uuid)
        .await?
        .ok_or_else(|| GuideError::NotFound(format!("Card {} not found", uuid)))?;
    Ok(Json(card))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::guide::test_support::{card, stores};
    use crate::guide::Stores;
    use axum::body::to_bytes;
    use guide_core::{CardStore, SectionCatalog};
    use serde_json::Value;

    fn app(stores: Stores) -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(Config::default()),
            Arc::new(SectionCatalog::builtin()),
            stores,
        ))
    }

    async fn body_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn submission(uuid: &str, key: &str) -> SectionSubmission {
        SectionSubmission {
            uuid: uuid.to_string(),
            section_key: key.to_string(),
            content: format!("{} content", key),
            title: String::new(),
            model_used: "qwen2.5:7b".to_string(),
            tier: None,
        }
    }

    #[tokio::test]
    async fn work_fetch_returns_card_then_no_work() {
        let (_backend, stores) = stores(vec![card("c1", "Beacon", Some(1))]);
        let state = app(stores);

        let response = get_work_handler(State(state.clone()), Query(WorkQuery::default()))
            .await
            .unwrap();
        let (status, body) = body_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["selection"], "popularity");
        assert_eq!(body["card"]["uuid"], "c1");
        assert_eq!(body["missing_sections"].as_array().unwrap().len(), 6);

        for key in ["tldr", "mechanics", "strategic", "advanced", "mistakes", "conclusion"] {
            submit_section_handler(State(state.clone()), Ok(Json(submission("c1", key))))
                .await
                .unwrap();
        }

        let response = get_work_handler(State(state), Query(WorkQuery::default()))
            .await
            .unwrap();
        let (status, body) = body_json(response).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "no_work");
    }

    #[tokio::test]
    async fn submit_reports_progress_and_rejects_reserved_keys() {
        let (_backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let state = app(stores);

        let response = submit_section_handler(State(state.clone()), Ok(Json(submission("c1", "tldr"))))
            .await
            .unwrap()
            .into_response();
        let (status, body) = body_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sections_complete"], 1);
        assert_eq!(body["sections_total"], 6);
        assert_eq!(body["analysis_status"], "partial (1/6 sections)");

        let err = submit_section_handler(State(state.clone()), Ok(Json(submission("c1", "general"))))
            .await
            .err()
            .unwrap();
        let (status, body) = body_json(err.into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let err = submit_section_handler(State(state), Ok(Json(submission("missing", "tldr"))))
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn priority_round_trip_and_stats() {
        let (_backend, stores) = stores(vec![
            card("p1", "Sol Ring", Some(3)),
            card("p2", "Sol Ring", Some(7)),
            card("b", "Beacon", None),
        ]);
        let state = app(stores);

        let request = PriorityListRequest {
            identifiers: vec!["p1".into(), "p2".into(), "Beacon".into()],
        };
        let response = submit_priority_handler(State(state.clone()), Ok(Json(request)))
            .await
            .unwrap()
            .into_response();
        let (_, body) = body_json(response).await;
        assert_eq!(body["queued"], 2);
        assert_eq!(body["duplicates"], 1);

        let response = priority_status_handler(State(state.clone()))
            .await
            .unwrap()
            .into_response();
        let (_, body) = body_json(response).await;
        assert_eq!(body["pending"], 2);
        assert_eq!(body["next"][0]["uuid"], "p1");

        let response = stats_handler(State(state)).await.unwrap().into_response();
        let (_, body) = body_json(response).await;
        assert_eq!(body["total_cards"], 3);
        assert_eq!(body["cards_complete"], 0);
        assert_eq!(body["priority_pending"], 2);
    }

    #[tokio::test]
    async fn card_read_uses_tagged_guide_format() {
        let (_backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let state = app(stores);
        submit_section_handler(State(state.clone()), Ok(Json(submission("c1", "tldr"))))
            .await
            .unwrap();

        let response = get_card_handler(State(state.clone()), Path("c1".to_string()))
            .await
            .unwrap()
            .into_response();
        let (_, body) = body_json(response).await;
        assert_eq!(body["status"], "public");
        assert_eq!(body["analysis"]["format"], "sectioned");
        assert_eq!(body["analysis"]["sections"]["tldr"]["title"], "TL;DR Summary");

        let err = get_card_handler(State(state), Path("nope".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    async fn extract<T>(body: &str) -> Result<Json<T>, JsonRejection>
    where
        T: serde::de::DeserializeOwned,
    {
        use axum::extract::FromRequest;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/sections")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        Json::<T>::from_request(request, &()).await
    }

    #[tokio::test]
    async fn malformed_bodies_get_structured_bad_request() {
        let (backend, stores) = stores(vec![card("c1", "Beacon", None)]);
        let state = app(stores);

        let payload = extract::<SectionSubmission>(
            r#"{"uuid": "c1", "section_key": "tldr", "content": "text"}"#,
        )
        .await;
        assert!(payload.is_err());
        let err = submit_section_handler(State(state.clone()), payload)
            .await
            .err()
            .unwrap();
        let (status, body) = body_json(err.into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("model_used"));

        let payload = extract::<PriorityListRequest>("not json").await;
        let err = submit_priority_handler(State(state), payload).await.err().unwrap();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        assert!(backend.find_card("c1").await.unwrap().unwrap().analysis.is_none());
    }
}
