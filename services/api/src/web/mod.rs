pub mod protocol;
pub mod rest;
pub mod state;

pub use rest::ApiDoc;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// All guide API routes, without CORS or documentation layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/work", get(rest::get_work_handler))
        .route("/api/sections", post(rest::submit_section_handler))
        .route(
            "/api/priority",
            get(rest::priority_status_handler).post(rest::submit_priority_handler),
        )
        .route("/api/stats", get(rest::stats_handler))
        .route("/api/cards/{uuid}", get(rest::get_card_handler))
        .with_state(state)
}
