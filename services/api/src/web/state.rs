//! services/api/src/web/state.rs
//!
//! Defines the application's shared state, created once at startup and
//! handed to every handler.

use crate::config::Config;
use crate::guide::{
    GuideSettings, MentionIndex, PriorityService, Stores, SubmissionService, WorkSelector,
};
use guide_core::SectionCatalog;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<SectionCatalog>,
    pub stores: Stores,
    pub selector: WorkSelector,
    pub submissions: SubmissionService,
    pub priority: PriorityService,
    pub mentions: Arc<MentionIndex>,
}

impl AppState {
    /// Wires every guide service onto the same stores and catalog.
    pub fn new(config: Arc<Config>, catalog: Arc<SectionCatalog>, stores: Stores) -> Self {
        let settings = GuideSettings::from(config.as_ref());
        let mentions = Arc::new(MentionIndex::new(
            stores.clone(),
            catalog.clone(),
            settings.clone(),
        ));
        Self {
            selector: WorkSelector::new(stores.clone(), catalog.clone(), settings.clone()),
            submissions: SubmissionService::new(
                stores.clone(),
                catalog.clone(),
                mentions.clone(),
                settings,
            ),
            priority: PriorityService::new(stores.clone()),
            mentions,
            config,
            catalog,
            stores,
        }
    }
}
