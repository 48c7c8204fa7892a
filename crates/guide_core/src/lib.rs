pub mod assembly;
pub mod domain;
pub mod mentions;
pub mod ports;
pub mod tier;

pub use assembly::{analysis_status, assemble_guide};
pub use domain::{
    Analysis, AnalysisStatus, Card, CardAttributes, GuideBody, MentionEntry, PriorityEntry,
    PublicationStatus, Section, SelectionSource, WorkItem,
};
pub use mentions::{extract_mentions, extract_mentions_excluding};
pub use ports::{
    CardFields, CardFilter, CardSort, CardStore, GuideEvent, MentionStore, NameCursor,
    NotificationService, PortError, PortResult, PriorityCounts, PriorityQueueStore,
    PriorityRequest, SectionRefresh, TextGenerationService, TierRequirement,
};
pub use tier::{
    GuideTier, ModelProvider, ModelSpec, SectionCatalog, SectionSpec, TierError, FULL_TIER,
    HALF_TIER, RESERVED_SECTION_KEYS,
};
