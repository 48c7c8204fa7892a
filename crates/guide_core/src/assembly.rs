//! crates/guide_core/src/assembly.rs
//!
//! Turns a card's section map into the human-readable guide and decides how
//! complete that guide is for a given tier. Both functions depend only on the
//! section map, so the assembled text can always be rebuilt from it.

use crate::domain::{AnalysisStatus, Section};
use crate::tier::{GuideTier, SectionCatalog};
use std::collections::{BTreeMap, BTreeSet};

/// Concatenates the present sections in the catalog's canonical order.
///
/// Each section renders as `## {title}\n\n{content}\n`; sections whose content
/// is blank are skipped. Keys the catalog doesn't know are ignored.
pub fn assemble_guide(sections: &BTreeMap<String, Section>, catalog: &SectionCatalog) -> String {
    catalog
        .sections()
        .iter()
        .filter_map(|spec| {
            let section = sections.get(&spec.key)?;
            let content = section.content.trim();
            if content.is_empty() {
                return None;
            }
            let title = if section.title.trim().is_empty() {
                spec.title.as_str()
            } else {
                section.title.trim()
            };
            Some(format!("## {}\n\n{}\n", title, content))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Completeness of `present` against `tier`.
pub fn analysis_status(present: &BTreeSet<&str>, tier: &GuideTier) -> AnalysisStatus {
    let count = tier.count_present(present);
    if count == 0 {
        AnalysisStatus::NotStarted
    } else if count >= tier.required() {
        AnalysisStatus::Complete
    } else {
        AnalysisStatus::Partial {
            present: count,
            total: tier.total(),
        }
    }
}
