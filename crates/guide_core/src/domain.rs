//! crates/guide_core/src/domain.rs
//!
//! Defines the core data structures for cards, their generated guides and the
//! two demand signals (priority queue and mention histogram) that feed the
//! work selector. These types carry serde derives because they cross the HTTP
//! boundary unchanged, but they know nothing about any particular database.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

//=========================================================================================
// Cards
//=========================================================================================

/// The descriptive attributes of one printing, as delivered by the card import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardAttributes {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana_cost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_code: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Lower is more popular. Absent for cards the ranking source doesn't know.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<String>,
}

fn default_lang() -> String {
    "en".to_string()
}

/// Top-level publication flag, distinct from the guide's completeness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    #[default]
    Draft,
    Public,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Draft => "draft",
            PublicationStatus::Public => "public",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "public" => PublicationStatus::Public,
            _ => PublicationStatus::Draft,
        }
    }
}

/// One physical printing of a card, keyed by its stable `uuid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub uuid: String,
    #[serde(flatten)]
    pub attributes: CardAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    #[serde(default)]
    pub status: PublicationStatus,
}

impl Card {
    pub fn new(uuid: impl Into<String>, attributes: CardAttributes) -> Self {
        Self {
            uuid: uuid.into(),
            attributes,
            analysis: None,
            status: PublicationStatus::Draft,
        }
    }

    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    /// Section map of a sectioned guide, or `None` for legacy or missing guides.
    pub fn sections(&self) -> Option<&BTreeMap<String, Section>> {
        self.analysis.as_ref().and_then(|a| a.body.sections())
    }

    /// Keys of every section currently stored for this card.
    pub fn present_keys(&self) -> BTreeSet<&str> {
        self.sections()
            .map(|s| s.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

//=========================================================================================
// Guides
//=========================================================================================

/// One generated unit of guide prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
    pub model_used: String,
    pub generated_at: DateTime<Utc>,
}

/// The two shapes a stored guide can take. Older cards carry one free-form
/// blob; everything written by the submission service is sectioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum GuideBody {
    Legacy {
        long_form: String,
    },
    Sectioned {
        sections: BTreeMap<String, Section>,
        /// Assembled guide text. A cache, always regenerable from `sections`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl GuideBody {
    pub fn sections(&self) -> Option<&BTreeMap<String, Section>> {
        match self {
            GuideBody::Sectioned { sections, .. } => Some(sections),
            GuideBody::Legacy { .. } => None,
        }
    }

    /// All prose in this guide, used when scanning existing guides for mentions.
    ///
    /// Sectioned guides contribute their section bodies (falling back to the
    /// assembled content when no section has text); legacy guides contribute
    /// the long-form blob.
    pub fn text(&self) -> String {
        match self {
            GuideBody::Legacy { long_form } => long_form.clone(),
            GuideBody::Sectioned { sections, content } => {
                let joined = sections
                    .values()
                    .map(|s| s.content.as_str())
                    .filter(|c| !c.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if joined.is_empty() {
                    content.clone().unwrap_or_default()
                } else {
                    joined
                }
            }
        }
    }
}

/// Completeness of a card's guide relative to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisStatus {
    NotStarted,
    Partial { present: usize, total: usize },
    Complete,
}

impl AnalysisStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, AnalysisStatus::Complete)
    }

    /// Short label used for persistence.
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisStatus::NotStarted => "not_started",
            AnalysisStatus::Partial { .. } => "partial",
            AnalysisStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStatus::NotStarted => write!(f, "not_started"),
            AnalysisStatus::Partial { present, total } => {
                write!(f, "partial ({}/{} sections)", present, total)
            }
            AnalysisStatus::Complete => write!(f, "complete"),
        }
    }
}

/// A card's guide plus provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(flatten)]
    pub body: GuideBody,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_version: Option<String>,
}

//=========================================================================================
// Demand Signals
//=========================================================================================

/// An explicit request to process a card soon. At most one active entry
/// exists per card name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityEntry {
    pub name: String,
    pub uuid: String,
    pub reason: String,
    pub priority_order: i64,
    pub added_at: DateTime<Utc>,
    pub processed: bool,
}

/// How often a card has been referenced from other cards' guides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEntry {
    pub uuid: String,
    pub card_name: String,
    pub mention_count: i64,
    pub last_mentioned: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mentioned_in: Option<String>,
}

//=========================================================================================
// Work Assignment
//=========================================================================================

/// Which layer of the selector produced a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Priority,
    Mentions,
    Popularity,
    Random,
}

impl fmt::Display for SelectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectionSource::Priority => "priority",
            SelectionSource::Mentions => "mentions",
            SelectionSource::Popularity => "popularity",
            SelectionSource::Random => "random",
        };
        f.write_str(s)
    }
}

/// A single card handed to a worker, with what remains to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub card: Card,
    pub tier: String,
    pub selection: SelectionSource,
    pub missing_sections: Vec<String>,
}
