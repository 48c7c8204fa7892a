//! crates/guide_core/src/tier.rs
//!
//! The declarative section catalog: which section keys exist, in which order
//! they are displayed, which model writes each one, and which subsets of them
//! ("tiers") define a complete guide.
//!
//! Catalogs are normally the built-in defaults, but an operator can supply a
//! TOML file with the same shape to change titles, instructions or models
//! without touching code.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Keys that are never accepted as a section, no matter what the catalog says.
/// Unlabeled submissions used to land under these and overwrite real content.
pub const RESERVED_SECTION_KEYS: &[&str] = &["section", "content", "analysis", "general", "guide"];

pub const HALF_TIER: &str = "half";
pub const FULL_TIER: &str = "full";

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("Unknown guide tier: {0}")]
    UnknownTier(String),
    #[error("Unknown section key: {0}")]
    UnknownSection(String),
    #[error("Section key '{0}' is reserved and cannot be submitted")]
    ReservedKey(String),
    #[error("Section key '{0}' is declared more than once")]
    DuplicateSection(String),
    #[error("Invalid section catalog: {0}")]
    Invalid(String),
    #[error("Failed to read section catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse section catalog: {0}")]
    Parse(#[from] toml::de::Error),
}

//=========================================================================================
// Models
//=========================================================================================

/// The model backends a section can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Gemini,
    Ollama,
    Claude,
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelProvider::Gemini => "gemini",
            ModelProvider::Ollama => "ollama",
            ModelProvider::Claude => "claude",
        };
        f.write_str(s)
    }
}

/// A concrete model on a concrete provider, chosen in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: ModelProvider,
    pub name: String,
}

impl ModelSpec {
    pub fn new(provider: ModelProvider, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.name)
    }
}

//=========================================================================================
// Sections and Tiers
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub key: String,
    pub title: String,
    pub instruction: String,
    pub model: ModelSpec,
    /// Synthesis sections are generated last and see the text written so far.
    #[serde(default)]
    pub uses_prior_sections: bool,
}

/// A named set of required sections. Listed in canonical display order.
#[derive(Debug, Clone, PartialEq)]
pub struct GuideTier {
    pub name: String,
    pub sections: Vec<SectionSpec>,
    min_sections: usize,
}

impl GuideTier {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sections.iter().any(|s| s.key == key)
    }

    pub fn total(&self) -> usize {
        self.sections.len()
    }

    /// How many of this tier's sections must be present to count as complete.
    pub fn required(&self) -> usize {
        self.min_sections
    }

    /// Tier keys that are not in `present`, in canonical order.
    pub fn missing<'a>(&'a self, present: &BTreeSet<&str>) -> Vec<&'a str> {
        self.keys().filter(|k| !present.contains(k)).collect()
    }

    /// Number of this tier's keys found in `present`.
    pub fn count_present(&self, present: &BTreeSet<&str>) -> usize {
        self.keys().filter(|k| present.contains(k)).count()
    }
}

/// Raw on-disk form of a catalog.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    sections: Vec<SectionSpec>,
    tiers: Vec<TierFile>,
}

#[derive(Debug, Deserialize)]
struct TierFile {
    name: String,
    sections: Vec<String>,
    #[serde(default)]
    min_sections: Option<usize>,
}

/// Every known section in canonical display order, plus the named tiers.
#[derive(Debug, Clone)]
pub struct SectionCatalog {
    sections: Vec<SectionSpec>,
    tiers: BTreeMap<String, GuideTier>,
}

impl SectionCatalog {
    /// Loads a catalog from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, TierError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, TierError> {
        let file: CatalogFile = toml::from_str(raw)?;
        let tiers = file
            .tiers
            .into_iter()
            .map(|t| (t.name, t.sections, t.min_sections))
            .collect();
        Self::build(file.sections, tiers)
    }

    fn build(
        sections: Vec<SectionSpec>,
        tiers: Vec<(String, Vec<String>, Option<usize>)>,
    ) -> Result<Self, TierError> {
        let mut seen = BTreeSet::new();
        for spec in &sections {
            if is_reserved(&spec.key) {
                return Err(TierError::ReservedKey(spec.key.clone()));
            }
            if !seen.insert(spec.key.as_str()) {
                return Err(TierError::DuplicateSection(spec.key.clone()));
            }
        }

        let mut built = BTreeMap::new();
        for (name, keys, min_sections) in tiers {
            let wanted: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
            if wanted.len() != keys.len() {
                return Err(TierError::Invalid(format!(
                    "tier '{}' lists a section twice",
                    name
                )));
            }
            if let Some(unknown) = wanted.iter().find(|k| !seen.contains(*k)) {
                return Err(TierError::UnknownSection(unknown.to_string()));
            }
            if wanted.is_empty() {
                return Err(TierError::Invalid(format!("tier '{}' has no sections", name)));
            }
            // Tier order always follows the catalog's declared order.
            let tier_sections: Vec<SectionSpec> = sections
                .iter()
                .filter(|s| wanted.contains(s.key.as_str()))
                .cloned()
                .collect();
            let required = min_sections.unwrap_or(tier_sections.len());
            if required == 0 || required > tier_sections.len() {
                return Err(TierError::Invalid(format!(
                    "tier '{}' requires {} of {} sections",
                    name,
                    required,
                    tier_sections.len()
                )));
            }
            built.insert(
                name.clone(),
                GuideTier {
                    name,
                    sections: tier_sections,
                    min_sections: required,
                },
            );
        }

        if built.is_empty() {
            return Err(TierError::Invalid("no tiers declared".to_string()));
        }

        Ok(Self {
            sections,
            tiers: built,
        })
    }

    pub fn tier(&self, name: &str) -> Result<&GuideTier, TierError> {
        self.tiers
            .get(name)
            .ok_or_else(|| TierError::UnknownTier(name.to_string()))
    }

    pub fn tier_names(&self) -> impl Iterator<Item = &str> {
        self.tiers.keys().map(String::as_str)
    }

    /// All sections in canonical display order.
    pub fn sections(&self) -> &[SectionSpec] {
        &self.sections
    }

    pub fn section(&self, key: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.key == key)
    }

    /// Accepts only keys that the catalog declares and that are not reserved.
    pub fn validate_key(&self, key: &str) -> Result<&SectionSpec, TierError> {
        let key = key.trim();
        if is_reserved(key) {
            return Err(TierError::ReservedKey(key.to_string()));
        }
        self.section(key)
            .ok_or_else(|| TierError::UnknownSection(key.to_string()))
    }

    /// The built-in catalog: twelve sections, a six-section "half" tier and a
    /// twelve-section "full" tier.
    pub fn builtin() -> Self {
        let llama = ModelSpec::new(ModelProvider::Ollama, "llama3.1:latest");
        let qwen = ModelSpec::new(ModelProvider::Ollama, "qwen2.5:7b");
        let mistral = ModelSpec::new(ModelProvider::Ollama, "mistral:7b-instruct");

        let spec = |key: &str, title: &str, instruction: &str, model: &ModelSpec| SectionSpec {
            key: key.to_string(),
            title: title.to_string(),
            instruction: instruction.to_string(),
            model: model.clone(),
            uses_prior_sections: false,
        };

        let mut conclusion = spec(
            "conclusion",
            "Conclusion",
            "Summarize the card's overall value and when to play it.",
            &llama,
        );
        conclusion.uses_prior_sections = true;

        let sections = vec![
            spec(
                "tldr",
                "TL;DR Summary",
                "Write a 2-3 sentence summary of the card's main strengths, weaknesses, and archetypes. Be concise.",
                &llama,
            ),
            spec(
                "mechanics",
                "Card Mechanics & Interactions",
                "Explain the card's rules, mechanics, and any unique interactions. Include edge cases and rules notes.",
                &llama,
            ),
            spec(
                "strategic",
                "Strategic Applications",
                "Describe how this card is used strategically. What decks/archetypes want it? What roles does it fill?",
                &qwen,
            ),
            spec(
                "deckbuilding",
                "Deckbuilding & Synergies",
                "Discuss deckbuilding considerations, synergies, and combos. What cards work well with it? Mention other cards using [[Card Name]] format.",
                &llama,
            ),
            spec(
                "format",
                "Format Analysis",
                "Analyze the card's viability in different formats (Standard, Historic, Commander, etc). Where does it shine?",
                &mistral,
            ),
            spec(
                "scenarios",
                "Gameplay Scenarios",
                "Give 2-3 example in-game scenarios where this card is impactful. Use specific board states if possible.",
                &llama,
            ),
            spec(
                "history",
                "Historical Context",
                "Discuss the card's history, reprints, and impact on the game over time.",
                &qwen,
            ),
            spec(
                "flavor",
                "Flavor & Design",
                "Comment on the card's flavor, art, and design. How does it fit the set/theme?",
                &llama,
            ),
            spec(
                "budget",
                "Budget & Accessibility",
                "Is this card budget-friendly? Are there cheaper alternatives?",
                &qwen,
            ),
            spec(
                "advanced",
                "Advanced Techniques",
                "Describe advanced or less obvious uses, tricks, or interactions.",
                &qwen,
            ),
            spec(
                "mistakes",
                "Common Mistakes",
                "List common mistakes or misplays involving this card.",
                &mistral,
            ),
            conclusion,
        ];

        let full: Vec<String> = sections.iter().map(|s| s.key.clone()).collect();
        let half: Vec<String> = ["tldr", "mechanics", "strategic", "advanced", "mistakes", "conclusion"]
            .iter()
            .map(|k| k.to_string())
            .collect();

        Self::build(
            sections,
            vec![
                (HALF_TIER.to_string(), half, None),
                (FULL_TIER.to_string(), full, None),
            ],
        )
        .expect("built-in section catalog is valid")
    }
}

impl Default for SectionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn is_reserved(key: &str) -> bool {
    key.is_empty()
        || RESERVED_SECTION_KEYS
            .iter()
            .any(|r| r.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_tiers_follow_declared_order() {
        let catalog = SectionCatalog::builtin();
        let half: Vec<&str> = catalog.tier(HALF_TIER).unwrap().keys().collect();
        assert_eq!(
            half,
            vec!["tldr", "mechanics", "strategic", "advanced", "mistakes", "conclusion"]
        );

        let full = catalog.tier(FULL_TIER).unwrap();
        assert_eq!(full.total(), 12);
        assert_eq!(full.required(), 12);
        assert_eq!(full.sections.last().unwrap().key, "conclusion");
        assert!(full.sections.last().unwrap().uses_prior_sections);
    }

    #[test]
    fn reserved_and_unknown_keys_are_rejected() {
        let catalog = SectionCatalog::builtin();
        assert!(matches!(
            catalog.validate_key("section"),
            Err(TierError::ReservedKey(_))
        ));
        assert!(matches!(
            catalog.validate_key("Content"),
            Err(TierError::ReservedKey(_))
        ));
        assert!(matches!(catalog.validate_key(""), Err(TierError::ReservedKey(_))));
        assert!(matches!(
            catalog.validate_key("lore"),
            Err(TierError::UnknownSection(_))
        ));
        assert_eq!(catalog.validate_key("tldr").unwrap().title, "TL;DR Summary");
    }

    #[test]
    fn unknown_tier_is_an_error() {
        let catalog = SectionCatalog::builtin();
        assert!(matches!(catalog.tier("quarter"), Err(TierError::UnknownTier(_))));
    }

    #[test]
    fn missing_keys_are_reported_in_tier_order() {
        let catalog = SectionCatalog::builtin();
        let tier = catalog.tier(HALF_TIER).unwrap();
        let present: BTreeSet<&str> = ["conclusion", "tldr", "history"].into_iter().collect();
        assert_eq!(
            tier.missing(&present),
            vec!["mechanics", "strategic", "advanced", "mistakes"]
        );
        assert_eq!(tier.count_present(&present), 2);
    }

    const CATALOG: &str = r#"
[[sections]]
key = "tldr"
title = "Summary"
instruction = "Summarize."
model = { provider = "gemini", name = "gemini-1.5-flash" }

[[sections]]
key = "combos"
title = "Combos"
instruction = "List combos."
model = { provider = "claude", name = "claude-3-haiku-20240307" }

[[sections]]
key = "wrapup"
title = "Wrap-up"
instruction = "Conclude."
model = { provider = "ollama", name = "llama3.1:latest" }
uses_prior_sections = true

[[tiers]]
name = "quick"
sections = ["wrapup", "tldr"]

[[tiers]]
name = "deep"
sections = ["tldr", "combos", "wrapup"]
min_sections = 2
"#;

    #[test]
    fn loads_catalog_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = SectionCatalog::from_path(file.path()).unwrap();
        let quick = catalog.tier("quick").unwrap();
        // Declared catalog order wins over the order listed in the tier.
        assert_eq!(quick.keys().collect::<Vec<_>>(), vec!["tldr", "wrapup"]);

        let deep = catalog.tier("deep").unwrap();
        assert_eq!(deep.required(), 2);
        assert_eq!(deep.total(), 3);
        assert_eq!(
            catalog.section("combos").unwrap().model,
            ModelSpec::new(ModelProvider::Claude, "claude-3-haiku-20240307")
        );
    }

    #[test]
    fn rejects_catalog_declaring_reserved_key() {
        let raw = CATALOG.replace("key = \"combos\"", "key = \"section\"");
        assert!(matches!(
            SectionCatalog::from_toml_str(&raw),
            Err(TierError::ReservedKey(_))
        ));
    }

    #[test]
    fn rejects_tier_with_unknown_section() {
        let raw = CATALOG.replace("sections = [\"wrapup\", \"tldr\"]", "sections = [\"tldr\", \"lore\"]");
        assert!(matches!(
            SectionCatalog::from_toml_str(&raw),
            Err(TierError::UnknownSection(_))
        ));
    }

    #[test]
    fn rejects_threshold_larger_than_tier() {
        let raw = CATALOG.replace("min_sections = 2", "min_sections = 4");
        assert!(matches!(
            SectionCatalog::from_toml_str(&raw),
            Err(TierError::Invalid(_))
        ));
    }
}
