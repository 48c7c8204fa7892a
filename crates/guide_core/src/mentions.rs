//! crates/guide_core/src/mentions.rs
//!
//! Finds references to other cards inside generated guide text.
//!
//! Two conventions are recognized: `[[Card Name]]` (what the prompts ask for)
//! and `[Card Name]` (what models sometimes write instead). Single-bracket
//! matches skip short formatting tokens such as `[B]`/`[/B]` and markdown
//! link labels.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn double_bracket() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("valid regex"))
}

fn single_bracket() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]+)\]").expect("valid regex"))
}

fn formatting_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/?(?:[A-Za-z]|[A-Z]{2,3})$").expect("valid regex"))
}

/// Distinct card names referenced in `text`, compared case-insensitively.
///
/// The first spelling seen for a name is kept. Output is sorted by the
/// lowercased name so repeated calls are stable.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut found: BTreeMap<String, String> = BTreeMap::new();
    let mut add = |name: &str| {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        found
            .entry(name.to_lowercase())
            .or_insert_with(|| name.to_string());
    };

    for caps in double_bracket().captures_iter(text) {
        add(&caps[1]);
    }

    let remainder = double_bracket().replace_all(text, " ");
    for caps in single_bracket().captures_iter(&remainder) {
        let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
        // `[label](url)` is a markdown link, not a card.
        if remainder[whole..].starts_with('(') {
            continue;
        }
        let candidate = caps[1].trim();
        if candidate.chars().count() <= 1 || formatting_token().is_match(candidate) {
            continue;
        }
        add(candidate);
    }

    found.into_values().collect()
}

/// Like [`extract_mentions`], minus references to the card the text is about.
pub fn extract_mentions_excluding(text: &str, own_name: &str) -> Vec<String> {
    let own = own_name.trim().to_lowercase();
    extract_mentions(text)
        .into_iter()
        .filter(|name| name.to_lowercase() != own)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_repeated_double_bracket_mentions() {
        let names = extract_mentions("synergizes with [[Beacon]] and [[Beacon]]");
        assert_eq!(names, vec!["Beacon".to_string()]);
    }

    #[test]
    fn reads_both_bracket_styles() {
        let names = extract_mentions(
            "Pair it with [[Sol Ring]] or [Arcane Signet]; [[ sol ring ]] again.",
        );
        assert_eq!(names, vec!["Arcane Signet".to_string(), "Sol Ring".to_string()]);
    }

    #[test]
    fn skips_formatting_tokens_and_links() {
        let names = extract_mentions(
            "[B]Bold[/B] text, [i] and [CMC] tags, a [guide](https://example.com) link, and [Lightning Bolt].",
        );
        assert_eq!(names, vec!["Lightning Bolt".to_string()]);
    }

    #[test]
    fn excludes_self_mentions_case_insensitively() {
        let names = extract_mentions_excluding("[[beacon]] loves [[Island]]", "Beacon");
        assert_eq!(names, vec!["Island".to_string()]);
    }

    #[test]
    fn empty_text_has_no_mentions() {
        assert!(extract_mentions("").is_empty());
        assert!(extract_mentions("[[ ]] []").is_empty());
    }
}
