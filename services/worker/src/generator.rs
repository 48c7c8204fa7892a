//! services/worker/src/generator.rs
//!
//! Turns one section spec plus a card into prose. The generator is stateless:
//! it builds the prompt, dispatches to the backend registered for the
//! section's provider, bounds the call with a timeout and rejects output too
//! short to be a real section. Retrying is left to the caller.

use crate::error::GenerationError;
use guide_core::{Card, ModelProvider, SectionSpec, TextGenerationService};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const STYLE_GUIDELINES: &str = "\
- Use natural paragraphs, but you may use bullet points and tables sparingly if it improves clarity.
- Liberally mention other cards using [[Card Name]] in double brackets.
- Do NOT mention yourself, the AI, or the analysis process.
- Do NOT end every section with phrases like 'in conclusion' or similar.
";

/// A section already written for the card, offered as context to synthesis
/// sections.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorSection {
    pub title: String,
    pub content: String,
}

pub struct SectionGenerator {
    backends: HashMap<ModelProvider, Arc<dyn TextGenerationService>>,
    timeout: Duration,
    min_chars: usize,
}

impl SectionGenerator {
    pub fn new(timeout: Duration, min_chars: usize) -> Self {
        Self {
            backends: HashMap::new(),
            timeout,
            min_chars,
        }
    }

    /// Registers a backend under the provider it reports.
    pub fn with_backend(mut self, backend: Arc<dyn TextGenerationService>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    pub fn has_backend(&self, provider: ModelProvider) -> bool {
        self.backends.contains_key(&provider)
    }

    pub async fn generate(
        &self,
        card: &Card,
        spec: &SectionSpec,
        prior: &[PriorSection],
    ) -> Result<String, GenerationError> {
        let backend = self.backends.get(&spec.model.provider).ok_or_else(|| {
            GenerationError::Unavailable(format!(
                "no {} backend configured for section '{}'",
                spec.model.provider, spec.key
            ))
        })?;

        let prompt = build_prompt(card, spec, prior);
        debug!(uuid = %card.uuid, section = %spec.key, model = %spec.model, "Generating section");

        let text = tokio::time::timeout(self.timeout, backend.generate(&spec.model.name, &prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;

        let text = text.trim();
        let length = text.chars().count();
        if length < self.min_chars {
            return Err(GenerationError::Degenerate { length });
        }
        Ok(text.to_string())
    }
}

pub fn build_prompt(card: &Card, spec: &SectionSpec, prior: &[PriorSection]) -> String {
    let attrs = &card.attributes;
    let or_na = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());

    let mut prompt = format!(
        "Section: {}\n\n{}\n\n{}\nCard details:\nName: {}\nMana Cost: {}\nType: {}\nText: {}\n",
        spec.title,
        spec.instruction,
        STYLE_GUIDELINES,
        attrs.name,
        or_na(&attrs.mana_cost),
        or_na(&attrs.type_line),
        or_na(&attrs.oracle_text),
    );
    if let Some(power) = &attrs.power {
        let toughness = attrs.toughness.as_deref().unwrap_or("?");
        prompt.push_str(&format!("P/T: {}/{}\n", power, toughness));
    }
    prompt.push_str(&format!(
        "Set: {}\nRarity: {}\n",
        or_na(&attrs.set_code),
        or_na(&attrs.rarity)
    ));

    if !prior.is_empty() {
        prompt.push_str("\nSections already written for this card:\n");
        for section in prior {
            prompt.push_str(&format!("\n### {}\n{}\n", section.title, section.content));
        }
    }
    prompt
}
