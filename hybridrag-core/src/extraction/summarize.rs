//! Description summarization
//!
//! Compresses a list of description fragments into one cohesive text when an
//! entity or relationship accumulates too many of them.

use std::sync::Arc;

use crate::core::{GenerationParams, GenerationRequest, LanguageModel, RagError, Result};
use crate::extraction::prompts::{fill, SUMMARIZE_DESCRIPTIONS_PROMPT};

/// What a summarized description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    /// Graph node
    Entity,
    /// Graph edge
    Relationship,
}

impl DescriptionKind {
    fn label(self) -> &'static str {
        match self {
            DescriptionKind::Entity => "entity",
            DescriptionKind::Relationship => "relationship",
        }
    }
}

/// Summarizes description fragments through the language model
pub struct DescriptionSummarizer {
    llm: Arc<dyn LanguageModel>,
    language: String,
    target_tokens: usize,
    temperature: f32,
}

impl std::fmt::Debug for DescriptionSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptionSummarizer")
            .field("model", &self.llm.model_name())
            .field("target_tokens", &self.target_tokens)
            .finish()
    }
}

impl DescriptionSummarizer {
    /// Create a summarizer aiming for `target_tokens` per summary
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        language: impl Into<String>,
        target_tokens: usize,
        temperature: f32,
    ) -> Self {
        Self {
            llm,
            language: language.into(),
            target_tokens,
            temperature,
        }
    }

    /// Merge `descriptions` of the named item into one text
    pub async fn summarize(
        &self,
        kind: DescriptionKind,
        name: &str,
        descriptions: &[String],
    ) -> Result<String> {
        let description_list = descriptions
            .iter()
            .map(|d| format!("- {d}"))
            .collect::<Vec<_>>()
            .join("\n");
        let summary_length = self.target_tokens.to_string();
        let prompt = fill(
            SUMMARIZE_DESCRIPTIONS_PROMPT,
            &[
                ("description_type", kind.label()),
                ("description_name", name),
                ("description_list", &description_list),
                ("summary_length", &summary_length),
                ("language", &self.language),
            ],
        );

        let params = GenerationParams::default()
            .with_temperature(self.temperature)
            .with_max_tokens(self.target_tokens * 2);
        let summary = self
            .llm
            .generate(&GenerationRequest::new(prompt).with_params(params))
            .await?;

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(RagError::Parse {
                message: format!("empty summary for {} '{name}'", kind.label()),
            });
        }
        tracing::debug!(
            kind = kind.label(),
            name,
            fragments = descriptions.len(),
            "Summarized descriptions"
        );
        Ok(summary.to_string())
    }
}
