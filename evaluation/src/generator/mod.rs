//! Candidate generation.
//!
//! A `CodeGenerator` turns a prompt into a candidate artifact. The shipped
//! implementation, `TemplateGenerator`, renders a template, sends it to a
//! `CompletionBackend` and extracts the code block from the reply. Every call
//! returns its `Exchange` alongside the artifact so the session can keep a
//! per-attempt audit record without shared mutable state.

pub mod extract;
pub mod prompts;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::GeneratorError;
use extract::CodeExtractor;
use prompts::{InitialTemplate, RepairTemplate, PROMPT_VERSION};

/// Whether an exchange produced the first translation or a repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Initial,
    Repair,
}

/// One prompt/response round trip with the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub kind: ExchangeKind,
    /// Fully rendered prompt text
    pub prompt: String,
    /// Raw completion text
    pub response: String,
    /// Code pulled out of `response`
    pub extracted: String,
    pub prompt_version: String,
    pub at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        kind: ExchangeKind,
        prompt: impl Into<String>,
        response: impl Into<String>,
        extracted: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            response: response.into(),
            extracted: extracted.into(),
            prompt_version: PROMPT_VERSION.to_string(),
            at: Utc::now(),
        }
    }

    /// Record the version of the template that rendered `prompt`.
    pub fn with_prompt_version(mut self, version: impl Into<String>) -> Self {
        self.prompt_version = version.into();
        self
    }
}

/// Result of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub artifact: String,
    pub exchange: Exchange,
}

impl From<Exchange> for Generation {
    fn from(exchange: Exchange) -> Self {
        Self {
            artifact: exchange.extracted.clone(),
            exchange,
        }
    }
}

/// A text-completion endpoint.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Identifier recorded on sessions (e.g. `gpt-4o`, `codellama-13b`).
    fn model_id(&self) -> &str;

    /// Send one prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String, GeneratorError>;
}

/// Produces candidate translations.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate_initial(
        &self,
        source_code: &str,
        template: &InitialTemplate,
    ) -> Result<Generation, GeneratorError>;

    async fn generate_repair(
        &self,
        diagnostics: &str,
        previous_artifact: &str,
        source_code: &str,
        template: &RepairTemplate,
    ) -> Result<Generation, GeneratorError>;
}

/// Template-driven generator over any completion backend.
#[derive(Clone)]
pub struct TemplateGenerator {
    backend: Arc<dyn CompletionBackend>,
    extractor: CodeExtractor,
}

impl TemplateGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            extractor: CodeExtractor::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: CodeExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    async fn exchange(
        &self,
        kind: ExchangeKind,
        prompt: String,
        prompt_version: &str,
    ) -> Result<Generation, GeneratorError> {
        tracing::debug!(
            model = self.backend.model_id(),
            ?kind,
            prompt_chars = prompt.len(),
            "requesting completion"
        );
        let response = self.backend.complete(&prompt).await?;

        let (extracted, strategy) = self.extractor.extract_with_strategy(&response);
        let exchange =
            Exchange::new(kind, prompt, response, extracted).with_prompt_version(prompt_version);
        if exchange.extracted.is_empty() {
            tracing::warn!(
                ?kind,
                response_chars = exchange.response.len(),
                "no code in completion"
            );
            return Err(GeneratorError::NoExtractableCode {
                exchange: Box::new(exchange),
            });
        }
        tracing::debug!(?strategy, code_chars = exchange.extracted.len(), "extracted candidate");

        Ok(exchange.into())
    }
}

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    async fn generate_initial(
        &self,
        source_code: &str,
        template: &InitialTemplate,
    ) -> Result<Generation, GeneratorError> {
        let prompt = template.render(source_code);
        self.exchange(ExchangeKind::Initial, prompt, template.version()).await
    }

    async fn generate_repair(
        &self,
        diagnostics: &str,
        previous_artifact: &str,
        source_code: &str,
        template: &RepairTemplate,
    ) -> Result<Generation, GeneratorError> {
        let prompt = template.render(diagnostics, previous_artifact, source_code);
        self.exchange(ExchangeKind::Repair, prompt, template.version()).await
    }
}
