//! Compile-feedback correction loop
//!
//! Drives one `TranslationSession`:
//! 1. Generate the initial candidate and verify it
//! 2. On build failure, classify the diagnostics and request a repair
//! 3. Verify the repair; repeat until a build succeeds or the budget runs out
//!
//! The loop is strictly sequential within a session. Run several sessions
//! concurrently for parallelism; they share only the read-only `CorrectionLoop`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, GeneratorError, SessionError, SessionFault, VerifierError};
use crate::feedback::compiler::BuildVerifier;
use crate::feedback::error_parser::DiagnosticClassifier;
use crate::feedback::types::{TerminalState, TranslationAttempt, TranslationSession};
use crate::generator::prompts::{InitialTemplate, PromptTemplates, RepairTemplate};
use crate::generator::{CodeGenerator, Generation};
use crate::scoring::QualityScorer;

/// Per-session loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Repairs allowed after the initial attempt (0 = initial attempt only)
    pub max_repair_attempts: u32,
    /// Whether build diagnostics are fed back for repair at all
    pub feedback_enabled: bool,
    /// Append per-category fix hints to the diagnostics in repair prompts
    pub repair_hints: bool,
    /// Score each attempt when the request carries a reference
    pub score_against_reference: bool,
    /// Upper bound on a single generation call
    pub generation_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: 3,
            feedback_enabled: true,
            repair_hints: true,
            score_against_reference: true,
            generation_timeout_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn with_max_repair_attempts(mut self, max: u32) -> Self {
        self.max_repair_attempts = max;
        self
    }

    pub fn with_feedback(mut self, enabled: bool) -> Self {
        self.feedback_enabled = enabled;
        self
    }

    pub fn with_repair_hints(mut self, enabled: bool) -> Self {
        self.repair_hints = enabled;
        self
    }

    pub fn with_scoring(mut self, enabled: bool) -> Self {
        self.score_against_reference = enabled;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

/// One source unit to translate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Label carried onto the session (file name, test id)
    pub unit_id: String,
    pub source_code: String,
    /// Known-good translation to score candidates against
    #[serde(default)]
    pub reference: Option<String>,
}

impl TranslationRequest {
    pub fn new(unit_id: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            source_code: source_code.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// The correction loop controller
///
/// Holds only read-only collaborators, so one instance can drive any number
/// of concurrent sessions.
pub struct CorrectionLoop {
    verifier: Arc<dyn BuildVerifier>,
    classifier: DiagnosticClassifier,
    scorer: Option<Arc<dyn QualityScorer>>,
    templates: PromptTemplates,
    config: SessionConfig,
}

impl CorrectionLoop {
    pub fn new(verifier: Arc<dyn BuildVerifier>, config: SessionConfig) -> Self {
        Self {
            verifier,
            classifier: DiagnosticClassifier::default(),
            scorer: None,
            templates: PromptTemplates::default(),
            config,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_templates(mut self, initial: InitialTemplate, repair: RepairTemplate) -> Self {
        self.templates = PromptTemplates { initial, repair };
        self
    }

    pub fn with_classifier(mut self, classifier: DiagnosticClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Scorer to use for this request, or a configuration error if one is
    /// required but missing.
    fn scorer_for(
        &self,
        request: &TranslationRequest,
    ) -> Result<Option<&dyn QualityScorer>, ConfigError> {
        if request.reference.is_none() || !self.config.score_against_reference {
            return Ok(None);
        }
        match self.scorer.as_deref() {
            Some(scorer) => Ok(Some(scorer)),
            None => Err(ConfigError::ScorerUnavailable),
        }
    }

    /// Run a generation call under the configured timeout.
    async fn bounded<F>(&self, call: F) -> Result<Generation, GeneratorError>
    where
        F: Future<Output = Result<Generation, GeneratorError>>,
    {
        let timeout = self.config.generation_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Timeout { timeout }),
        }
    }

    /// Verify, classify and score one candidate.
    async fn evaluate(
        &self,
        iteration: u32,
        generation: Generation,
        request: &TranslationRequest,
        scorer: Option<&dyn QualityScorer>,
    ) -> Result<TranslationAttempt, VerifierError> {
        let started_at = Utc::now();
        let build = self.verifier.verify(&generation.artifact).await?;

        let score = match (scorer, request.reference.as_deref()) {
            (Some(scorer), Some(reference)) => Some(scorer.score(reference, &generation.artifact)),
            _ => None,
        };

        let attempt = if build.success {
            TranslationAttempt::passed(iteration, generation.exchange, &build)
        } else {
            let classified = self.classifier.classify(&build.diagnostics);
            tracing::debug!(
                iteration,
                findings = %classified.summary(),
                "build diagnostics classified"
            );
            TranslationAttempt::failed(iteration, generation.exchange, &build, classified)
        };

        Ok(attempt.with_score(score).with_started_at(started_at))
    }

    /// Diagnostics text for the `{diagnostics}` slot of the next repair prompt.
    fn feedback_for(&self, attempt: &TranslationAttempt) -> String {
        let diagnostics = attempt.diagnostics.as_deref().unwrap_or_default();
        match &attempt.classified_errors {
            Some(classified) if self.config.repair_hints => classified.annotate(diagnostics),
            _ => diagnostics.to_string(),
        }
    }

    /// Run one session to a terminal state.
    ///
    /// # Errors
    ///
    /// - `SessionError::Configuration` if the request needs a scorer and none
    ///   is attached. No generator or verifier call is made.
    /// - `SessionError::Aborted` on a generator fault, verifier environment
    ///   fault or cancellation. The attempts recorded so far are attached.
    pub async fn run(
        &self,
        generator: &dyn CodeGenerator,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<TranslationSession, SessionError> {
        let scorer = self.scorer_for(request)?;
        let mut session = TranslationSession::new(&request.unit_id, generator.model_id());

        tracing::info!(
            session = %session.session_id,
            unit = %request.unit_id,
            model = generator.model_id(),
            max_repairs = self.config.max_repair_attempts,
            "session started"
        );

        if cancel.is_cancelled() {
            return Err(aborted(session, SessionFault::Cancelled { iteration: 0 }));
        }

        let generation = match self
            .bounded(generator.generate_initial(&request.source_code, &self.templates.initial))
            .await
        {
            Ok(generation) => generation,
            Err(source) => {
                return Err(aborted(session, SessionFault::Generator { iteration: 0, source }))
            }
        };
        let attempt = match self.evaluate(0, generation, request, scorer).await {
            Ok(attempt) => attempt,
            Err(source) => {
                return Err(aborted(session, SessionFault::Verifier { iteration: 0, source }))
            }
        };

        let mut built = attempt.build_succeeded;
        let mut last_artifact = attempt.source_artifact.clone();
        let mut last_feedback = self.feedback_for(&attempt);
        session.push(attempt);

        if built {
            tracing::info!(session = %session.session_id, "initial translation builds");
            return Ok(session.finish(TerminalState::Succeeded));
        }
        if !self.config.feedback_enabled || self.config.max_repair_attempts == 0 {
            tracing::info!(
                session = %session.session_id,
                feedback = self.config.feedback_enabled,
                "initial translation failed, no repairs allowed"
            );
            return Ok(session.finish(TerminalState::Exhausted));
        }

        for iteration in 1..=self.config.max_repair_attempts {
            if cancel.is_cancelled() {
                tracing::info!(session = %session.session_id, iteration, "session cancelled");
                return Err(aborted(session, SessionFault::Cancelled { iteration }));
            }

            let generation = match self
                .bounded(generator.generate_repair(
                    &last_feedback,
                    &last_artifact,
                    &request.source_code,
                    &self.templates.repair,
                ))
                .await
            {
                Ok(generation) => generation,
                Err(source) => {
                    return Err(aborted(session, SessionFault::Generator { iteration, source }))
                }
            };
            let attempt = match self.evaluate(iteration, generation, request, scorer).await {
                Ok(attempt) => attempt,
                Err(source) => {
                    return Err(aborted(session, SessionFault::Verifier { iteration, source }))
                }
            };

            built = attempt.build_succeeded;
            tracing::info!(
                session = %session.session_id,
                iteration,
                built,
                score = ?attempt.quality_score,
                "repair attempt verified"
            );
            last_artifact = attempt.source_artifact.clone();
            last_feedback = self.feedback_for(&attempt);
            session.push(attempt);

            if built {
                return Ok(session.finish(TerminalState::Succeeded));
            }
        }

        tracing::warn!(
            session = %session.session_id,
            attempts = session.attempt_count(),
            "repair budget exhausted"
        );
        Ok(session.finish(TerminalState::Exhausted))
    }
}

fn aborted(session: TranslationSession, fault: SessionFault) -> SessionError {
    tracing::error!(
        session = %session.session_id,
        kind = %fault.kind(),
        error = %fault,
        "session aborted"
    );
    SessionError::Aborted {
        session: Box::new(session.abort(&fault)),
        fault,
    }
}
