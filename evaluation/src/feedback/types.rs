//! Session and attempt records.
//!
//! A `TranslationSession` is the append-only trace of one source unit
//! evaluated against one model. Attempt 0 is always the unmodified initial
//! translation; attempts 1..N are repairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FaultReport, SessionFault};
use crate::feedback::compiler::BuildOutcome;
use crate::feedback::error_parser::ClassificationReport;
use crate::generator::Exchange;

/// Final classification of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Some attempt built (always the last one).
    Succeeded,
    /// The repair budget ran out with no attempt building.
    Exhausted,
    /// A generator/verifier fault or cancellation stopped the session early.
    Aborted,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One iteration of the loop.
///
/// `diagnostics` and `classified_errors` are present exactly when
/// `build_succeeded` is false; use the constructors to keep it that way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationAttempt {
    /// 0 = initial attempt, 1..N = repair attempts
    pub iteration_index: u32,
    /// Candidate code produced this iteration
    pub source_artifact: String,
    pub build_succeeded: bool,
    /// Raw build-tool output (failed builds only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    /// Structured view of `diagnostics` (failed builds only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classified_errors: Option<ClassificationReport>,
    /// Similarity against the reference, when one was supplied and scored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// Prompt/response audit record for this attempt
    pub exchange: Exchange,
    pub started_at: DateTime<Utc>,
    pub build_duration_ms: u64,
}

impl TranslationAttempt {
    /// Attempt whose candidate built.
    pub fn passed(iteration_index: u32, exchange: Exchange, build: &BuildOutcome) -> Self {
        Self {
            iteration_index,
            source_artifact: exchange.extracted.clone(),
            build_succeeded: true,
            diagnostics: None,
            classified_errors: None,
            quality_score: None,
            exchange,
            started_at: Utc::now(),
            build_duration_ms: build.duration_ms,
        }
    }

    /// Attempt whose candidate was rejected by the build.
    pub fn failed(
        iteration_index: u32,
        exchange: Exchange,
        build: &BuildOutcome,
        classified: ClassificationReport,
    ) -> Self {
        Self {
            iteration_index,
            source_artifact: exchange.extracted.clone(),
            build_succeeded: false,
            diagnostics: Some(build.diagnostics.clone()),
            classified_errors: Some(classified),
            quality_score: None,
            exchange,
            started_at: Utc::now(),
            build_duration_ms: build.duration_ms,
        }
    }

    pub fn with_score(mut self, score: Option<f64>) -> Self {
        self.quality_score = score;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn is_repair(&self) -> bool {
        self.iteration_index > 0
    }
}

/// Trace of one source unit against one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationSession {
    pub session_id: String,
    /// Caller-supplied label for the source unit (file name, test id)
    pub unit_id: String,
    pub model_id: String,
    attempts: Vec<TranslationAttempt>,
    terminal_state: Option<TerminalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fault: Option<FaultReport>,
    /// Exchange of the generation call that aborted the session, when the
    /// model answered but no attempt could be made from the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rejected_exchange: Option<Exchange>,
}

impl TranslationSession {
    pub fn new(unit_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            unit_id: unit_id.into(),
            model_id: model_id.into(),
            attempts: Vec::new(),
            terminal_state: None,
            fault: None,
            rejected_exchange: None,
        }
    }

    /// Append the next attempt. Ignored once the session is terminal.
    pub(crate) fn push(&mut self, attempt: TranslationAttempt) {
        if self.is_terminal() {
            tracing::warn!(
                session = %self.session_id,
                iteration = attempt.iteration_index,
                "attempt recorded after terminal state, dropping"
            );
            return;
        }
        debug_assert_eq!(attempt.iteration_index as usize, self.attempts.len());
        self.attempts.push(attempt);
    }

    pub(crate) fn finish(mut self, state: TerminalState) -> Self {
        self.terminal_state = Some(state);
        self
    }

    pub(crate) fn abort(mut self, fault: &SessionFault) -> Self {
        self.fault = Some(fault.report());
        self.rejected_exchange = fault.exchange().cloned();
        self.terminal_state = Some(TerminalState::Aborted);
        self
    }

    pub fn attempts(&self) -> &[TranslationAttempt] {
        &self.attempts
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Repairs requested after the initial attempt.
    pub fn repair_count(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }

    pub fn terminal_state(&self) -> Option<TerminalState> {
        self.terminal_state
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_state.is_some()
    }

    pub fn fault(&self) -> Option<&FaultReport> {
        self.fault.as_ref()
    }

    pub fn rejected_exchange(&self) -> Option<&Exchange> {
        self.rejected_exchange.as_ref()
    }

    pub fn first_attempt(&self) -> Option<&TranslationAttempt> {
        self.attempts.first()
    }

    /// The reported result. Always the last attempt, never the best-scoring one.
    pub fn final_attempt(&self) -> Option<&TranslationAttempt> {
        self.attempts.last()
    }

    pub fn compiles(&self) -> bool {
        self.final_attempt().is_some_and(|a| a.build_succeeded)
    }

    pub fn final_score(&self) -> Option<f64> {
        self.final_attempt().and_then(|a| a.quality_score)
    }

    /// Last attempt's score minus the first attempt's score, when both exist.
    pub fn quality_delta(&self) -> Option<f64> {
        let first = self.first_attempt()?.quality_score?;
        let last = self.final_attempt()?.quality_score?;
        Some(last - first)
    }

    /// Export record for reporting tools.
    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session_id.clone(),
            unit_id: self.unit_id.clone(),
            model_id: self.model_id.clone(),
            terminal_state: self.terminal_state,
            compiles: self.compiles(),
            repair_count: self.repair_count(),
            attempt_count: self.attempt_count(),
            final_translation: self.final_attempt().map(|a| a.source_artifact.clone()),
            final_score: self.final_score(),
            score_delta: self.quality_delta(),
            fault: self.fault.clone(),
            rejected_exchange: self.rejected_exchange.clone(),
            attempts: self.attempts.clone(),
        }
    }
}

/// Per-session export consumed by reporting and analysis tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub unit_id: String,
    pub model_id: String,
    pub terminal_state: Option<TerminalState>,
    /// Final build status (of the last attempt)
    pub compiles: bool,
    pub repair_count: usize,
    pub attempt_count: usize,
    pub final_translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_delta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_exchange: Option<Exchange>,
    pub attempts: Vec<TranslationAttempt>,
}
