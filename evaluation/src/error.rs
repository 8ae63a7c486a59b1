//! Fault taxonomy for translation sessions.
//!
//! Build failures are not errors: a candidate that does not compile is a
//! normal attempt outcome and drives the repair loop. Everything in this
//! module is something that stops a session (or prevents it from starting).
//!
//! | Type              | Raised by          | Effect on session            |
//! |-------------------|--------------------|------------------------------|
//! | `ConfigError`     | templates, setup   | rejected before attempt 0    |
//! | `VerifierError`   | build verifier     | aborted, partial trace kept  |
//! | `GeneratorError`  | code generator     | aborted, partial trace kept  |
//! | `SessionFault`    | loop (wraps above) | recorded on the session      |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feedback::types::TranslationSession;
use crate::generator::Exchange;

/// Environment faults raised while trying to build a candidate.
///
/// These are distinct from a candidate that fails to compile: the toolchain
/// itself could not give an answer.
#[derive(Debug, Error)]
pub enum VerifierError {
    /// The configured toolchain binary does not exist or is not on `PATH`.
    #[error("Toolchain not found: {}", .toolchain.display())]
    ToolchainNotFound { toolchain: PathBuf },

    /// The toolchain exists but could not be started (permissions, etc.).
    #[error("Failed to launch {}: {source}", .toolchain.display())]
    Launch {
        toolchain: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build command did not finish within the allotted time.
    #[error("Build timed out after {}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    /// The isolated build workspace could not be prepared.
    #[error("Build workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

/// Faults raised while obtaining a candidate from a model.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The backend could not be reached or returned an error status.
    #[error("Backend unavailable: {0}")]
    Backend(String),

    /// The backend answered, but not in a shape we can read.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// No code could be extracted after every fallback strategy. The
    /// exchange that produced nothing is kept for diagnosis.
    #[error("No extractable code in model response")]
    NoExtractableCode { exchange: Box<Exchange> },

    /// The completion did not arrive within the allotted time.
    #[error("Generation timed out after {}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },
}

impl GeneratorError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// The prompt/response round trip behind this error, when the backend
    /// answered at all.
    pub fn exchange(&self) -> Option<&Exchange> {
        match self {
            Self::NoExtractableCode { exchange } => Some(exchange.as_ref()),
            _ => None,
        }
    }
}

/// Configuration problems detected before any attempt is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A prompt template lacks a slot its kind requires.
    #[error("{template} template is missing required slot {{{slot}}}")]
    MissingSlot {
        template: &'static str,
        slot: &'static str,
    },

    /// A reference artifact was supplied with scoring on, but no scorer is attached.
    #[error("Quality scoring requested for a reference artifact but no scorer is configured")]
    ScorerUnavailable,

    /// Anything else that makes the setup unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Coarse classification of what ended a session early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Toolchain missing, permission denied, build timeout.
    VerifierEnvironment,
    /// Backend unavailable, unreadable response, generation timeout.
    Generator,
    /// The caller asked the session to stop.
    Cancelled,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerifierEnvironment => write!(f, "verifier_environment"),
            Self::Generator => write!(f, "generator"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An unrecoverable fault that ended a session before it reached a verdict.
#[derive(Debug, Error)]
pub enum SessionFault {
    #[error("Verifier fault at iteration {iteration}: {source}")]
    Verifier {
        iteration: u32,
        #[source]
        source: VerifierError,
    },

    #[error("Generator fault at iteration {iteration}: {source}")]
    Generator {
        iteration: u32,
        #[source]
        source: GeneratorError,
    },

    #[error("Cancelled before iteration {iteration}")]
    Cancelled { iteration: u32 },
}

impl SessionFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Verifier { .. } => FaultKind::VerifierEnvironment,
            Self::Generator { .. } => FaultKind::Generator,
            Self::Cancelled { .. } => FaultKind::Cancelled,
        }
    }

    /// Iteration index the fault interrupted.
    pub fn iteration(&self) -> u32 {
        match self {
            Self::Verifier { iteration, .. }
            | Self::Generator { iteration, .. }
            | Self::Cancelled { iteration } => *iteration,
        }
    }

    /// Model exchange the fault left behind, if any.
    pub fn exchange(&self) -> Option<&Exchange> {
        match self {
            Self::Generator { source, .. } => source.exchange(),
            _ => None,
        }
    }

    /// True for toolchain-side problems, which say nothing about the candidate.
    pub fn is_environment_fault(&self) -> bool {
        self.kind() == FaultKind::VerifierEnvironment
    }

    pub fn report(&self) -> FaultReport {
        FaultReport {
            kind: self.kind(),
            iteration: self.iteration(),
            message: self.to_string(),
        }
    }
}

/// Serializable snapshot of a `SessionFault` for exported results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultReport {
    pub kind: FaultKind,
    pub iteration: u32,
    pub message: String,
}

/// Error returned by `CorrectionLoop::run`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Setup was rejected; no model or build call was made.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The session stopped early. The partial trace is attached.
    #[error("Session aborted after {} attempt(s): {fault}", .session.attempt_count())]
    Aborted {
        fault: SessionFault,
        session: Box<TranslationSession>,
    },
}

impl SessionError {
    /// Partial trace of an aborted session, if there is one.
    pub fn partial_session(&self) -> Option<&TranslationSession> {
        match self {
            Self::Aborted { session, .. } => Some(session),
            Self::Configuration(_) => None,
        }
    }

    pub fn fault(&self) -> Option<&SessionFault> {
        match self {
            Self::Aborted { fault, .. } => Some(fault),
            Self::Configuration(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ExchangeKind;

    #[test]
    fn test_verifier_fault_is_environment_fault() {
        let fault = SessionFault::Verifier {
            iteration: 2,
            source: VerifierError::ToolchainNotFound {
                toolchain: PathBuf::from("g++-missing"),
            },
        };
        assert!(fault.is_environment_fault());
        assert_eq!(fault.kind(), FaultKind::VerifierEnvironment);
        assert_eq!(fault.iteration(), 2);
        assert!(fault.to_string().contains("g++-missing"));
    }

    #[test]
    fn test_generator_fault_is_not_environment_fault() {
        let fault = SessionFault::Generator {
            iteration: 0,
            source: GeneratorError::backend("connection refused"),
        };
        assert!(!fault.is_environment_fault());
        assert_eq!(fault.report().kind, FaultKind::Generator);
        assert!(fault.exchange().is_none());
    }

    #[test]
    fn test_no_extractable_code_keeps_exchange() {
        let exchange = Exchange::new(
            ExchangeKind::Repair,
            "fix it",
            "I cannot help with that.",
            "",
        );
        let fault = SessionFault::Generator {
            iteration: 1,
            source: GeneratorError::NoExtractableCode {
                exchange: Box::new(exchange),
            },
        };
        let kept = fault.exchange().unwrap();
        assert_eq!(kept.response, "I cannot help with that.");
        assert_eq!(kept.kind, ExchangeKind::Repair);
    }

    #[test]
    fn test_missing_slot_names_the_slot() {
        let err = ConfigError::MissingSlot {
            template: "repair",
            slot: "diagnostics",
        };
        assert_eq!(
            err.to_string(),
            "repair template is missing required slot {diagnostics}"
        );
    }

    #[test]
    fn test_timeout_messages_carry_duration() {
        let err = VerifierError::Timeout {
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30"));

        let err = GeneratorError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1.5"));
    }
}
