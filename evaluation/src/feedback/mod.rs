//! Compile-feedback translation loop
//!
//! - Build each candidate in an isolated workspace and capture diagnostics
//! - Classify diagnostics into coarse error categories
//! - Feed failures back to the model until a candidate builds or the
//!   repair budget is spent
//!
//! # Architecture
//!
//! ```text
//! Source → Generator → BuildVerifier → DiagnosticClassifier → Repair prompt
//!              ↑                                                  |
//!              └──────────────────────────────────────────────────┘
//! ```

pub mod compiler;
pub mod correction_loop;
pub mod error_parser;
pub mod types;

pub use compiler::{BuildOutcome, BuildVerifier, CompilerConfig, CompilerVerifier};
pub use correction_loop::{CorrectionLoop, SessionConfig, TranslationRequest};
pub use error_parser::{
    ClassificationReport, ClassifiedFinding, DiagnosticClassifier, ErrorCategory,
};
pub use types::{SessionReport, TerminalState, TranslationAttempt, TranslationSession};
