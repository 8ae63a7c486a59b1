//! Compile-feedback evaluation of model-generated code translations.
//!
//! A session asks a model for a translation, builds it, and when the build
//! fails feeds the compiler diagnostics back for repair. Every attempt is
//! recorded with its prompt, response, build outcome, classified errors and
//! optional similarity score against a reference translation.
//!
//! ```text
//! CorrectionLoop::run
//!   ├── CodeGenerator      (generator)       prompt → candidate
//!   ├── BuildVerifier      (feedback)        candidate → pass / diagnostics
//!   ├── DiagnosticClassifier                 diagnostics → categories
//!   └── QualityScorer      (scoring)         reference × candidate → [0, 1]
//! ```

pub mod error;
pub mod feedback;
pub mod generator;
pub mod scoring;

pub use error::{
    ConfigError, FaultKind, FaultReport, GeneratorError, SessionError, SessionFault, VerifierError,
};
pub use feedback::{
    BuildOutcome, BuildVerifier, ClassificationReport, CompilerConfig, CompilerVerifier,
    CorrectionLoop, DiagnosticClassifier, ErrorCategory, SessionConfig, SessionReport,
    TerminalState, TranslationAttempt, TranslationRequest, TranslationSession,
};
pub use generator::prompts::{
    InitialTemplate, RepairTemplate, CUSTOM_PROMPT_VERSION, PROMPT_VERSION,
};
pub use generator::{
    CodeGenerator, CompletionBackend, Exchange, ExchangeKind, Generation, TemplateGenerator,
};
pub use scoring::{NgramScorer, QualityScorer};
