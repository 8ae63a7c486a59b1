//! End-to-end tests for the correction loop using scripted collaborators.
//!
//! The backend and verifier replay fixed scripts so each test controls
//! exactly which attempts build.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use evaluation::{
    BuildOutcome, BuildVerifier, CompletionBackend, ConfigError, CorrectionLoop, ExchangeKind,
    FaultKind, GeneratorError, NgramScorer, SessionConfig, SessionError, SessionFault,
    TemplateGenerator, TerminalState, TranslationRequest, TranslationSession, VerifierError,
};
use tokio_util::sync::CancellationToken;

const FORTRAN: &str = "\
program sum_squares
  integer :: i, total
  total = 0
  do i = 1, 10
    total = total + i * i
  end do
  print *, total
end program sum_squares
";

const MISSING_SEMICOLON: &str = "main.cpp:5:18: error: expected ';' before '}' token";

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, GeneratorError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new<I>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Result<String, GeneratorError>>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Backend answering every call with a fenced candidate, in order.
    fn with_candidates(candidates: &[&str]) -> Arc<Self> {
        Self::new(candidates.iter().map(|c| Ok(fenced(c))))
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, prompt: &str) -> Result<String, GeneratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GeneratorError::backend("script exhausted")))
    }
}

struct ScriptedVerifier {
    outcomes: Mutex<VecDeque<Result<BuildOutcome, VerifierError>>>,
    seen: Mutex<Vec<String>>,
    /// Cancelled after the first verification, when set
    cancel_after_first: Option<CancellationToken>,
}

impl ScriptedVerifier {
    fn new<I>(outcomes: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Result<BuildOutcome, VerifierError>>,
    {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
            cancel_after_first: None,
        })
    }

    /// `true` = builds, `false` = rejected with a missing-semicolon error.
    fn builds(script: &[bool]) -> Arc<Self> {
        Self::new(script.iter().map(|&ok| Ok(outcome(ok))))
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl BuildVerifier for ScriptedVerifier {
    async fn verify(&self, source_artifact: &str) -> Result<BuildOutcome, VerifierError> {
        self.seen.lock().unwrap().push(source_artifact.to_string());
        if let Some(cancel) = &self.cancel_after_first {
            cancel.cancel();
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(outcome(false)))
    }
}

struct HangingBackend;

#[async_trait]
impl CompletionBackend for HangingBackend {
    fn model_id(&self) -> &str {
        "hanging-model"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, GeneratorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(fenced("int main() {}"))
    }
}

fn fenced(code: &str) -> String {
    format!("Here is the translation:\n```cpp\n{code}\n```\n")
}

fn outcome(builds: bool) -> BuildOutcome {
    if builds {
        BuildOutcome::passed(1)
    } else {
        BuildOutcome::failed(MISSING_SEMICOLON, Some(1), 1)
    }
}

fn request() -> TranslationRequest {
    TranslationRequest::new("sum_squares.f90", FORTRAN)
}

async fn run(
    backend: Arc<ScriptedBackend>,
    verifier: Arc<ScriptedVerifier>,
    config: SessionConfig,
) -> Result<TranslationSession, SessionError> {
    let generator = TemplateGenerator::new(backend);
    CorrectionLoop::new(verifier, config)
        .run(&generator, &request(), &CancellationToken::new())
        .await
}

fn assert_trace_invariants(session: &TranslationSession, max_repairs: u32) {
    assert_eq!(session.attempt_count(), session.repair_count() + 1);
    assert!(session.repair_count() <= max_repairs as usize);
    for (index, attempt) in session.attempts().iter().enumerate() {
        assert_eq!(attempt.iteration_index as usize, index);
        assert_eq!(attempt.diagnostics.is_none(), attempt.build_succeeded);
        assert_eq!(attempt.classified_errors.is_none(), attempt.build_succeeded);
        let expected_kind = if index == 0 {
            ExchangeKind::Initial
        } else {
            ExchangeKind::Repair
        };
        assert_eq!(attempt.exchange.kind, expected_kind);
    }
}

// ---------------------------------------------------------------------------
// Terminal states
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_initial_success_makes_no_repair_calls() {
    for max in [0, 1, 3, 10] {
        let backend = ScriptedBackend::with_candidates(&["int main() { return 0; }"]);
        let verifier = ScriptedVerifier::builds(&[true]);

        let session = run(
            backend.clone(),
            verifier.clone(),
            SessionConfig::default().with_max_repair_attempts(max),
        )
        .await
        .unwrap();

        assert_eq!(session.attempt_count(), 1);
        assert_eq!(session.terminal_state(), Some(TerminalState::Succeeded));
        assert_eq!(backend.calls(), 1);
        assert_eq!(verifier.calls(), 1);
        assert_trace_invariants(&session, max);
    }
}

#[tokio::test]
async fn test_zero_budget_failing_initial_is_exhausted() {
    let backend = ScriptedBackend::with_candidates(&["int main() { return 0 }"]);
    let verifier = ScriptedVerifier::builds(&[false]);

    let session = run(
        backend.clone(),
        verifier,
        SessionConfig::default().with_max_repair_attempts(0),
    )
    .await
    .unwrap();

    assert_eq!(session.attempt_count(), 1);
    assert_eq!(session.terminal_state(), Some(TerminalState::Exhausted));
    assert!(!session.compiles());
    assert_eq!(backend.calls(), 1);
    assert_trace_invariants(&session, 0);
}

#[tokio::test]
async fn test_feedback_disabled_makes_no_repair_calls() {
    let backend = ScriptedBackend::with_candidates(&["int main() { return 0 }", "unused"]);
    let verifier = ScriptedVerifier::builds(&[false]);

    let session = run(
        backend.clone(),
        verifier,
        SessionConfig::default().with_feedback(false),
    )
    .await
    .unwrap();

    assert_eq!(session.attempt_count(), 1);
    assert_eq!(session.terminal_state(), Some(TerminalState::Exhausted));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_one_repair_succeeds() {
    let backend = ScriptedBackend::with_candidates(&[
        "int main() { return 0 }",
        "int main() { return 0; }",
    ]);
    let verifier = ScriptedVerifier::builds(&[false, true]);

    let config = SessionConfig::default().with_max_repair_attempts(3);
    let session = run(backend.clone(), verifier, config).await.unwrap();

    assert_eq!(session.attempt_count(), 2);
    assert_eq!(session.terminal_state(), Some(TerminalState::Succeeded));
    assert!(!session.attempts()[0].build_succeeded);
    assert!(session.attempts()[1].build_succeeded);
    assert_eq!(session.repair_count(), 1);
    assert_eq!(backend.calls(), 2);
    assert_trace_invariants(&session, 3);
}

#[tokio::test]
async fn test_three_failed_repairs_exhaust_budget() {
    let backend = ScriptedBackend::with_candidates(&["v0", "v1", "v2", "v3", "never requested"]);
    let verifier = ScriptedVerifier::builds(&[false, false, false, false]);

    let config = SessionConfig::default().with_max_repair_attempts(3);
    let session = run(backend.clone(), verifier.clone(), config).await.unwrap();

    assert_eq!(session.attempt_count(), 4);
    assert_eq!(session.terminal_state(), Some(TerminalState::Exhausted));
    assert_eq!(backend.calls(), 4);
    assert_eq!(verifier.calls(), 4);
    assert_eq!(
        session.final_attempt().map(|a| a.source_artifact.as_str()),
        Some("v3")
    );
    assert_trace_invariants(&session, 3);
}

// ---------------------------------------------------------------------------
// Repair prompts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_repair_prompt_carries_previous_attempt() {
    let backend =
        ScriptedBackend::with_candidates(&["int main() { return 0 }", "int main() { return 0; }"]);
    let verifier = ScriptedVerifier::builds(&[false, true]);

    run(backend.clone(), verifier, SessionConfig::default())
        .await
        .unwrap();

    let repair_prompt = backend.prompt(1);
    assert!(repair_prompt.contains(MISSING_SEMICOLON));
    assert!(repair_prompt.contains("int main() { return 0 }"));
    assert!(repair_prompt.contains("program sum_squares"));
    assert!(repair_prompt.contains("Likely fixes:"));
}

#[tokio::test]
async fn test_repair_hints_can_be_disabled() {
    let backend = ScriptedBackend::with_candidates(&["a", "b"]);
    let verifier = ScriptedVerifier::builds(&[false, true]);

    run(backend.clone(), verifier, SessionConfig::default().with_repair_hints(false))
        .await
        .unwrap();

    let repair_prompt = backend.prompt(1);
    assert!(repair_prompt.contains(MISSING_SEMICOLON));
    assert!(!repair_prompt.contains("Likely fixes:"));
}

#[tokio::test]
async fn test_each_repair_uses_latest_diagnostics() {
    let backend = ScriptedBackend::with_candidates(&["first", "second", "third"]);
    let verifier = ScriptedVerifier::new([
        Ok(BuildOutcome::failed(
            "a.cpp:1:1: error: 'alpha' was not declared in this scope",
            Some(1),
            1,
        )),
        Ok(BuildOutcome::failed(
            "a.cpp:1:1: error: 'beta' was not declared in this scope",
            Some(1),
            1,
        )),
        Ok(BuildOutcome::passed(1)),
    ]);

    run(backend.clone(), verifier, SessionConfig::default())
        .await
        .unwrap();

    let second_repair = backend.prompt(2);
    assert!(second_repair.contains("'beta'"));
    assert!(!second_repair.contains("'alpha'"));
    assert!(second_repair.contains("second"));
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_final_result_is_last_attempt_not_best() {
    let reference =
        "int main() { int total = 0; for (int i = 1; i <= 10; ++i) total += i * i; return 0; }";
    // Attempt 0 matches the reference exactly but is rejected; the repair
    // builds yet differs. The reported result must still be the repair.
    let backend = ScriptedBackend::with_candidates(&[reference, "int main() { return 0; }"]);
    let verifier = ScriptedVerifier::builds(&[false, true]);
    let generator = TemplateGenerator::new(backend);

    let session = CorrectionLoop::new(verifier, SessionConfig::default())
        .with_scorer(Arc::new(NgramScorer::new()))
        .run(
            &generator,
            &request().with_reference(reference),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let first = session.attempts()[0].quality_score.unwrap();
    let last = session.final_score().unwrap();
    assert!((first - 1.0).abs() < 1e-9);
    assert!(last < first);
    assert_eq!(session.quality_delta(), Some(last - first));
    assert_eq!(
        session.report().final_translation.as_deref(),
        Some("int main() { return 0; }")
    );
}

#[tokio::test]
async fn test_scores_absent_without_reference() {
    let backend = ScriptedBackend::with_candidates(&["a", "b"]);
    let verifier = ScriptedVerifier::builds(&[false, true]);
    let generator = TemplateGenerator::new(backend);

    let session = CorrectionLoop::new(verifier, SessionConfig::default())
        .with_scorer(Arc::new(NgramScorer::new()))
        .run(&generator, &request(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(session.attempts().iter().all(|a| a.quality_score.is_none()));
    assert_eq!(session.quality_delta(), None);
}

#[tokio::test]
async fn test_missing_scorer_fails_before_any_call() {
    let backend = ScriptedBackend::with_candidates(&["a"]);
    let verifier = ScriptedVerifier::builds(&[true]);
    let generator = TemplateGenerator::new(backend.clone());

    let err = CorrectionLoop::new(verifier.clone(), SessionConfig::default())
        .run(
            &generator,
            &request().with_reference("int main() {}"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Configuration(ConfigError::ScorerUnavailable)
    ));
    assert_eq!(backend.calls(), 0);
    assert_eq!(verifier.calls(), 0);
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_generator_fault_keeps_partial_trace() {
    let backend = ScriptedBackend::new([
        Ok(fenced("v0")),
        Ok(fenced("v1")),
        Err(GeneratorError::backend("503 Service Unavailable")),
    ]);
    let verifier = ScriptedVerifier::builds(&[false, false]);

    let err = run(backend, verifier, SessionConfig::default())
        .await
        .unwrap_err();

    let session = err.partial_session().unwrap();
    assert_eq!(session.attempt_count(), 2);
    assert_eq!(session.terminal_state(), Some(TerminalState::Aborted));
    assert_eq!(session.fault().map(|f| f.kind), Some(FaultKind::Generator));
    assert_eq!(session.fault().map(|f| f.iteration), Some(2));
    assert!(!err.fault().unwrap().is_environment_fault());
    assert_trace_invariants(session, 3);
}

#[tokio::test]
async fn test_empty_completion_aborts_session() {
    let backend = ScriptedBackend::new([Ok("   ".to_string())]);
    let verifier = ScriptedVerifier::builds(&[true]);

    let err = run(backend, verifier.clone(), SessionConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err.fault(),
        Some(SessionFault::Generator {
            iteration: 0,
            source: GeneratorError::NoExtractableCode { .. }
        })
    ));
    assert_eq!(verifier.calls(), 0);

    // The reply that produced nothing stays on the partial trace.
    let session = err.partial_session().unwrap();
    assert_eq!(session.attempt_count(), 0);
    let rejected = session.rejected_exchange().unwrap();
    assert_eq!(rejected.response, "   ");
    assert_eq!(rejected.kind, ExchangeKind::Initial);
    assert!(rejected.prompt.contains("program sum_squares"));

    let json = serde_json::to_value(session.report()).unwrap();
    assert_eq!(json["rejected_exchange"]["response"], "   ");
}

#[tokio::test]
async fn test_verifier_fault_is_distinct_from_build_failure() {
    let backend = ScriptedBackend::with_candidates(&["v0", "v1"]);
    let verifier = ScriptedVerifier::new([
        Ok(outcome(false)),
        Err(VerifierError::ToolchainNotFound {
            toolchain: PathBuf::from("g++-13"),
        }),
    ]);

    let err = run(backend, verifier, SessionConfig::default())
        .await
        .unwrap_err();

    let fault = err.fault().unwrap();
    assert!(fault.is_environment_fault());
    assert_eq!(fault.iteration(), 1);

    let session = err.partial_session().unwrap();
    assert_eq!(session.attempt_count(), 1);
    assert_eq!(
        session.report().fault.map(|f| f.kind),
        Some(FaultKind::VerifierEnvironment)
    );
}

#[tokio::test]
async fn test_cancellation_between_iterations() {
    let cancel = CancellationToken::new();
    let backend = ScriptedBackend::with_candidates(&["v0", "v1"]);
    let verifier = Arc::new(ScriptedVerifier {
        outcomes: Mutex::new([Ok(outcome(false))].into_iter().collect()),
        seen: Mutex::new(Vec::new()),
        cancel_after_first: Some(cancel.clone()),
    });
    let generator = TemplateGenerator::new(backend.clone());

    let err = CorrectionLoop::new(verifier, SessionConfig::default())
        .run(&generator, &request(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err.fault(), Some(SessionFault::Cancelled { iteration: 1 })));
    assert_eq!(err.partial_session().unwrap().attempt_count(), 1);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_generation_times_out() {
    let generator = TemplateGenerator::new(Arc::new(HangingBackend));
    let verifier = ScriptedVerifier::builds(&[true]);
    let config = SessionConfig::default().with_generation_timeout(Duration::from_secs(30));

    let err = CorrectionLoop::new(verifier.clone(), config)
        .run(&generator, &request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err.fault(),
        Some(SessionFault::Generator {
            source: GeneratorError::Timeout { .. },
            ..
        })
    ));
    assert_eq!(verifier.calls(), 0);
}

// ---------------------------------------------------------------------------
// Concurrency and export
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let controller = Arc::new(CorrectionLoop::new(
        ScriptedVerifier::new((0..8).map(|_| Ok(outcome(true)))),
        SessionConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            let candidate = format!("// unit {i}");
            let backend = ScriptedBackend::with_candidates(&[candidate.as_str()]);
            let generator = TemplateGenerator::new(backend);
            let request = TranslationRequest::new(format!("unit-{i}"), FORTRAN);
            controller
                .run(&generator, &request, &CancellationToken::new())
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let session = handle.await.unwrap();
        assert_eq!(session.unit_id, format!("unit-{i}"));
        assert_eq!(session.attempts()[0].source_artifact, format!("// unit {i}"));
        ids.push(session.session_id.clone());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn test_session_report_export() {
    let backend =
        ScriptedBackend::with_candidates(&["int main() { return 0 }", "int main() { return 0; }"]);
    let verifier = ScriptedVerifier::builds(&[false, true]);

    let session = run(backend, verifier, SessionConfig::default()).await.unwrap();
    let json = serde_json::to_value(session.report()).unwrap();

    assert_eq!(json["model_id"], "scripted-model");
    assert_eq!(json["unit_id"], "sum_squares.f90");
    assert_eq!(json["terminal_state"], "succeeded");
    assert_eq!(json["compiles"], true);
    assert_eq!(json["repair_count"], 1);
    assert_eq!(json["attempts"].as_array().unwrap().len(), 2);
    assert_eq!(json["attempts"][0]["exchange"]["kind"], "initial");
    assert_eq!(json["attempts"][1]["exchange"]["kind"], "repair");
    assert_eq!(
        json["attempts"][0]["classified_errors"]["by_category"]["missing_terminator"],
        1
    );
    assert!(json["attempts"][1].get("diagnostics").is_none());
}
