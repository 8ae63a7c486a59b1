use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use evaluation::{
    BuildVerifier, CompilerVerifier, CorrectionLoop, DiagnosticClassifier, NgramScorer,
    SessionError, TemplateGenerator, TerminalState, TranslationRequest,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xlate_runner::{backends, BackendKind, RunnerConfig};

/// Compile-feedback code translation runner
#[derive(Debug, Parser)]
#[command(name = "xlate-runner", version)]
struct Cli {
    /// TOML configuration file (overrides XLATE_* environment defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Translate source files, repairing build failures with compiler feedback
    Translate(TranslateArgs),
    /// Classify compiler diagnostics read from a file, or `-` for stdin
    Classify { input: PathBuf },
    /// Build one candidate file with the configured toolchain
    Verify { file: PathBuf },
}

#[derive(Debug, Args)]
struct TranslateArgs {
    /// Source files, one session each
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Model name for the selected backend
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    max_repairs: Option<u32>,

    /// Report the initial translation only
    #[arg(long)]
    no_feedback: bool,

    /// Skip quality scoring even when references exist
    #[arg(long)]
    no_score: bool,

    /// Directory of reference translations named `<stem>.cpp`
    #[arg(long)]
    reference_dir: Option<PathBuf>,

    /// Maximum sessions in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write the JSON reports here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl TranslateArgs {
    fn apply(&self, config: &mut RunnerConfig) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(model) = &self.model {
            match config.backend {
                BackendKind::Api => config.api.model = model.clone(),
                BackendKind::Local => config.local.model = model.clone(),
            }
        }
        if let Some(max) = self.max_repairs {
            config.session.max_repair_attempts = max;
        }
        if self.no_feedback {
            config.session.feedback_enabled = false;
        }
        if self.no_score {
            config.session.score_against_reference = false;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency.max(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = RunnerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Translate(args) => {
            args.apply(&mut config);
            translate(config, args).await
        }
        Command::Classify { input } => classify(&input),
        Command::Verify { file } => verify(&config, &file).await,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };
    // stdout carries the JSON reports
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn translate(config: RunnerConfig, args: TranslateArgs) -> Result<ExitCode> {
    let (initial, repair) = config.load_templates()?;
    let backend = backends::from_config(&config).context("Failed to set up model backend")?;
    let generator = Arc::new(TemplateGenerator::new(backend).with_extractor(config.extractor()));
    let controller = Arc::new(
        CorrectionLoop::new(
            Arc::new(CompilerVerifier::new(config.compiler.clone())),
            config.session.clone(),
        )
        .with_scorer(Arc::new(NgramScorer::new()))
        .with_templates(initial, repair),
    );

    info!(
        backend = ?config.backend,
        model = config.model_id(),
        toolchain = %config.compiler.toolchain.display(),
        files = args.files.len(),
        concurrency = config.concurrency,
        "translation run starting"
    );

    let requests = load_requests(&args.files, args.reference_dir.as_deref()).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut handles = Vec::with_capacity(requests.len());
    for request in requests {
        let generator = generator.clone();
        let controller = controller.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            let outcome = controller.run(generator.as_ref(), &request, &cancel).await;
            anyhow::Ok(outcome)
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    let mut aborted = 0usize;
    for handle in handles {
        match handle.await.context("Session task panicked")?? {
            Ok(session) => reports.push(session.report()),
            Err(SessionError::Aborted { fault, session }) => {
                aborted += 1;
                warn!(
                    unit = %session.unit_id,
                    kind = %fault.kind(),
                    error = %fault,
                    "session aborted"
                );
                reports.push(session.report());
            }
            Err(err @ SessionError::Configuration(_)) => return Err(err.into()),
        }
    }

    let succeeded = reports
        .iter()
        .filter(|r| r.terminal_state == Some(TerminalState::Succeeded))
        .count();
    info!(
        sessions = reports.len(),
        succeeded,
        aborted,
        "translation run finished"
    );

    let json = serde_json::to_string_pretty(&reports)?;
    match &args.output {
        Some(path) => tokio::fs::write(path, json)
            .await
            .context(format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(if aborted == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// Read every input up front. A bad path fails the run before any session
/// starts, so no session is left running with its report discarded.
async fn load_requests(
    files: &[PathBuf],
    reference_dir: Option<&Path>,
) -> Result<Vec<TranslationRequest>> {
    let mut requests = Vec::with_capacity(files.len());
    for path in files {
        requests.push(load_request(path, reference_dir).await?);
    }
    Ok(requests)
}

/// Read a source unit and its reference translation, if one exists.
async fn load_request(path: &Path, reference_dir: Option<&Path>) -> Result<TranslationRequest> {
    let source = tokio::fs::read_to_string(path)
        .await
        .context(format!("Failed to read {}", path.display()))?;
    let unit_id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut request = TranslationRequest::new(unit_id, source);

    if let (Some(dir), Some(stem)) = (reference_dir, path.file_stem()) {
        let reference_path = dir.join(format!("{}.cpp", stem.to_string_lossy()));
        match tokio::fs::read_to_string(&reference_path).await {
            Ok(reference) => request = request.with_reference(reference),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %reference_path.display(), "no reference translation");
            }
            Err(e) => {
                return Err(e).context(format!("Failed to read {}", reference_path.display()));
            }
        }
    }
    Ok(request)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, stopping sessions before their next attempt");
        cancel.cancel();
    }
}

fn classify(input: &Path) -> Result<ExitCode> {
    let text = if input == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read diagnostics from stdin")?;
        text
    } else {
        std::fs::read_to_string(input).context(format!("Failed to read {}", input.display()))?
    };

    let report = DiagnosticClassifier::new().classify(&text);
    info!(summary = %report.summary(), "diagnostics classified");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

async fn verify(config: &RunnerConfig, file: &Path) -> Result<ExitCode> {
    let source = tokio::fs::read_to_string(file)
        .await
        .context(format!("Failed to read {}", file.display()))?;

    let outcome = CompilerVerifier::new(config.compiler.clone())
        .verify(&source)
        .await
        .context("Build verifier could not run")?;
    info!(success = outcome.success, duration_ms = outcome.duration_ms, "build finished");
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
