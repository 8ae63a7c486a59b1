//! Build verification for candidate translations
//!
//! Writes each candidate into its own temporary directory, runs the
//! configured toolchain over it, and reports pass/fail with the raw
//! diagnostics. A candidate that does not compile is a normal result;
//! only a toolchain that cannot answer is an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use crate::error::VerifierError;

/// Default flags: C++17, all warnings, warnings are errors.
pub const DEFAULT_FLAGS: &[&str] = &["-std=c++17", "-Wall", "-Werror"];

/// Verifies that a candidate artifact builds.
#[async_trait]
pub trait BuildVerifier: Send + Sync {
    /// Build `source_artifact` and report the outcome.
    ///
    /// # Errors
    ///
    /// Returns `VerifierError` only for environment faults (missing
    /// toolchain, launch failure, timeout). A rejected candidate is
    /// `Ok(BuildOutcome { success: false, .. })`.
    async fn verify(&self, source_artifact: &str) -> Result<BuildOutcome, VerifierError>;
}

/// Outcome of one build attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Whether the build command exited with status zero
    pub success: bool,
    /// Empty on success. On failure, the error-stream text; if that is
    /// blank, stdout, and if both are blank, a line naming the exit status
    pub diagnostics: String,
    /// Exit code if the process exited normally
    pub exit_code: Option<i32>,
    /// Wall-clock build time
    pub duration_ms: u64,
}

impl BuildOutcome {
    pub fn passed(duration_ms: u64) -> Self {
        Self {
            success: true,
            diagnostics: String::new(),
            exit_code: Some(0),
            duration_ms,
        }
    }

    pub fn failed(
        diagnostics: impl Into<String>,
        exit_code: Option<i32>,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: false,
            diagnostics: diagnostics.into(),
            exit_code,
            duration_ms,
        }
    }
}

/// Compiler invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Toolchain binary (name on `PATH` or absolute path)
    pub toolchain: PathBuf,
    /// Flags placed before `-o <output> <input>`
    pub flags: Vec<String>,
    /// Extension for the written source file
    pub source_extension: String,
    /// Upper bound on a single build
    pub timeout_secs: u64,
    /// Parent directory for per-build scratch dirs (system temp dir if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            toolchain: PathBuf::from("g++"),
            flags: DEFAULT_FLAGS.iter().map(|f| f.to_string()).collect(),
            source_extension: "cpp".to_string(),
            timeout_secs: 60,
            scratch_root: None,
        }
    }
}

impl CompilerConfig {
    pub fn with_toolchain(mut self, toolchain: impl Into<PathBuf>) -> Self {
        self.toolchain = toolchain.into();
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_scratch_root(mut self, root: impl AsRef<Path>) -> Self {
        self.scratch_root = Some(root.as_ref().to_path_buf());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Runs an external compiler over each candidate.
pub struct CompilerVerifier {
    config: CompilerConfig,
    timeout: Duration,
}

impl CompilerVerifier {
    pub fn new(config: CompilerConfig) -> Self {
        let timeout = config.timeout();
        Self { config, timeout }
    }

    /// Override the build timeout at sub-second precision.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Create a uniquely named scratch directory for one invocation.
    ///
    /// The returned guard deletes the directory and everything in it
    /// (source file and binary) when dropped, on every exit path.
    fn scratch_dir(&self) -> Result<tempfile::TempDir, VerifierError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("xlate-build-");
        let dir = match &self.config.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Run the toolchain with the configured timeout.
    ///
    /// On Unix the child runs in its own process group, detached from
    /// terminal signals aimed at the runner. `kill_on_drop` kills the
    /// driver when the timeout fires.
    async fn run_with_timeout(
        &self,
        cmd: &mut tokio::process::Command,
    ) -> Result<std::process::Output, VerifierError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VerifierError::ToolchainNotFound {
                toolchain: self.config.toolchain.clone(),
            },
            _ => VerifierError::Launch {
                toolchain: self.config.toolchain.clone(),
                source: e,
            },
        })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(VerifierError::Launch {
                toolchain: self.config.toolchain.clone(),
                source: e,
            }),
            Err(_) => Err(VerifierError::Timeout {
                timeout: self.timeout,
            }),
        }
    }

    /// Failure diagnostics are never empty: fall back to stdout, then to
    /// a synthesized status line.
    fn failure_diagnostics(output: &std::process::Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return stderr.into_owned();
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            return stdout.into_owned();
        }
        match output.status.code() {
            Some(code) => format!("build command exited with status {code} and no output"),
            None => "build command terminated by signal with no output".to_string(),
        }
    }
}

#[async_trait]
impl BuildVerifier for CompilerVerifier {
    async fn verify(&self, source_artifact: &str) -> Result<BuildOutcome, VerifierError> {
        let start = Instant::now();
        let scratch = self.scratch_dir()?;

        let input = scratch
            .path()
            .join(format!("candidate.{}", self.config.source_extension));
        let output_path = scratch.path().join("candidate.out");
        tokio::fs::write(&input, source_artifact).await?;

        let mut cmd = tokio::process::Command::new(&self.config.toolchain);
        cmd.args(&self.config.flags)
            .arg("-o")
            .arg(&output_path)
            .arg(&input)
            .current_dir(scratch.path());

        let output = self.run_with_timeout(&mut cmd).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        // Remove the workspace before reporting, on error paths too.
        drop(scratch);
        let output = output?;

        if output.status.success() {
            tracing::debug!(duration_ms, "candidate built");
            Ok(BuildOutcome::passed(duration_ms))
        } else {
            let diagnostics = Self::failure_diagnostics(&output);
            tracing::debug!(
                duration_ms,
                exit_code = ?output.status.code(),
                bytes = diagnostics.len(),
                "candidate rejected by build"
            );
            Ok(BuildOutcome::failed(
                diagnostics,
                output.status.code(),
                duration_ms,
            ))
        }
    }
}
