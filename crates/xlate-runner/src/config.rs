//! Runtime configuration for the runner.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (applied by `main`)
//! 2. Values in the `--config` TOML file
//! 3. Environment variables (`XLATE_*`)
//! 4. Built-in defaults
//!
//! | Variable            | Field                | Default                     |
//! |---------------------|----------------------|-----------------------------|
//! | `XLATE_API_URL`     | `api.url`            | `https://api.openai.com/v1` |
//! | `XLATE_API_KEY`     | `api.api_key`        | unset                       |
//! | `XLATE_MODEL`       | `api.model`          | `gpt-4o`                    |
//! | `XLATE_LOCAL_URL`   | `local.url`          | `http://localhost:8080`     |
//! | `XLATE_LOCAL_MODEL` | `local.model`        | `codellama-13b-instruct`    |
//! | `XLATE_COMPILER`    | `compiler.toolchain` | `g++`                       |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use evaluation::generator::extract::{CodeExtractor, CPP_TAGS};
use evaluation::{CompilerConfig, InitialTemplate, RepairTemplate, SessionConfig};
use serde::{Deserialize, Serialize};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_MODEL: &str = "gpt-4o";
const DEFAULT_LOCAL_URL: &str = "http://localhost:8080";
const DEFAULT_LOCAL_MODEL: &str = "codellama-13b-instruct";
const DEFAULT_CONCURRENCY: usize = 4;

const ENV_API_URL: &str = "XLATE_API_URL";
const ENV_API_KEY: &str = "XLATE_API_KEY";
const ENV_MODEL: &str = "XLATE_MODEL";
const ENV_LOCAL_URL: &str = "XLATE_LOCAL_URL";
const ENV_LOCAL_MODEL: &str = "XLATE_LOCAL_MODEL";
const ENV_COMPILER: &str = "XLATE_COMPILER";

/// Which completion backend a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Hosted OpenAI-compatible chat-completions API
    Api,
    /// Local llama.cpp-style inference server
    Local,
}

/// Hosted chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    /// Base URL including the version prefix, e.g. `https://api.openai.com/v1`
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
}

/// Local inference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEndpoint {
    pub url: String,
    /// Label recorded on sessions; the server decides which weights it serves
    pub model: String,
}

/// Sampling and transport settings shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 2048,
            request_timeout_secs: 120,
        }
    }
}

/// Optional template file overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatePaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<PathBuf>,
    /// Version recorded for file templates (`custom` when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Top-level runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub backend: BackendKind,
    /// Maximum sessions in flight at once
    pub concurrency: usize,
    /// Fence tags accepted as the target language when extracting code
    pub language_tags: Vec<String>,
    pub api: ApiEndpoint,
    pub local: LocalEndpoint,
    pub generation: GenerationSettings,
    pub compiler: CompilerConfig,
    pub session: SessionConfig,
    pub templates: TemplatePaths,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl RunnerConfig {
    /// Build defaults from an environment lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let compiler = match lookup(ENV_COMPILER) {
            Some(toolchain) => CompilerConfig::default().with_toolchain(toolchain),
            None => CompilerConfig::default(),
        };

        Self {
            backend: BackendKind::Api,
            concurrency: DEFAULT_CONCURRENCY,
            language_tags: CPP_TAGS.iter().map(|t| t.to_string()).collect(),
            api: ApiEndpoint {
                url: lookup(ENV_API_URL).unwrap_or_else(|| DEFAULT_API_URL.into()),
                api_key: lookup(ENV_API_KEY).filter(|k| !k.is_empty()),
                model: lookup(ENV_MODEL).unwrap_or_else(|| DEFAULT_API_MODEL.into()),
            },
            local: LocalEndpoint {
                url: lookup(ENV_LOCAL_URL).unwrap_or_else(|| DEFAULT_LOCAL_URL.into()),
                model: lookup(ENV_LOCAL_MODEL).unwrap_or_else(|| DEFAULT_LOCAL_MODEL.into()),
            },
            generation: GenerationSettings::default(),
            compiler,
            session: SessionConfig::default(),
            templates: TemplatePaths::default(),
        }
    }

    /// Environment defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        match path {
            Some(path) => defaults.overlay_file(path),
            None => Ok(defaults),
        }
    }

    /// Overlay a TOML file on top of `self`. Keys absent from the file keep
    /// their current values. Relative template paths resolve against the
    /// file's directory.
    pub fn overlay_file(self, path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let mut config = self
            .overlay_toml(&content)
            .context(format!("Failed to parse config {}", path.display()))?;

        if let Some(base) = path.parent() {
            for template in [&mut config.templates.initial, &mut config.templates.repair] {
                if let Some(p) = template.as_mut() {
                    if p.is_relative() {
                        *p = base.join(&*p);
                    }
                }
            }
        }
        Ok(config)
    }

    /// Overlay TOML text on top of `self`.
    pub fn overlay_toml(self, content: &str) -> Result<Self> {
        let overrides: toml::Table = toml::from_str(content).context("Invalid TOML")?;
        let mut merged = toml::Value::try_from(&self).context("Failed to serialize defaults")?;
        merge(&mut merged, toml::Value::Table(overrides));
        let config = Self::deserialize(merged).context("Invalid configuration value")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.concurrency > 0, "concurrency must be at least 1");
        anyhow::ensure!(
            !self.language_tags.is_empty(),
            "language_tags must name at least one fence tag"
        );
        anyhow::ensure!(
            self.generation.request_timeout_secs > 0,
            "generation.request_timeout_secs must be at least 1"
        );
        anyhow::ensure!(
            self.compiler.timeout_secs > 0,
            "compiler.timeout_secs must be at least 1"
        );
        anyhow::ensure!(
            self.session.generation_timeout_secs > 0,
            "session.generation_timeout_secs must be at least 1"
        );
        Ok(())
    }

    /// Model label for the selected backend.
    pub fn model_id(&self) -> &str {
        match self.backend {
            BackendKind::Api => &self.api.model,
            BackendKind::Local => &self.local.model,
        }
    }

    pub fn extractor(&self) -> CodeExtractor {
        CodeExtractor::new(&self.language_tags)
    }

    /// Read and validate the prompt templates. Missing files fall back to
    /// the built-in templates; a template lacking a required slot is an error.
    pub fn load_templates(&self) -> Result<(InitialTemplate, RepairTemplate)> {
        let mut initial = match &self.templates.initial {
            Some(path) => InitialTemplate::new(read_template(path)?)
                .context(format!("Invalid initial template {}", path.display()))?,
            None => InitialTemplate::default(),
        };
        let mut repair = match &self.templates.repair {
            Some(path) => RepairTemplate::new(read_template(path)?)
                .context(format!("Invalid repair template {}", path.display()))?,
            None => RepairTemplate::default(),
        };

        if let Some(version) = &self.templates.version {
            if self.templates.initial.is_some() {
                initial = initial.with_version(version.as_str());
            }
            if self.templates.repair.is_some() {
                repair = repair.with_version(version.as_str());
            }
        }
        Ok((initial, repair))
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).context(format!("Failed to read template {}", path.display()))
}

/// Recursive merge: tables merge key by key, anything else is replaced.
fn merge(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, value) => *base = value,
    }
}
