//! Concrete completion backends.
//!
//! Each backend implements `evaluation::CompletionBackend`; the correction
//! loop only ever sees the trait object, never a concrete backend type.

pub mod llama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use evaluation::{CompletionBackend, GeneratorError};

use crate::config::{BackendKind, RunnerConfig};

pub use llama::LlamaServerBackend;
pub use openai::ChatCompletionsBackend;

/// Build the backend selected by `config.backend`.
pub fn from_config(config: &RunnerConfig) -> Result<Arc<dyn CompletionBackend>, GeneratorError> {
    let backend: Arc<dyn CompletionBackend> = match config.backend {
        BackendKind::Api => Arc::new(ChatCompletionsBackend::new(&config.api, &config.generation)?),
        BackendKind::Local => Arc::new(LlamaServerBackend::new(&config.local, &config.generation)?),
    };
    Ok(backend)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, GeneratorError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GeneratorError::backend(format!("Failed to create HTTP client: {e}")))
}

/// Map a transport error, keeping timeouts distinguishable.
fn request_error(e: reqwest::Error, timeout: Duration) -> GeneratorError {
    if e.is_timeout() {
        GeneratorError::Timeout { timeout }
    } else {
        GeneratorError::backend(e.to_string())
    }
}

/// Turn a non-2xx response into a backend error carrying the body.
async fn ensure_success(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, GeneratorError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(GeneratorError::backend(format!(
        "{provider} error ({status}): {body}"
    )))
}

fn trim_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
