//! llama.cpp server backend (`POST /completion`).

use std::time::Duration;

use async_trait::async_trait;
use evaluation::{CompletionBackend, GeneratorError};

use super::{ensure_success, http_client, request_error, trim_base_url};
use crate::config::{GenerationSettings, LocalEndpoint};

pub struct LlamaServerBackend {
    endpoint: String,
    model: String,
    temperature: f32,
    n_predict: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlamaServerBackend {
    pub fn new(
        local: &LocalEndpoint,
        settings: &GenerationSettings,
    ) -> Result<Self, GeneratorError> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        Ok(Self {
            endpoint: format!("{}/completion", trim_base_url(&local.url)),
            model: local.model.clone(),
            temperature: settings.temperature,
            n_predict: settings.max_tokens,
            timeout,
            client: http_client(timeout)?,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "prompt": prompt,
            "n_predict": self.n_predict,
            "temperature": self.temperature,
            "cache_prompt": true
        })
    }
}

/// Pull `content` out of a `/completion` response.
pub fn parse_response(resp_json: &serde_json::Value) -> Result<String, GeneratorError> {
    resp_json["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GeneratorError::malformed("missing content field"))
}

#[async_trait]
impl CompletionBackend for LlamaServerBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, GeneratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;
        let response = ensure_success(response, "llama.cpp server").await?;

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeneratorError::malformed(e.to_string()))?;

        if resp_json["stopped_limit"].as_bool() == Some(true) {
            tracing::warn!(
                model = %self.model,
                n_predict = self.n_predict,
                "completion hit the token limit, code may be truncated"
            );
        }
        parse_response(&resp_json)
    }
}
