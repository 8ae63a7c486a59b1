//! OpenAI-compatible chat-completions backend (hosted APIs, vLLM, LiteLLM).

use std::time::Duration;

use async_trait::async_trait;
use evaluation::{CompletionBackend, GeneratorError};

use super::{ensure_success, http_client, request_error, trim_base_url};
use crate::config::{ApiEndpoint, GenerationSettings};

const SYSTEM_PROMPT: &str = "You are an expert in both Fortran and modern C++. \
You translate scientific code faithfully and answer with complete, compilable programs.";

pub struct ChatCompletionsBackend {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl ChatCompletionsBackend {
    pub fn new(api: &ApiEndpoint, settings: &GenerationSettings) -> Result<Self, GeneratorError> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        Ok(Self {
            endpoint: format!("{}/chat/completions", trim_base_url(&api.url)),
            api_key: api.api_key.clone(),
            model: api.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout,
            client: http_client(timeout)?,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        })
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
pub fn parse_response(resp_json: &serde_json::Value) -> Result<String, GeneratorError> {
    if let Some(message) = resp_json["error"]["message"].as_str() {
        return Err(GeneratorError::backend(message.to_string()));
    }
    resp_json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GeneratorError::malformed("missing choices[0].message.content"))
}

#[async_trait]
impl CompletionBackend for ChatCompletionsBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, GeneratorError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let start = std::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;
        let response = ensure_success(response, "Chat completions API").await?;

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeneratorError::malformed(e.to_string()))?;
        let content = parse_response(&resp_json)?;

        tracing::debug!(
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "chat completion received"
        );
        Ok(content)
    }
}
