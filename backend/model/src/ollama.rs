use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use famulus_core::{FamulusError, ModelClient, ModelRequest, ModelResponse};

/// Ollama local model client.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    eval_count: Option<u64>,
    prompt_eval_count: Option<u64>,
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let start = Instant::now();

        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!(model = %request.model, "sending generate request to Ollama");

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let detail = if e.is_timeout() {
                    format!("request timed out after {:?}", self.timeout)
                } else {
                    format!("request failed: {e}")
                };
                FamulusError::Model(detail)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(FamulusError::Model(format!("Ollama returned {status}: {error_body}")).into());
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| FamulusError::Model(format!("unparseable Ollama response: {e}")))?;

        let tokens_used =
            generated.eval_count.unwrap_or(0) + generated.prompt_eval_count.unwrap_or(0);

        Ok(ModelResponse {
            content: generated.response,
            model: request.model.clone(),
            tokens_used,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_service_is_a_model_error() {
        let client = OllamaClient::new()
            .with_base_url("http://127.0.0.1:59998")
            .with_timeout(Duration::from_millis(300));
        let err = client
            .generate(&ModelRequest::new("llama3", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FamulusError>(),
            Some(FamulusError::Model(_))
        ));
    }
}
