use anyhow::Result;
use async_trait::async_trait;

/// Trait for the local model service used by the tool-use loop.
///
/// A generation call is the only model-side operation Famulus needs: the loop
/// assembles the full prompt (system instructions + conversation) itself.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Client name (e.g., "ollama").
    fn name(&self) -> &str;

    /// Send a generation request and return the raw response text.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

/// Request to the model service.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    /// Full prompt including any system instructions.
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// Response from the model service.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
    pub latency_ms: u64,
}
