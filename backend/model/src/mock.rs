//! Scripted model client for tests.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use famulus_core::{FamulusError, ModelClient, ModelRequest, ModelResponse};

/// Returns a fixed sequence of canned responses, then repeats the last one.
/// Records every prompt it receives.
pub struct ScriptedModel {
    script: Vec<String>,
    cursor: Mutex<usize>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<String>) -> Self {
        Self {
            script,
            cursor: Mutex::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, in order.
    pub fn seen_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of generate calls made.
    pub fn calls(&self) -> usize {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.prompt.clone());
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let content = self
            .script
            .get(*cursor)
            .or_else(|| self.script.last())
            .cloned()
            .ok_or_else(|| FamulusError::Model("scripted model has no responses".into()))?;
        *cursor += 1;
        Ok(ModelResponse {
            content,
            model: request.model.clone(),
            tokens_used: 0,
            latency_ms: 0,
        })
    }
}
