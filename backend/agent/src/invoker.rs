//! Plugin invocation over HTTP.
//!
//! The `PluginInvoker` trait is the seam between the tool-use loop and
//! whatever actually executes a plugin call. In production that is the
//! orchestrator, which resolves the plugin to a local port and delegates to
//! `HttpInvoker`; tests substitute a scripted implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use famulus_core::{FamulusError, InvocationErrorKind};

/// Executes one plugin call and returns the plugin's result payload.
#[async_trait]
pub trait PluginInvoker: Send + Sync {
    async fn invoke(&self, plugin_id: &str, input: &Value) -> Result<Value, FamulusError>;
}

/// HTTP client for the plugin invocation endpoint.
///
/// Plugins expose `POST /api/invoke` on their declared local port and answer
/// with `{"response": <payload>}` on success or `{"error": <message>}` on
/// failure.
pub struct HttpInvoker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Call a plugin at `port`. Failure categories map onto
    /// `InvocationErrorKind` so follow-up prompts can describe them without
    /// leaking transport details.
    pub async fn call(
        &self,
        plugin_id: &str,
        port: u16,
        input: &Value,
    ) -> Result<Value, FamulusError> {
        let url = format!("http://127.0.0.1:{port}/api/invoke");
        debug!(plugin = %plugin_id, %url, "invoking plugin");

        let invocation_err = |kind, message: String| FamulusError::Invocation {
            plugin: plugin_id.to_string(),
            kind,
            message,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({ "plugin": plugin_id, "input": input }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    invocation_err(
                        InvocationErrorKind::Timeout,
                        format!("no response within {:?}", self.timeout),
                    )
                } else {
                    invocation_err(InvocationErrorKind::Connection, e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| invocation_err(InvocationErrorKind::BadResponse, e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(invocation_err(InvocationErrorKind::Http, message));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|e| {
            invocation_err(InvocationErrorKind::BadResponse, format!("invalid JSON: {e}"))
        })?;
        if let Some(error) = parsed.get("error").and_then(Value::as_str) {
            return Err(invocation_err(InvocationErrorKind::Http, error.to_string()));
        }
        Ok(parsed.get("response").cloned().unwrap_or(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unreachable_port_is_a_connection_error() {
        let invoker = HttpInvoker::new(Duration::from_millis(300));
        let err = invoker
            .call("web-search", 59997, &json!({"query": "rust"}))
            .await
            .unwrap_err();
        match err {
            FamulusError::Invocation { plugin, kind, .. } => {
                assert_eq!(plugin, "web-search");
                assert!(matches!(
                    kind,
                    InvocationErrorKind::Connection | InvocationErrorKind::Timeout
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
