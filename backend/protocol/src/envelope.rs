//! The response envelope — the only two shapes the model may emit.
//!
//! Wire format:
//! `{"action":"message","content":{"text":...,"markdown":...}}` or
//! `{"action":"plugin_invoke","content":{"plugin":...,"input":{...},"reason":...}}`.
//! Anything else is a protocol error, not a third variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use famulus_core::ProtocolErrorKind;

use crate::violation::{ProtocolViolation, ViolationDetail};

/// Validated model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "content", rename_all = "snake_case")]
pub enum ResponseEnvelope {
    Message(MessageContent),
    PluginInvoke(InvokeContent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
    #[serde(default)]
    pub markdown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeContent {
    /// Id of the plugin to invoke.
    pub plugin: String,
    /// Free-form input object forwarded to the plugin.
    pub input: Value,
    /// Model's stated reason for the call.
    #[serde(default)]
    pub reason: String,
}

impl ResponseEnvelope {
    pub fn message(text: impl Into<String>, markdown: bool) -> Self {
        Self::Message(MessageContent { text: text.into(), markdown })
    }
}

const KNOWN_ACTIONS: [&str; 2] = ["message", "plugin_invoke"];

fn schema_err(path: &str, value: &Value, expected: &str) -> ProtocolViolation {
    ProtocolViolation {
        kind: ProtocolErrorKind::SchemaValidation,
        message: format!("at '{path}': expected {expected}"),
        detail: ViolationDetail::Schema {
            path: path.to_string(),
            value: value.clone(),
            expected: expected.to_string(),
        },
        excerpt: String::new(),
    }
}

/// Validate a parsed JSON value against the envelope schema.
///
/// Field-by-field, so failures carry the exact path and offending value. A
/// well-formed object with an unrecognized `action` reports `unknown_action`
/// rather than a schema failure.
pub fn validate_envelope(value: &Value) -> Result<ResponseEnvelope, ProtocolViolation> {
    let obj = value
        .as_object()
        .ok_or_else(|| schema_err("$", value, "a JSON object"))?;

    let action = obj
        .get("action")
        .ok_or_else(|| schema_err("$.action", &Value::Null, "a string"))?;
    let action = action
        .as_str()
        .ok_or_else(|| schema_err("$.action", action, "a string"))?;

    if !KNOWN_ACTIONS.contains(&action) {
        return Err(ProtocolViolation {
            kind: ProtocolErrorKind::UnknownAction,
            message: format!("unknown action '{action}'"),
            detail: ViolationDetail::Schema {
                path: "$.action".into(),
                value: Value::String(action.to_string()),
                expected: "one of \"message\", \"plugin_invoke\"".into(),
            },
            excerpt: String::new(),
        });
    }

    let content = obj
        .get("content")
        .ok_or_else(|| schema_err("$.content", &Value::Null, "an object"))?;
    let content_obj = content
        .as_object()
        .ok_or_else(|| schema_err("$.content", content, "an object"))?;

    match action {
        "message" => {
            let text = content_obj
                .get("text")
                .ok_or_else(|| schema_err("$.content.text", &Value::Null, "a string"))?;
            let text = text
                .as_str()
                .ok_or_else(|| schema_err("$.content.text", text, "a string"))?;
            let markdown = match content_obj.get("markdown") {
                None => false,
                Some(v) => v
                    .as_bool()
                    .ok_or_else(|| schema_err("$.content.markdown", v, "a boolean"))?,
            };
            Ok(ResponseEnvelope::Message(MessageContent {
                text: text.to_string(),
                markdown,
            }))
        }
        _ => {
            let plugin = content_obj
                .get("plugin")
                .ok_or_else(|| schema_err("$.content.plugin", &Value::Null, "a string"))?;
            let plugin = plugin
                .as_str()
                .ok_or_else(|| schema_err("$.content.plugin", plugin, "a string"))?;
            if plugin.is_empty() {
                // Structurally fine, semantically useless: this is a
                // validation error, not a schema mismatch.
                return Err(ProtocolViolation {
                    kind: ProtocolErrorKind::ValidationError,
                    message: "at '$.content.plugin': plugin id must not be empty".into(),
                    detail: ViolationDetail::Schema {
                        path: "$.content.plugin".into(),
                        value: Value::String(String::new()),
                        expected: "a non-empty plugin id".into(),
                    },
                    excerpt: String::new(),
                });
            }
            let input = content_obj
                .get("input")
                .ok_or_else(|| schema_err("$.content.input", &Value::Null, "an object"))?;
            if !input.is_object() {
                return Err(schema_err("$.content.input", input, "an object"));
            }
            let reason = match content_obj.get("reason") {
                None => String::new(),
                Some(v) => v
                    .as_str()
                    .ok_or_else(|| schema_err("$.content.reason", v, "a string"))?
                    .to_string(),
            };
            Ok(ResponseEnvelope::PluginInvoke(InvokeContent {
                plugin: plugin.to_string(),
                input: input.clone(),
                reason,
            }))
        }
    }
}
