//! The tool-use negotiation loop.
//!
//! One user prompt drives a bounded exchange with the model: each model reply
//! is either a final `message` or a `plugin_invoke` that yields a follow-up
//! prompt. Consecutive duplicate invocations are rejected before any plugin
//! is contacted. Only model-service unreachability is a terminal error; every
//! plugin failure turns into a recovery prompt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use famulus_core::{FamulusError, InvocationErrorKind, ModelClient, ModelRequest};
use famulus_protocol::prompts::{
    duplicate_rejection_prompt, plugin_error_prompt, plugin_result_prompt,
};
use famulus_protocol::{
    parse_with_fallback, render_system_instructions, summarize_result, CatalogEntry, PluginKind,
    ResponseEnvelope,
};
use famulus_usage::UsageTracker;

use crate::invoker::PluginInvoker;

/// Default cap on model calls per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Marker attached to a turn that hit the iteration cap.
pub const MAX_ITERATIONS_MARKER: &str = "max iterations reached";

/// Outcome of one complete user turn.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TurnOutcome {
    pub request_id: String,
    pub text: String,
    pub markdown: bool,
    /// Model calls made this turn.
    pub iterations: usize,
    /// Plugin ids invoked this turn, in first-use order.
    pub plugins_used: Vec<String>,
    /// True when the turn ended at the iteration cap instead of a `message`.
    pub capped: bool,
    /// Advisory notes: protocol violations tolerated mid-turn, cap marker.
    pub notes: Vec<String>,
}

/// Drives the model/plugin exchange for user turns.
pub struct ToolUseLoop {
    model: Arc<dyn ModelClient>,
    invoker: Arc<dyn PluginInvoker>,
    tracker: Arc<UsageTracker>,
    model_name: String,
    max_iterations: usize,
}

impl ToolUseLoop {
    pub fn new(
        model: Arc<dyn ModelClient>,
        invoker: Arc<dyn PluginInvoker>,
        tracker: Arc<UsageTracker>,
        model_name: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        Self {
            model,
            invoker,
            tracker,
            model_name: model_name.into(),
            max_iterations: max_iterations.max(1),
        }
    }

    /// Run one user turn under `request_id`.
    ///
    /// The catalog determines both the instructions shown to the model and
    /// the summarizer kind used for each plugin's results.
    pub async fn run_turn(
        &self,
        prompt: &str,
        request_id: &str,
        catalog: &[CatalogEntry],
    ) -> Result<TurnOutcome, FamulusError> {
        let kinds: HashMap<&str, PluginKind> =
            catalog.iter().map(|e| (e.id.as_str(), e.kind)).collect();
        let instructions = render_system_instructions(catalog);
        let mut next_prompt = format!(
            "{instructions}\n\nThe user asked: \"{prompt}\"\n\nAnswer in the required JSON format."
        );

        let mut plugins_used: Vec<String> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut last_text = String::new();

        for iteration in 1..=self.max_iterations {
            let response = self
                .model
                .generate(&ModelRequest::new(&self.model_name, &next_prompt))
                .await?;
            last_text = response.content.clone();

            let (envelope, violation) = parse_with_fallback(&response.content);
            if let Some(v) = violation {
                warn!(request_id, iteration, kind = %v.kind, "malformed model output tolerated");
                notes.push(v.to_string());
            }

            let call = match envelope {
                ResponseEnvelope::Message(msg) => {
                    debug!(request_id, iteration, "turn finished with message");
                    return Ok(TurnOutcome {
                        request_id: request_id.to_string(),
                        text: msg.text,
                        markdown: msg.markdown,
                        iterations: iteration,
                        plugins_used,
                        capped: false,
                        notes,
                    });
                }
                ResponseEnvelope::PluginInvoke(call) => call,
            };

            if self
                .tracker
                .is_consecutive_duplicate(request_id, &call.plugin, &call.input)
            {
                info!(request_id, plugin = %call.plugin, "consecutive duplicate rejected");
                // Recorded so analytics can tell a rejected call from no
                // call; the plugin itself is never contacted.
                let index = self.tracker.record_invocation(
                    request_id,
                    &call.plugin,
                    &call.input,
                    &call.reason,
                );
                self.tracker.update_result(
                    request_id,
                    index,
                    false,
                    None,
                    Some("duplicate invocation rejected".into()),
                    0,
                );
                next_prompt = duplicate_rejection_prompt(prompt, &call.plugin);
                continue;
            }

            let index =
                self.tracker
                    .record_invocation(request_id, &call.plugin, &call.input, &call.reason);
            if !plugins_used.contains(&call.plugin) {
                plugins_used.push(call.plugin.clone());
            }

            let started = Instant::now();
            match self.invoker.invoke(&call.plugin, &call.input).await {
                Ok(result) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    self.tracker.update_result(
                        request_id,
                        index,
                        true,
                        Some(result.clone()),
                        None,
                        elapsed,
                    );
                    let kind = kinds
                        .get(call.plugin.as_str())
                        .copied()
                        .unwrap_or(PluginKind::Generic);
                    let summary = summarize_result(kind, &result);
                    info!(request_id, plugin = %call.plugin, elapsed_ms = elapsed, %summary, "plugin call succeeded");
                    next_prompt = plugin_result_prompt(prompt, &call.plugin, &summary, &result);
                }
                Err(err) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    let kind = invocation_kind(&err);
                    self.tracker.update_result(
                        request_id,
                        index,
                        false,
                        None,
                        Some(err.to_string()),
                        elapsed,
                    );
                    warn!(request_id, plugin = %call.plugin, error = %err, "plugin call failed; prompting recovery");
                    next_prompt = plugin_error_prompt(prompt, &call.plugin, kind);
                }
            }
        }

        warn!(request_id, cap = self.max_iterations, "iteration cap reached");
        notes.push(MAX_ITERATIONS_MARKER.to_string());
        Ok(TurnOutcome {
            request_id: request_id.to_string(),
            text: last_text,
            markdown: false,
            iterations: self.max_iterations,
            plugins_used,
            capped: true,
            notes,
        })
    }
}

fn invocation_kind(err: &FamulusError) -> InvocationErrorKind {
    match err {
        FamulusError::Invocation { kind, .. } => *kind,
        _ => InvocationErrorKind::Connection,
    }
}
