//! Follow-up prompt construction for the tool-use loop.
//!
//! After each plugin call the model gets one of three continuations: a result
//! prompt, a failure prompt, or a duplicate-rejection prompt. Raw error text
//! never reaches the end user; these prompts instruct the model accordingly.

use serde_json::Value;

use famulus_core::InvocationErrorKind;

/// Continuation after a successful plugin call.
pub fn plugin_result_prompt(
    original_prompt: &str,
    plugin_id: &str,
    summary: &str,
    raw_result: &Value,
) -> String {
    let payload = serde_json::to_string_pretty(raw_result)
        .unwrap_or_else(|_| raw_result.to_string());
    format!(
        r#"The user asked: "{original_prompt}"

You invoked the "{plugin_id}" plugin. In short: {summary}.

Full plugin result:
{payload}

Decide your next step:
- If you need more information, invoke another plugin (with a new "reason").
- If you have enough to answer, respond with a "message" action now.

Answer in the required JSON format."#
    )
}

/// User-safe wording for an invocation failure category.
fn failure_description(kind: InvocationErrorKind) -> &'static str {
    match kind {
        InvocationErrorKind::Timeout => "the plugin took too long to respond",
        InvocationErrorKind::Connection => "the plugin could not be reached",
        InvocationErrorKind::Http => "the plugin reported a failure",
        InvocationErrorKind::BadResponse => "the plugin returned an unusable response",
    }
}

/// Continuation after a failed plugin call.
///
/// Retry of the identical call is explicitly forbidden, as is exposing raw
/// error text to the user.
pub fn plugin_error_prompt(
    original_prompt: &str,
    plugin_id: &str,
    kind: InvocationErrorKind,
) -> String {
    let description = failure_description(kind);
    format!(
        r#"The user asked: "{original_prompt}"

You invoked the "{plugin_id}" plugin, but it failed: {description}.

Choose one of these strategies:
- Try a DIFFERENT plugin that could satisfy the request.
- Answer from your own knowledge, noting that live data was unavailable.
- Suggest the user retry later, and offer whatever help you can meanwhile.

You must NOT repeat the exact same call to "{plugin_id}", and you must NOT
show raw error messages or technical details to the user. Explain any
limitation in plain language.

Answer in the required JSON format."#
    )
}

/// Continuation when a consecutive duplicate invocation was rejected before
/// any plugin was contacted.
pub fn duplicate_rejection_prompt(original_prompt: &str, plugin_id: &str) -> String {
    format!(
        r#"The user asked: "{original_prompt}"

Your last request repeated the immediately preceding call to "{plugin_id}"
with identical input, so it was NOT executed. You already have that result.

Take a different action: use the result you already received, call a
different plugin (or the same plugin with different input), or finish with a
"message" action.

Answer in the required JSON format."#
    )
}
