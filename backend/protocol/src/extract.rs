//! Robust extraction of envelope JSON from free-form model output.
//!
//! Model output is adversarial input: the envelope may arrive bare, inside a
//! labeled or unlabeled fenced block, buried in prose, or alongside other JSON
//! blobs. Candidates are gathered in a fixed order and a full schema-validating
//! pass runs across all of them before any parse-only fallback, so failures
//! report as precise schema errors rather than generic parse errors.
//!
//! Tie-break rules (deterministic, documented here):
//! - among schema-valid candidates, the first in candidate order wins;
//! - among merely-parseable candidates, the largest by byte length wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::envelope::{validate_envelope, ResponseEnvelope};
use crate::violation::ProtocolViolation;

/// Fixed reply used when not even the raw text can be wrapped into a message.
pub const FALLBACK_APOLOGY: &str =
    "Sorry, I was unable to produce a well-formed response. Please try rephrasing your request.";

/// Parse model output into a validated envelope.
pub fn parse_response(text: &str) -> Result<ResponseEnvelope, ProtocolViolation> {
    let candidates = gather_candidates(text);

    // Pass 1: schema-aware. First candidate that parses and validates wins.
    for cand in &candidates {
        if let Ok(value) = serde_json::from_str::<Value>(cand) {
            if let Ok(envelope) = validate_envelope(&value) {
                return Ok(envelope);
            }
        }
    }

    // Pass 2: parse-only. Every candidate failed validation; report the
    // schema error of the largest parseable candidate.
    let mut parseable: Vec<(&String, Value)> = candidates
        .iter()
        .filter_map(|c| serde_json::from_str::<Value>(c).ok().map(|v| (c, v)))
        .collect();
    parseable.sort_by_key(|(c, _)| std::cmp::Reverse(c.len()));
    for (cand, value) in parseable {
        if let Err(violation) = validate_envelope(&value) {
            return Err(violation.with_excerpt(cand));
        }
    }

    // Nothing parsed anywhere; report the parse failure of the whole text.
    let trimmed = text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Err(e) => Err(ProtocolViolation::parse_failure(&e, trimmed)),
        // Cannot happen: the whole text is always the first candidate.
        Ok(value) => match validate_envelope(&value) {
            Ok(envelope) => Ok(envelope),
            Err(violation) => Err(violation.with_excerpt(trimmed)),
        },
    }
}

/// Parse model output, degrading to a synthesized `message` envelope instead
/// of failing.
///
/// The returned violation, when present, describes what was wrong with the
/// original text; the envelope is always usable. The user never receives a
/// hard failure from this path.
pub fn parse_with_fallback(text: &str) -> (ResponseEnvelope, Option<ProtocolViolation>) {
    match parse_response(text) {
        Ok(envelope) => (envelope, None),
        Err(violation) => {
            let trimmed = text.trim();
            let envelope = if trimmed.is_empty() {
                ResponseEnvelope::message(FALLBACK_APOLOGY, false)
            } else {
                ResponseEnvelope::message(trimmed, false)
            };
            (envelope, Some(violation))
        }
    }
}

/// Gather extraction candidates in priority order, deduplicated.
fn gather_candidates(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: String| {
        let s = s.trim().to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    };

    // 1. The whole trimmed text.
    push(text.to_string());

    // 2. Fenced code blocks, labeled or not, in order of appearance.
    for block in fenced_blocks(text) {
        push(block);
    }

    // 3. Balanced-delimiter scan for top-level objects embedded in prose.
    for obj in balanced_objects(text) {
        push(obj);
    }

    // 4. Narrow single-line regex scan, last resort.
    for line in text.lines() {
        if let Some(m) = LINE_OBJECT_RE.find(line) {
            push(m.as_str().to_string());
        }
    }

    out
}

/// Contents of all ``` fenced blocks. An optional language label on the
/// opening fence is discarded. An unterminated fence runs to end of text.
fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        let stripped = line.trim_start();
        if stripped.starts_with("```") {
            match current.take() {
                Some(body) => blocks.push(body.join("\n")),
                None => current = Some(Vec::new()),
            }
            continue;
        }
        if let Some(body) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some(body) = current {
        blocks.push(body.join("\n"));
    }
    blocks
}

/// Locate top-level `{...}` structures by tracking brace depth with full
/// string/escape awareness. No regex backtracking.
fn balanced_objects(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        found.push(text[s..i + c.len_utf8()].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    found
}

static LINE_OBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{.*\}").expect("line-object regex compiles"));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageContent;
    use famulus_core::ProtocolErrorKind;
    use serde_json::json;

    fn expect_message(text: &str) -> MessageContent {
        match parse_response(text).unwrap() {
            ResponseEnvelope::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn bare_json_parses() {
        let m = expect_message(r#"{"action":"message","content":{"text":"hi","markdown":false}}"#);
        assert_eq!(m.text, "hi");
        assert!(!m.markdown);
    }

    #[test]
    fn labeled_fence_in_prose_parses() {
        let text = "Sure, here is my answer:\n```json\n{\"action\":\"message\",\"content\":{\"text\":\"hi\",\"markdown\":false}}\n```\nLet me know if that helps.";
        let m = expect_message(text);
        assert_eq!(m.text, "hi");
    }

    #[test]
    fn unlabeled_fence_parses() {
        let text = "```\n{\"action\":\"message\",\"content\":{\"text\":\"done\",\"markdown\":true}}\n```";
        let m = expect_message(text);
        assert!(m.markdown);
    }

    #[test]
    fn invoke_embedded_in_prose_without_fences() {
        let text = "I'll check the file now. {\"action\":\"plugin_invoke\",\"content\":{\"plugin\":\"local-fileio\",\"input\":{\"operation\":\"read\",\"path\":\"a.txt\"},\"reason\":\"read requested\"}} Give me a moment.";
        match parse_response(text).unwrap() {
            ResponseEnvelope::PluginInvoke(inv) => {
                assert_eq!(inv.plugin, "local-fileio");
                assert_eq!(inv.input["operation"], "read");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn schema_valid_block_preferred_over_parseable_one() {
        let text = "First attempt:\n```json\n{\"incomplete\": \"missing required fields\"}\n```\nCorrected:\n```json\n{\"action\":\"message\",\"content\":{\"text\":\"Found it\",\"markdown\":false}}\n```";
        let m = expect_message(text);
        assert_eq!(m.text, "Found it");
    }

    #[test]
    fn first_schema_valid_candidate_wins() {
        let text = "```json\n{\"action\":\"message\",\"content\":{\"text\":\"first\"}}\n```\n```json\n{\"action\":\"message\",\"content\":{\"text\":\"second\"}}\n```";
        assert_eq!(expect_message(text).text, "first");
    }

    #[test]
    fn largest_parseable_candidate_reported_when_none_validate() {
        let text = "{\"tiny\":1}\nand also\n{\"bigger\": {\"nested\": \"structure\", \"with\": \"more text\"}}";
        let err = parse_response(text).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::SchemaValidation);
        assert!(err.excerpt.contains("bigger"));
    }

    #[test]
    fn pure_prose_is_a_parse_error_with_position() {
        let err = parse_response("This is just plain text with no JSON at all.").unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::JsonParse);
        assert!(!err.excerpt.is_empty());
    }

    #[test]
    fn unknown_action_reported_from_parseable_candidate() {
        let err =
            parse_response(r#"{"action":"self_destruct","content":{"text":"boom"}}"#).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::UnknownAction);
    }

    #[test]
    fn fallback_wraps_raw_text_verbatim() {
        let raw = "Here are my thoughts in plain prose.";
        let (env, violation) = parse_with_fallback(raw);
        assert_eq!(env, ResponseEnvelope::message(raw, false));
        assert_eq!(violation.unwrap().kind, ProtocolErrorKind::JsonParse);
    }

    #[test]
    fn fallback_on_empty_text_is_the_apology() {
        let (env, violation) = parse_with_fallback("   \n  ");
        assert_eq!(env, ResponseEnvelope::message(FALLBACK_APOLOGY, false));
        assert!(violation.is_some());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let text = r#"Note the odd text: {"action":"message","content":{"text":"shapes like } and { are fine","markdown":false}}"#;
        let m = expect_message(text);
        assert!(m.text.contains('}'));
    }

    #[test]
    fn round_trip_preserves_envelope() {
        let env = ResponseEnvelope::PluginInvoke(crate::envelope::InvokeContent {
            plugin: "web-search".into(),
            input: json!({"query": "rust plugin hosts"}),
            reason: "needs current data".into(),
        });
        let wire = serde_json::to_string(&env).unwrap();
        assert_eq!(parse_response(&wire).unwrap(), env);
    }
}
