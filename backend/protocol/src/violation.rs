//! Tagged protocol errors for malformed model output.

use serde::Serialize;
use serde_json::Value;

use famulus_core::{FamulusError, ProtocolErrorKind};

/// Maximum length of the offending-text excerpt carried on a violation.
pub const EXCERPT_LIMIT: usize = 240;

/// A protocol error: what went wrong, where, and a truncated copy of the text
/// that caused it.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolViolation {
    pub kind: ProtocolErrorKind,
    pub message: String,
    pub detail: ViolationDetail,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViolationDetail {
    /// Parse failure position, as reported by the JSON parser.
    Parse { line: usize, column: usize },
    /// Failing path, offending value, and what was expected.
    Schema {
        path: String,
        value: Value,
        expected: String,
    },
    None,
}

impl ProtocolViolation {
    pub fn parse_failure(err: &serde_json::Error, offending: &str) -> Self {
        Self {
            kind: ProtocolErrorKind::JsonParse,
            message: err.to_string(),
            detail: ViolationDetail::Parse { line: err.line(), column: err.column() },
            excerpt: truncate_excerpt(offending),
        }
    }

    /// Attach (or replace) the offending-text excerpt.
    pub fn with_excerpt(mut self, offending: &str) -> Self {
        self.excerpt = truncate_excerpt(offending);
        self
    }
}

impl std::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProtocolViolation {}

impl From<ProtocolViolation> for FamulusError {
    fn from(v: ProtocolViolation) -> Self {
        FamulusError::Protocol { kind: v.kind, message: v.message }
    }
}

pub fn truncate_excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_LIMIT {
        return text.to_string();
    }
    let mut end = EXCERPT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_is_truncated() {
        let long = "x".repeat(1000);
        let e = truncate_excerpt(&long);
        assert!(e.len() < 300);
        assert!(e.ends_with('…'));
    }

    #[test]
    fn parse_failure_records_position() {
        let err = serde_json::from_str::<Value>("{\n  \"a\": oops}").unwrap_err();
        let v = ProtocolViolation::parse_failure(&err, "{\n  \"a\": oops}");
        assert_eq!(v.kind, ProtocolErrorKind::JsonParse);
        match v.detail {
            ViolationDetail::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected detail: {other:?}"),
        }
    }
}
