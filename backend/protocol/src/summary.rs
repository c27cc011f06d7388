//! Plugin-kind result summaries.
//!
//! A closed set of kinds dispatched through one lookup table, with a generic
//! default. Call sites never branch on plugin id strings themselves.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use famulus_plugins::PluginManifest;

/// Known plugin kinds for result summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Search,
    FileIo,
    LegalResearch,
    Generic,
}

/// Kind identifiers a manifest may declare in `config.kind`.
static KIND_IDENTIFIERS: Lazy<HashMap<&'static str, PluginKind>> = Lazy::new(|| {
    HashMap::from([
        ("search", PluginKind::Search),
        ("file_io", PluginKind::FileIo),
        ("legal_research", PluginKind::LegalResearch),
    ])
});

type Summarizer = fn(&Value) -> Option<String>;

static SUMMARIZERS: Lazy<HashMap<PluginKind, Summarizer>> = Lazy::new(|| {
    HashMap::from([
        (PluginKind::Search, summarize_search as Summarizer),
        (PluginKind::FileIo, summarize_file_io as Summarizer),
        (PluginKind::LegalResearch, summarize_legal as Summarizer),
    ])
});

impl PluginKind {
    /// Resolve a kind identifier string; unknown identifiers are `Generic`.
    pub fn from_identifier(identifier: &str) -> Self {
        KIND_IDENTIFIERS
            .get(identifier)
            .copied()
            .unwrap_or(PluginKind::Generic)
    }

    /// Kind declared by a manifest (`config.kind`), defaulting to `Generic`.
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        manifest
            .config
            .get("kind")
            .and_then(Value::as_str)
            .map(Self::from_identifier)
            .unwrap_or(PluginKind::Generic)
    }
}

/// Produce a short human-readable summary of a plugin result.
pub fn summarize_result(kind: PluginKind, result: &Value) -> String {
    SUMMARIZERS
        .get(&kind)
        .and_then(|f| f(result))
        .unwrap_or_else(|| summarize_generic(result))
}

fn summarize_search(result: &Value) -> Option<String> {
    let results = result.get("results")?.as_array()?;
    let mut summary = format!("{} search result(s)", results.len());
    if let Some(first) = results.first() {
        let title = first
            .get("title")
            .and_then(Value::as_str)
            .or_else(|| first.as_str());
        if let Some(title) = title {
            summary.push_str(&format!("; top: {title}"));
        }
    }
    Some(summary)
}

fn summarize_file_io(result: &Value) -> Option<String> {
    let operation = result.get("operation").and_then(Value::as_str)?;
    let path = result.get("path").and_then(Value::as_str).unwrap_or("?");
    match result.get("content").and_then(Value::as_str) {
        Some(content) => Some(format!(
            "{operation} on {path} returned {} byte(s)",
            content.len()
        )),
        None => Some(format!("{operation} on {path} completed")),
    }
}

fn summarize_legal(result: &Value) -> Option<String> {
    let cases = result.get("cases")?.as_array()?;
    Some(format!("{} case(s) found", cases.len()))
}

fn summarize_generic(result: &Value) -> String {
    let raw = result.to_string();
    if raw.len() <= 120 {
        format!("plugin returned: {raw}")
    } else {
        let mut end = 120;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("plugin returned {} bytes of JSON: {}…", raw.len(), &raw[..end])
    }
}
