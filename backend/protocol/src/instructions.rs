//! System-instruction rendering.
//!
//! Declares the two permitted envelope shapes and the live plugin catalog to
//! the model. Rendering is deterministic: plugins sorted by id, capabilities
//! sorted by name, so identical catalogs always produce identical prompts.

use std::fmt::Write;

use serde_json::Value;

use famulus_plugins::PluginManifest;

use crate::summary::PluginKind;

/// One plugin as presented to the model.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: PluginKind,
    pub capabilities: Vec<CapabilityExample>,
}

/// One capability with an input example drawn from the plugin's manifest.
#[derive(Debug, Clone)]
pub struct CapabilityExample {
    pub name: String,
    pub description: String,
    pub input_example: Value,
}

impl CatalogEntry {
    /// Build a catalog entry from a manifest. Capability examples come from
    /// the manifest's free-form `config.capabilities` object:
    /// `{"<name>": {"description": ..., "input_example": {...}}}`.
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        let mut capabilities = Vec::new();
        if let Some(caps) = manifest.config.get("capabilities").and_then(Value::as_object) {
            for (name, spec) in caps {
                capabilities.push(CapabilityExample {
                    name: name.clone(),
                    description: spec
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("No description")
                        .to_string(),
                    input_example: spec
                        .get("input_example")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default())),
                });
            }
        }
        capabilities.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            description: manifest.description.clone(),
            kind: PluginKind::from_manifest(manifest),
            capabilities,
        }
    }
}

/// Render the full instruction block for one turn.
pub fn render_system_instructions(catalog: &[CatalogEntry]) -> String {
    let mut entries: Vec<&CatalogEntry> = catalog.iter().collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::from(
        r#"You are Famulus, an assistant that can call plugins for extended capabilities.

You MUST answer with exactly one JSON object in one of these two shapes:

1. A user-facing message:
{
  "action": "message",
  "content": {
    "text": "your response text",
    "markdown": false
  }
}

2. A plugin invocation:
{
  "action": "plugin_invoke",
  "content": {
    "plugin": "plugin_id",
    "input": { "plugin": "specific input" },
    "reason": "why you are calling this plugin"
  }
}

AVAILABLE PLUGINS:"#,
    );

    if entries.is_empty() {
        out.push_str("\nNo plugins are currently available.\n");
    } else {
        for entry in entries {
            let _ = write!(out, "\n\n--- {} ({}) ---\n{}", entry.name, entry.id, entry.description);
            if entry.capabilities.is_empty() {
                out.push_str("\nNo specific capabilities declared.");
            } else {
                for cap in &entry.capabilities {
                    let example = serde_json::to_string(&cap.input_example)
                        .unwrap_or_else(|_| "{}".to_string());
                    let _ = write!(
                        out,
                        "\n  - {}: {}\n    example input: {}",
                        cap.name, cap.description, example
                    );
                }
            }
        }
        out.push('\n');
    }

    out.push_str(
        r#"
RULES:
1. You may chain several plugin calls across turns when one result informs the next.
2. Every plugin_invoke must carry a specific "reason".
3. Never show raw plugin errors or technical failures to the user; explain in plain language.
4. Once you have enough information, finish with a "message" action.
5. Respond with the JSON object only. No text outside it."#,
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, caps: serde_json::Value) -> PluginManifest {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": id.to_uppercase(),
            "version": "1.0.0",
            "description": format!("{id} plugin"),
            "entrypoint": "run",
            "config": {"capabilities": caps},
        }))
        .unwrap()
    }

    #[test]
    fn rendering_is_deterministic_and_sorted() {
        let b = CatalogEntry::from_manifest(&manifest("bravo", serde_json::json!({})));
        let a = CatalogEntry::from_manifest(&manifest("alpha", serde_json::json!({})));
        let one = render_system_instructions(&[b.clone(), a.clone()]);
        let two = render_system_instructions(&[a, b]);
        assert_eq!(one, two);
        let alpha_pos = one.find("(alpha)").unwrap();
        let bravo_pos = one.find("(bravo)").unwrap();
        assert!(alpha_pos < bravo_pos);
    }

    #[test]
    fn capability_examples_come_from_the_manifest() {
        let entry = CatalogEntry::from_manifest(&manifest(
            "web-search",
            serde_json::json!({
                "search": {
                    "description": "Search the web",
                    "input_example": {"query": "example"}
                }
            }),
        ));
        let text = render_system_instructions(&[entry]);
        assert!(text.contains("search: Search the web"));
        assert!(text.contains(r#"{"query":"example"}"#));
    }

    #[test]
    fn declares_both_envelope_shapes_by_field_name() {
        let text = render_system_instructions(&[]);
        for needle in ["\"action\"", "\"message\"", "\"plugin_invoke\"", "\"text\"", "\"markdown\"", "\"plugin\"", "\"input\"", "\"reason\""] {
            assert!(text.contains(needle), "missing {needle}");
        }
        assert!(text.contains("No plugins are currently available."));
    }
}
