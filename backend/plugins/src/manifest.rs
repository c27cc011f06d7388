/// Plugin manifest — describes one Famulus plugin package.
///
/// Parsed from `plugin-manifest.json` in the plugin directory.
use serde::{Deserialize, Serialize};

use crate::permissions::Capability;

/// Full plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Command line used to launch the plugin process, relative to its directory.
    pub entrypoint: String,
    /// Port the plugin's HTTP API listens on once started.
    #[serde(default)]
    pub port: Option<u16>,
    /// Capability tags the plugin requires.
    #[serde(default)]
    pub permissions: Vec<Capability>,
    /// Free-form plugin configuration, forwarded verbatim.
    #[serde(default)]
    pub config: serde_json::Value,
    pub author: Option<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
}

impl PluginManifest {
    /// Validate the manifest for required fields.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("plugin manifest missing 'id'");
        }
        if self.name.is_empty() {
            anyhow::bail!("plugin manifest missing 'name'");
        }
        if self.version.is_empty() {
            anyhow::bail!("plugin manifest missing 'version'");
        }
        if self.entrypoint.trim().is_empty() {
            anyhow::bail!("plugin manifest missing 'entrypoint'");
        }
        if !self.config.is_null() && !self.config.is_object() {
            anyhow::bail!("plugin manifest 'config' must be an object");
        }
        Ok(())
    }

    /// Entrypoint split into program + arguments.
    pub fn command_line(&self) -> (String, Vec<String>) {
        let mut parts = self.entrypoint.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_manifest() -> PluginManifest {
        serde_json::from_value(serde_json::json!({
            "id": "echo",
            "name": "Echo",
            "version": "1.0.0",
            "entrypoint": "run-echo"
        }))
        .unwrap()
    }

    #[test]
    fn minimal_manifest_is_valid() {
        let m = echo_manifest();
        assert!(m.validate().is_ok());
        assert!(m.permissions.is_empty());
        assert_eq!(m.port, None);
    }

    #[test]
    fn missing_required_field_rejected() {
        let v = serde_json::json!({"id": "x", "name": "X", "version": "1.0.0"});
        assert!(serde_json::from_value::<PluginManifest>(v).is_err());
    }

    #[test]
    fn empty_entrypoint_rejected() {
        let mut m = echo_manifest();
        m.entrypoint = "  ".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn command_line_splits_arguments() {
        let mut m = echo_manifest();
        m.entrypoint = "python3 server.py --port 5101".into();
        let (prog, args) = m.command_line();
        assert_eq!(prog, "python3");
        assert_eq!(args, vec!["server.py", "--port", "5101"]);
    }

    #[test]
    fn full_manifest_round_trips() {
        let v = serde_json::json!({
            "id": "local-fileio",
            "name": "Local File I/O",
            "version": "0.3.1",
            "description": "Read and write files on the local machine",
            "entrypoint": "python3 server.py",
            "port": 5101,
            "permissions": ["file_io"],
            "config": {"root": "~/Documents"},
            "author": "famulus",
            "license": "MIT"
        });
        let m: PluginManifest = serde_json::from_value(v).unwrap();
        assert!(m.validate().is_ok());
        assert_eq!(m.permissions, vec![Capability::FileIo]);
        let back = serde_json::to_value(&m).unwrap();
        let again: PluginManifest = serde_json::from_value(back).unwrap();
        assert_eq!(again.id, "local-fileio");
        assert_eq!(again.port, Some(5101));
    }
}
