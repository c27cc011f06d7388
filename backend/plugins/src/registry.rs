/// Plugin registry — discovers and tracks installed plugins.
///
/// Each subdirectory of the plugins root containing a `plugin-manifest.json`
/// is a candidate. A manifest that fails parsing or validation is logged and
/// excluded; discovery never aborts for one bad entry.
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::manifest::PluginManifest;

pub const MANIFEST_FILENAME: &str = "plugin-manifest.json";

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, DiscoveredPlugin>,
    plugins_dir: PathBuf,
}

pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub install_path: PathBuf,
    pub enabled: bool,
}

impl PluginRegistry {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self { plugins: HashMap::new(), plugins_dir: plugins_dir.into() }
    }

    /// Discover all valid plugins under the plugins directory.
    ///
    /// Returns the number loaded. Duplicate ids keep the first occurrence.
    pub fn discover(&mut self) -> Result<usize> {
        self.plugins.clear();
        let dir = &self.plugins_dir;
        if !dir.exists() {
            return Ok(0);
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .context("read plugins dir")?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();

        let mut count = 0;
        for plugin_path in entries {
            if !plugin_path.join(MANIFEST_FILENAME).is_file() {
                continue;
            }
            match load_manifest(&plugin_path) {
                Ok(manifest) => {
                    if self.plugins.contains_key(&manifest.id) {
                        warn!(
                            plugin = %manifest.id,
                            path = %plugin_path.display(),
                            "duplicate plugin id; keeping first occurrence"
                        );
                        continue;
                    }
                    info!(plugin = %manifest.id, version = %manifest.version, "discovered plugin");
                    self.plugins.insert(manifest.id.clone(), DiscoveredPlugin {
                        manifest,
                        install_path: plugin_path,
                        enabled: true,
                    });
                    count += 1;
                }
                Err(e) => {
                    warn!(path = %plugin_path.display(), error = %e, "skipping invalid plugin manifest");
                }
            }
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<&DiscoveredPlugin> {
        self.plugins.get(id)
    }

    pub fn list(&self) -> Vec<&PluginManifest> {
        let mut all: Vec<_> = self.plugins.values().map(|p| &p.manifest).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredPlugin> {
        self.plugins.values()
    }

    pub fn enable(&mut self, id: &str) -> bool {
        if let Some(p) = self.plugins.get_mut(id) { p.enabled = true; true } else { false }
    }

    pub fn disable(&mut self, id: &str) -> bool {
        if let Some(p) = self.plugins.get_mut(id) { p.enabled = false; true } else { false }
    }
}

fn load_manifest(path: &Path) -> Result<PluginManifest> {
    let manifest_path = path.join(MANIFEST_FILENAME);
    let raw = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest at {}", manifest_path.display()))?;
    let manifest: PluginManifest =
        serde_json::from_str(&raw).context("parse plugin manifest")?;
    manifest.validate()?;
    Ok(manifest)
}
