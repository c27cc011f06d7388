//! Config file location and read/write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info};

use crate::schema::FamulusConfig;

/// Config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the Famulus config directory.
/// Priority: `FAMULUS_CONFIG_DIR` env > `~/.famulus/`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FAMULUS_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".famulus"),
        None => PathBuf::from(".famulus"),
    }
}

/// Full path to the main config file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk.
///
/// Returns defaults if the file doesn't exist (first run).
pub async fn load_config(path: &Path) -> Result<FamulusConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file does not exist; using defaults");
        return Ok(FamulusConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("read config file: {}", path.display()))?;

    let config: FamulusConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Load the config from the resolved config directory, resolving the plugins
/// and log directories against it.
pub async fn load_default() -> Result<FamulusConfig> {
    let dir = config_dir();
    let mut config = load_config(&config_file_path(&dir)).await?;
    if config.plugins.dir.is_relative() {
        config.plugins.dir = dir.join(&config.plugins.dir);
    }
    if config.logging.dir.is_relative() {
        config.logging.dir = dir.join(&config.logging.dir);
    }
    Ok(config)
}

/// Write config to disk atomically (write to temp file, rename).
pub async fn write_config(config: &FamulusConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create config directory: {}", parent.display()))?;
    }

    let yaml = serde_yaml::to_string(config).context("serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("write temp config: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "wrote config");
    Ok(())
}
