//! Plugin orchestrator.
//!
//! Owns the registry, one `PluginProcess` per discovered plugin, the usage
//! tracker, and the model client. Everything the gateway exposes goes through
//! here; plugin code and the HTTP layer never talk to each other directly.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use famulus_core::{FamulusError, InvocationErrorKind, ModelClient};
use famulus_plugins::{
    Capability, PermissionReport, PluginProcess, PluginRegistry, PluginStatus, StatusReport,
};
use famulus_protocol::CatalogEntry;
use famulus_usage::{SessionSummary, UsageTracker, DEFAULT_MAX_RECENT};

use crate::invoker::{HttpInvoker, PluginInvoker};
use crate::tool_loop::{ToolUseLoop, TurnOutcome, DEFAULT_MAX_ITERATIONS};

/// Tunables for the orchestrator. Field defaults match a local single-user
/// deployment.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub plugins_dir: PathBuf,
    pub model_name: String,
    pub max_iterations: usize,
    pub invoke_timeout: Duration,
    pub probe_timeout: Duration,
    pub stop_grace: Duration,
    /// Capacity of the archived usage-session ring buffer.
    pub max_recent_sessions: usize,
}

impl OrchestratorSettings {
    pub fn new(plugins_dir: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            model_name: model_name.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            invoke_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
            max_recent_sessions: DEFAULT_MAX_RECENT,
        }
    }
}

/// One row of the plugin listing.
#[derive(Debug, Clone, Serialize)]
pub struct PluginOverview {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub enabled: bool,
    pub status: PluginStatus,
    pub last_error: Option<String>,
}

pub struct Orchestrator {
    registry: tokio::sync::RwLock<PluginRegistry>,
    processes: tokio::sync::RwLock<HashMap<String, Arc<PluginProcess>>>,
    tracker: Arc<UsageTracker>,
    model: Arc<dyn ModelClient>,
    http: HttpInvoker,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ModelClient>, settings: OrchestratorSettings) -> Self {
        Self {
            registry: tokio::sync::RwLock::new(PluginRegistry::new(&settings.plugins_dir)),
            processes: tokio::sync::RwLock::new(HashMap::new()),
            tracker: Arc::new(UsageTracker::new(settings.max_recent_sessions)),
            model,
            http: HttpInvoker::new(settings.invoke_timeout),
            settings,
        }
    }

    pub fn tracker(&self) -> Arc<UsageTracker> {
        self.tracker.clone()
    }

    /// Scan the plugins directory and reconcile the process table.
    ///
    /// Processes for ids that survive rediscovery are kept as-is, so runtime
    /// state (grants, running children) outlives a rescan. Processes whose
    /// plugin disappeared are stopped and dropped.
    pub async fn discover(&self) -> anyhow::Result<usize> {
        let mut registry = self.registry.write().await;
        let count = registry.discover()?;

        let mut processes = self.processes.write().await;
        let mut stale: Vec<Arc<PluginProcess>> = Vec::new();
        processes.retain(|id, process| {
            let keep = registry.get(id).is_some();
            if !keep {
                stale.push(process.clone());
            }
            keep
        });
        for plugin in registry.iter() {
            processes
                .entry(plugin.manifest.id.clone())
                .or_insert_with(|| {
                    Arc::new(
                        PluginProcess::new(plugin.manifest.clone(), &plugin.install_path)
                            .with_timeouts(self.settings.probe_timeout, self.settings.stop_grace),
                    )
                });
        }
        drop(processes);
        drop(registry);

        for process in stale {
            warn!(plugin = %process.id(), "plugin removed from disk; stopping");
            process.stop().await;
        }
        info!(count, "plugin discovery complete");
        Ok(count)
    }

    async fn process(&self, id: &str) -> Result<Arc<PluginProcess>, FamulusError> {
        self.processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FamulusError::Process {
                plugin: id.to_string(),
                detail: "unknown plugin id".into(),
            })
    }

    pub async fn list_plugins(&self) -> Vec<PluginOverview> {
        let registry = self.registry.read().await;
        let processes = self.processes.read().await;
        let mut out = Vec::new();
        for plugin in registry.iter() {
            let report = match processes.get(&plugin.manifest.id) {
                Some(p) => p.status_report().await,
                None => StatusReport {
                    id: plugin.manifest.id.clone(),
                    status: PluginStatus::Stopped,
                    last_error: None,
                },
            };
            out.push(PluginOverview {
                id: plugin.manifest.id.clone(),
                name: plugin.manifest.name.clone(),
                version: plugin.manifest.version.clone(),
                description: plugin.manifest.description.clone(),
                enabled: plugin.enabled,
                status: report.status,
                last_error: report.last_error,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn plugin_status(&self, id: &str) -> Result<StatusReport, FamulusError> {
        Ok(self.process(id).await?.status_report().await)
    }

    pub async fn permission_report(&self, id: &str) -> Result<PermissionReport, FamulusError> {
        Ok(self.process(id).await?.permission_report().await)
    }

    /// Record the user's one-time consent for a plugin's capabilities.
    pub async fn approve_permissions(
        &self,
        id: &str,
        granted: BTreeSet<Capability>,
    ) -> Result<PermissionReport, FamulusError> {
        let process = self.process(id).await?;
        process.approve_permissions(granted).await;
        Ok(process.permission_report().await)
    }

    /// Start a plugin. Permission gating happens inside the process itself
    /// and is re-evaluated on every attempt.
    pub async fn start_plugin(&self, id: &str) -> Result<StatusReport, FamulusError> {
        let process = self.process(id).await?;
        if !self.registry.read().await.get(id).map(|p| p.enabled).unwrap_or(false) {
            return Err(FamulusError::Process {
                plugin: id.to_string(),
                detail: "plugin is disabled".into(),
            });
        }
        process.start().await?;
        Ok(process.status_report().await)
    }

    pub async fn stop_plugin(&self, id: &str) -> Result<StatusReport, FamulusError> {
        let process = self.process(id).await?;
        process.stop().await;
        Ok(process.status_report().await)
    }

    pub async fn enable_plugin(&self, id: &str) -> Result<(), FamulusError> {
        if self.registry.write().await.enable(id) {
            Ok(())
        } else {
            Err(FamulusError::Process {
                plugin: id.to_string(),
                detail: "unknown plugin id".into(),
            })
        }
    }

    /// Disable a plugin, stopping it first if it is running.
    pub async fn disable_plugin(&self, id: &str) -> Result<(), FamulusError> {
        let process = self.process(id).await?;
        process.stop().await;
        self.registry.write().await.disable(id);
        Ok(())
    }

    /// Last `lines` lines of a plugin's captured stdout and stderr.
    pub async fn tail_logs(&self, id: &str, lines: usize) -> Result<(String, String), FamulusError> {
        Ok(self.process(id).await?.tail_logs(lines))
    }

    /// Catalog of plugins the model may invoke right now: enabled and with a
    /// running process.
    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        let registry = self.registry.read().await;
        let processes = self.processes.read().await;
        let mut entries = Vec::new();
        for plugin in registry.iter() {
            if !plugin.enabled {
                continue;
            }
            let running = match processes.get(&plugin.manifest.id) {
                Some(p) => p.status().await == PluginStatus::Running,
                None => false,
            };
            if running {
                entries.push(CatalogEntry::from_manifest(&plugin.manifest));
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Run one complete user turn: catalog, model exchange, plugin calls.
    pub async fn handle_prompt(self: Arc<Self>, prompt: &str) -> Result<TurnOutcome, FamulusError> {
        let request_id = Uuid::new_v4().to_string();
        self.handle_prompt_as(prompt, &request_id).await
    }

    /// Same as `handle_prompt` with a caller-supplied request id.
    pub async fn handle_prompt_as(
        self: Arc<Self>,
        prompt: &str,
        request_id: &str,
    ) -> Result<TurnOutcome, FamulusError> {
        let catalog = self.catalog().await;
        let looper = ToolUseLoop::new(
            self.model.clone(),
            self.clone() as Arc<dyn PluginInvoker>,
            self.tracker.clone(),
            self.settings.model_name.clone(),
            self.settings.max_iterations,
        );
        looper.run_turn(prompt, request_id, &catalog).await
    }

    /// Plugin ids accessed by the current or most recent request.
    pub fn plugins_accessed(&self) -> (Option<String>, Vec<String>) {
        self.tracker.plugins_accessed()
    }

    pub fn recent_sessions(&self) -> Vec<SessionSummary> {
        self.tracker.recent_sessions()
    }

    pub fn session_summary(&self, request_id: &str) -> Option<SessionSummary> {
        self.tracker.session_summary(request_id)
    }

    /// Stop every plugin and archive the active usage session.
    pub async fn shutdown(&self) {
        let processes: Vec<Arc<PluginProcess>> =
            self.processes.read().await.values().cloned().collect();
        for process in processes {
            process.stop().await;
        }
        self.tracker.flush();
        info!("orchestrator shut down");
    }
}

#[async_trait]
impl PluginInvoker for Orchestrator {
    /// Route an invocation to a plugin's HTTP endpoint.
    ///
    /// Reachability is checked before the call so a hung-but-alive process
    /// surfaces as a connection failure, not a timeout.
    async fn invoke(&self, plugin_id: &str, input: &Value) -> Result<Value, FamulusError> {
        let invocation_err = |kind, message: &str| FamulusError::Invocation {
            plugin: plugin_id.to_string(),
            kind,
            message: message.to_string(),
        };

        let process = self.process(plugin_id).await.map_err(|_| {
            invocation_err(InvocationErrorKind::Connection, "unknown plugin")
        })?;
        if !self.registry.read().await.get(plugin_id).map(|p| p.enabled).unwrap_or(false) {
            return Err(invocation_err(InvocationErrorKind::Connection, "plugin is disabled"));
        }
        if process.status().await != PluginStatus::Running {
            return Err(invocation_err(InvocationErrorKind::Connection, "plugin is not running"));
        }
        if !process.is_reachable().await {
            return Err(invocation_err(
                InvocationErrorKind::Connection,
                "plugin API is not answering",
            ));
        }
        let Some(port) = process.manifest().port else {
            return Err(invocation_err(
                InvocationErrorKind::Connection,
                "plugin declares no port",
            ));
        };
        self.http.call(plugin_id, port, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use famulus_model::ScriptedModel;
    use famulus_plugins::MANIFEST_FILENAME;
    use serde_json::json;
    use std::path::Path;

    fn write_plugin(root: &Path, dir: &str, manifest: serde_json::Value) {
        let d = root.join(dir);
        std::fs::create_dir_all(&d).unwrap();
        std::fs::write(d.join(MANIFEST_FILENAME), manifest.to_string()).unwrap();
    }

    fn orchestrator(root: &Path, script: Vec<String>) -> Arc<Orchestrator> {
        let model = Arc::new(ScriptedModel::new(script));
        Arc::new(Orchestrator::new(
            model,
            OrchestratorSettings::new(root, "llama3"),
        ))
    }

    #[tokio::test]
    async fn discovery_populates_the_process_table() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "echo", json!({
            "id": "echo", "name": "Echo", "version": "1.0.0", "entrypoint": "sleep 5"
        }));
        write_plugin(root.path(), "fs", json!({
            "id": "local-fileio", "name": "Files", "version": "1.0.0",
            "entrypoint": "sleep 5", "permissions": ["file_io"]
        }));

        let orch = orchestrator(root.path(), vec![]);
        assert_eq!(orch.discover().await.unwrap(), 2);
        let listed = orch.list_plugins().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "echo");
        assert_eq!(listed[0].status, PluginStatus::Stopped);
    }

    #[tokio::test]
    async fn sensitive_plugin_blocks_until_approved() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "fs", json!({
            "id": "local-fileio", "name": "Files", "version": "1.0.0",
            "entrypoint": "sleep 5", "permissions": ["file_io"]
        }));
        let orch = orchestrator(root.path(), vec![]);
        orch.discover().await.unwrap();

        let err = orch.start_plugin("local-fileio").await.unwrap_err();
        assert!(matches!(err, FamulusError::PermissionDenied { .. }));
        assert_eq!(
            orch.plugin_status("local-fileio").await.unwrap().status,
            PluginStatus::Blocked
        );

        let report = orch
            .approve_permissions("local-fileio", [Capability::FileIo].into())
            .await
            .unwrap();
        assert!(report.user_approved);
        assert!(report.missing.is_empty());

        orch.start_plugin("local-fileio").await.unwrap();
        assert_eq!(
            orch.plugin_status("local-fileio").await.unwrap().status,
            PluginStatus::Running
        );
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_plugin_cannot_start_and_leaves_the_catalog() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "echo", json!({
            "id": "echo", "name": "Echo", "version": "1.0.0", "entrypoint": "sleep 5"
        }));
        let orch = orchestrator(root.path(), vec![]);
        orch.discover().await.unwrap();

        orch.start_plugin("echo").await.unwrap();
        orch.disable_plugin("echo").await.unwrap();
        assert_eq!(
            orch.plugin_status("echo").await.unwrap().status,
            PluginStatus::Stopped
        );
        assert!(orch.start_plugin("echo").await.is_err());
        assert!(orch.catalog().await.is_empty());

        orch.enable_plugin("echo").await.unwrap();
        orch.start_plugin("echo").await.unwrap();
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn invoking_a_stopped_plugin_is_a_connection_failure() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "search", json!({
            "id": "web-search", "name": "Search", "version": "1.0.0",
            "entrypoint": "sleep 5", "port": 5102
        }));
        let orch = orchestrator(root.path(), vec![]);
        orch.discover().await.unwrap();

        let err = orch.invoke("web-search", &json!({"query": "x"})).await.unwrap_err();
        assert!(matches!(
            err,
            FamulusError::Invocation { kind: InvocationErrorKind::Connection, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_plugin_operations_fail_cleanly() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), vec![]);
        orch.discover().await.unwrap();
        assert!(orch.plugin_status("ghost").await.is_err());
        assert!(orch.enable_plugin("ghost").await.is_err());
        assert!(orch.invoke("ghost", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn prompt_without_plugins_answers_directly() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            root.path(),
            vec![json!({
                "action": "message",
                "content": {"text": "42", "markdown": false}
            })
            .to_string()],
        );
        orch.discover().await.unwrap();
        let outcome = orch.clone().handle_prompt("meaning of life?").await.unwrap();
        assert_eq!(outcome.text, "42");
        assert!(outcome.plugins_used.is_empty());
        assert_eq!(orch.plugins_accessed(), (None, vec![]));
    }

    #[tokio::test]
    async fn archive_capacity_follows_settings() {
        let root = tempfile::tempdir().unwrap();
        let mut settings = OrchestratorSettings::new(root.path(), "llama3");
        settings.max_recent_sessions = 2;
        let orch = Arc::new(Orchestrator::new(
            Arc::new(ScriptedModel::new(vec![])),
            settings,
        ));

        let tracker = orch.tracker();
        for i in 0..4 {
            tracker.record_invocation(&format!("r{i}"), "a", &json!({}), "");
        }
        tracker.flush();

        let recent = orch.recent_sessions();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "r2");
        assert_eq!(recent[1].request_id, "r3");
    }

    #[tokio::test]
    async fn rediscovery_keeps_runtime_state_for_surviving_plugins() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "echo", json!({
            "id": "echo", "name": "Echo", "version": "1.0.0", "entrypoint": "sleep 5"
        }));
        let orch = orchestrator(root.path(), vec![]);
        orch.discover().await.unwrap();
        orch.start_plugin("echo").await.unwrap();

        orch.discover().await.unwrap();
        assert_eq!(
            orch.plugin_status("echo").await.unwrap().status,
            PluginStatus::Running
        );

        // Removing the plugin directory drops and stops its process.
        std::fs::remove_dir_all(root.path().join("echo")).unwrap();
        orch.discover().await.unwrap();
        assert!(orch.plugin_status("echo").await.is_err());
    }
}
