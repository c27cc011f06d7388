//! Plugin process lifecycle.
//!
//! One `PluginProcess` per discovered manifest. All status transitions happen
//! here: `Stopped -> Blocked -> Running -> {Stopped | Error}`. Permission
//! gating is re-evaluated on every start attempt, never cached from first use.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use famulus_core::FamulusError;

use crate::manifest::PluginManifest;
use crate::permissions::{missing_sensitive, Capability, PermissionReport};
use crate::probe;

const MONITOR_POLL: Duration = Duration::from_millis(100);

/// A log file larger than this is rotated aside (one generation) on the next
/// plugin start.
const LOG_ROTATE_BYTES: u64 = 1024 * 1024;

/// Current state of a plugin process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Stopped,
    Blocked,
    Running,
    Error,
}

#[derive(Debug)]
struct RuntimeState {
    status: PluginStatus,
    last_error: Option<String>,
    granted: BTreeSet<Capability>,
    user_approved: bool,
}

/// Point-in-time view of a plugin's runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub id: String,
    pub status: PluginStatus,
    pub last_error: Option<String>,
}

/// A managed plugin child process.
pub struct PluginProcess {
    manifest: PluginManifest,
    dir: PathBuf,
    state: Arc<RwLock<RuntimeState>>,
    child: Arc<Mutex<Option<Child>>>,
    http: reqwest::Client,
    probe_timeout: Duration,
    stop_grace: Duration,
}

impl PluginProcess {
    pub fn new(manifest: PluginManifest, dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            dir: dir.into(),
            state: Arc::new(RwLock::new(RuntimeState {
                status: PluginStatus::Stopped,
                last_error: None,
                granted: BTreeSet::new(),
                user_approved: false,
            })),
            child: Arc::new(Mutex::new(None)),
            http: reqwest::Client::new(),
            probe_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, probe_timeout: Duration, stop_grace: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self.stop_grace = stop_grace;
        self
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub async fn status(&self) -> PluginStatus {
        self.state.read().await.status
    }

    pub async fn status_report(&self) -> StatusReport {
        let s = self.state.read().await;
        StatusReport {
            id: self.manifest.id.clone(),
            status: s.status,
            last_error: s.last_error.clone(),
        }
    }

    pub async fn permission_report(&self) -> PermissionReport {
        let s = self.state.read().await;
        let required: BTreeSet<_> = self.manifest.permissions.iter().copied().collect();
        let missing = required.difference(&s.granted).copied().collect();
        PermissionReport {
            required,
            granted: s.granted.clone(),
            missing,
            user_approved: s.user_approved,
        }
    }

    /// Record a one-time permission grant and mark the plugin user-approved.
    ///
    /// This is the only way to unblock a `Blocked` plugin.
    pub async fn approve_permissions(&self, granted: BTreeSet<Capability>) {
        let mut s = self.state.write().await;
        s.granted = granted;
        s.user_approved = true;
        if s.status == PluginStatus::Blocked {
            s.status = PluginStatus::Stopped;
            s.last_error = None;
        }
        info!(plugin = %self.manifest.id, "permissions approved");
    }

    /// Start the plugin process.
    ///
    /// Checks permission gating first: any required sensitive capability not
    /// yet granted transitions the plugin to `Blocked` and nothing is spawned.
    pub async fn start(&self) -> Result<(), FamulusError> {
        let required: BTreeSet<_> = self.manifest.permissions.iter().copied().collect();
        {
            let mut s = self.state.write().await;
            let missing = missing_sensitive(&required, &s.granted);
            if !missing.is_empty() {
                warn!(
                    plugin = %self.manifest.id,
                    missing = ?missing,
                    "start blocked pending user consent"
                );
                s.status = PluginStatus::Blocked;
                s.last_error = Some("user approval required for permissions".into());
                return Err(FamulusError::PermissionDenied {
                    plugin: self.manifest.id.clone(),
                    missing: missing.iter().map(|c| c.to_string()).collect(),
                });
            }
        }

        let mut slot = self.child.lock().await;
        if slot.is_some() {
            debug!(plugin = %self.manifest.id, "already running");
            return Ok(());
        }

        let (program, args) = self.manifest.command_line();
        let log_dir = self.dir.join("logs");
        std::fs::create_dir_all(&log_dir).map_err(|e| FamulusError::Process {
            plugin: self.manifest.id.clone(),
            detail: format!("create log dir: {e}"),
        })?;
        let stdout = open_log(&log_dir.join("stdout.log"), &self.manifest.id)?;
        let stderr = open_log(&log_dir.join("stderr.log"), &self.manifest.id)?;

        let spawned = Command::new(&program)
            .args(&args)
            .current_dir(&self.dir)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let detail = format!("failed to spawn '{program}': {e}");
                drop(slot);
                let mut s = self.state.write().await;
                s.status = PluginStatus::Error;
                s.last_error = Some(detail.clone());
                return Err(FamulusError::Process {
                    plugin: self.manifest.id.clone(),
                    detail,
                });
            }
        };

        info!(plugin = %self.manifest.id, pid = ?child.id(), "plugin started");
        *slot = Some(child);
        drop(slot);

        {
            let mut s = self.state.write().await;
            s.status = PluginStatus::Running;
            s.last_error = None;
        }

        self.spawn_exit_monitor();
        Ok(())
    }

    /// Background task that watches for process exit and records the outcome.
    ///
    /// A clean exit transitions to `Stopped`; a nonzero exit or signal death
    /// transitions to `Error` with the exit detail in `last_error`.
    fn spawn_exit_monitor(&self) {
        let state = self.state.clone();
        let slot = self.child.clone();
        let id = self.manifest.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(MONITOR_POLL).await;
                let mut guard = slot.lock().await;
                let Some(child) = guard.as_mut() else {
                    // stop() took the child; it owns the transition.
                    return;
                };
                match child.try_wait() {
                    Ok(None) => continue,
                    Ok(Some(exit)) => {
                        *guard = None;
                        drop(guard);
                        let mut s = state.write().await;
                        if exit.success() {
                            info!(plugin = %id, "plugin exited cleanly");
                            s.status = PluginStatus::Stopped;
                        } else {
                            let detail = match exit.code() {
                                Some(code) => format!("exited with code {code}"),
                                None => "terminated by signal".to_string(),
                            };
                            warn!(plugin = %id, detail = %detail, "plugin crashed");
                            s.status = PluginStatus::Error;
                            s.last_error = Some(detail);
                        }
                        return;
                    }
                    Err(e) => {
                        *guard = None;
                        drop(guard);
                        let mut s = state.write().await;
                        s.status = PluginStatus::Error;
                        s.last_error = Some(format!("monitor error: {e}"));
                        return;
                    }
                }
            }
        });
    }

    /// Stop the plugin process. Idempotent.
    ///
    /// Sends a graceful terminate, waits the configured grace period, then
    /// escalates to a forced kill.
    pub async fn stop(&self) {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            let mut s = self.state.write().await;
            if s.status == PluginStatus::Running {
                s.status = PluginStatus::Stopped;
            }
            return;
        };

        terminate_gracefully(&child);
        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(_) => debug!(plugin = %self.manifest.id, "plugin terminated"),
            Err(_) => {
                warn!(plugin = %self.manifest.id, "grace period elapsed; killing");
                let _ = child.kill().await;
            }
        }

        let mut s = self.state.write().await;
        s.status = PluginStatus::Stopped;
        info!(plugin = %self.manifest.id, "plugin stopped");
    }

    /// Whether the plugin's HTTP API currently answers its discovery endpoint.
    ///
    /// This is the authoritative liveness signal: a hung-but-alive process
    /// does not report as usable.
    pub async fn is_reachable(&self) -> bool {
        let Some(port) = self.manifest.port else {
            return false;
        };
        probe::probe_port(&self.http, port, self.probe_timeout).await
    }

    /// Last `n` lines of the plugin's captured stdout and stderr.
    pub fn tail_logs(&self, n: usize) -> (String, String) {
        let log_dir = self.dir.join("logs");
        (
            tail_file(&log_dir.join("stdout.log"), n),
            tail_file(&log_dir.join("stderr.log"), n),
        )
    }
}

fn open_log(path: &std::path::Path, plugin: &str) -> Result<std::fs::File, FamulusError> {
    rotate_if_large(path);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FamulusError::Process {
            plugin: plugin.to_string(),
            detail: format!("open log {}: {e}", path.display()),
        })
}

/// Move an oversized log to `<name>.1`, replacing any prior generation.
fn rotate_if_large(path: &std::path::Path) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.len() < LOG_ROTATE_BYTES {
        return;
    }
    let mut rotated = path.as_os_str().to_os_string();
    rotated.push(".1");
    if let Err(e) = std::fs::rename(path, &rotated) {
        warn!(path = %path.display(), error = %e, "log rotation failed");
    }
}

fn tail_file(path: &std::path::Path, n: usize) -> String {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(unix)]
fn terminate_gracefully(child: &Child) {
    if let Some(pid) = child.id() {
        // SIGTERM first; stop() escalates to SIGKILL after the grace period.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_child: &Child) {
    // No graceful signal available; the grace-period timeout in stop()
    // falls through to the forced kill.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PluginManifest;

    fn manifest(id: &str, entrypoint: &str, permissions: &[&str]) -> PluginManifest {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": id,
            "version": "1.0.0",
            "entrypoint": entrypoint,
            "permissions": permissions,
        }))
        .unwrap()
    }

    async fn wait_for_status(p: &PluginProcess, want: PluginStatus) -> bool {
        for _ in 0..50 {
            if p.status().await == want {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn sensitive_permissions_block_start() {
        let dir = tempfile::tempdir().unwrap();
        let p = PluginProcess::new(manifest("fs", "sleep 5", &["file_io"]), dir.path());
        let err = p.start().await.unwrap_err();
        assert!(matches!(err, FamulusError::PermissionDenied { .. }));
        assert_eq!(p.status().await, PluginStatus::Blocked);
        // Nothing was spawned.
        assert!(p.child.lock().await.is_none());
    }

    #[tokio::test]
    async fn approval_unblocks_and_start_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let p = PluginProcess::new(manifest("fs", "sleep 5", &["file_io"]), dir.path());
        assert!(p.start().await.is_err());
        p.approve_permissions([Capability::FileIo].into()).await;
        assert_eq!(p.status().await, PluginStatus::Stopped);
        p.start().await.unwrap();
        assert_eq!(p.status().await, PluginStatus::Running);
        p.stop().await;
        assert_eq!(p.status().await, PluginStatus::Stopped);
    }

    #[tokio::test]
    async fn permissionless_plugin_starts_without_approval() {
        let dir = tempfile::tempdir().unwrap();
        let p = PluginProcess::new(manifest("echo", "sleep 5", &[]), dir.path());
        p.start().await.unwrap();
        assert_eq!(p.status().await, PluginStatus::Running);
        // Re-evaluated start on a running plugin is a no-op.
        p.start().await.unwrap();
        p.stop().await;
    }

    #[tokio::test]
    async fn nonzero_exit_transitions_to_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fail.sh"), "exit 3\n").unwrap();
        let p = PluginProcess::new(manifest("boom", "sh fail.sh", &[]), dir.path());
        p.start().await.unwrap();
        assert!(wait_for_status(&p, PluginStatus::Error).await);
        let report = p.status_report().await;
        assert!(report.last_error.unwrap().contains("3"));
        assert!(!p.is_reachable().await);
    }

    #[tokio::test]
    async fn clean_exit_transitions_to_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let p = PluginProcess::new(manifest("brief", "true", &[]), dir.path());
        p.start().await.unwrap();
        assert!(wait_for_status(&p, PluginStatus::Stopped).await);
        assert!(p.status_report().await.last_error.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = PluginProcess::new(manifest("echo", "sleep 5", &[]), dir.path());
        p.start().await.unwrap();
        p.stop().await;
        p.stop().await;
        assert_eq!(p.status().await, PluginStatus::Stopped);
    }

    #[tokio::test]
    async fn oversized_log_rotates_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        let stdout_log = log_dir.join("stdout.log");
        std::fs::write(&stdout_log, vec![b'x'; (LOG_ROTATE_BYTES + 1) as usize]).unwrap();

        let p = PluginProcess::new(manifest("echo", "true", &[]), dir.path());
        p.start().await.unwrap();
        assert!(log_dir.join("stdout.log.1").exists());
        assert!(std::fs::metadata(&stdout_log).unwrap().len() < LOG_ROTATE_BYTES);
        p.stop().await;
    }

    #[tokio::test]
    async fn unreachable_without_declared_port() {
        let dir = tempfile::tempdir().unwrap();
        let p = PluginProcess::new(manifest("echo", "sleep 5", &[]), dir.path());
        assert!(!p.is_reachable().await);
    }
}
