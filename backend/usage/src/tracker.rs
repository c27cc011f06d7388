//! Request-scoped plugin usage tracking.
//!
//! One active session at a time, keyed by request id. A new request id
//! archives the prior session into a bounded ring buffer; archived sessions
//! are immutable. The tracker's mutex is the only explicitly guarded shared
//! structure in the runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Default capacity of the archived-session ring buffer.
pub const DEFAULT_MAX_RECENT: usize = 20;

/// A single plugin invocation. Result fields are set exactly once, after
/// execution completes.
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub plugin_id: String,
    pub input: Value,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Order within the request session, monotonically increasing.
    pub index: usize,
    pub success: Option<bool>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Aggregate view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub request_id: String,
    pub total_invocations: usize,
    pub unique_plugins: usize,
    pub plugin_counts: HashMap<String, usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// An immutable, archived session.
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedSession {
    pub request_id: String,
    pub archived_at: DateTime<Utc>,
    pub invocations: Vec<Invocation>,
    pub summary: SessionSummary,
}

#[derive(Debug)]
struct ActiveSession {
    request_id: String,
    invocations: Vec<Invocation>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TrackerState {
    active: Option<ActiveSession>,
    recent: VecDeque<ArchivedSession>,
}

/// Thread-safe, append-only usage tracker.
pub struct UsageTracker {
    state: Mutex<TrackerState>,
    max_recent: usize,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECENT)
    }
}

impl UsageTracker {
    pub fn new(max_recent: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            max_recent: max_recent.max(1),
        }
    }

    /// Record an invocation for `request_id`, returning its session index.
    ///
    /// A request id different from the active session's archives the prior
    /// session first.
    pub fn record_invocation(
        &self,
        request_id: &str,
        plugin_id: &str,
        input: &Value,
        reason: &str,
    ) -> usize {
        let mut state = self.lock();
        let session = Self::session_for(&mut state, request_id, self.max_recent);
        let index = session.invocations.len();
        session.invocations.push(Invocation {
            plugin_id: plugin_id.to_string(),
            input: input.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
            index,
            success: None,
            result: None,
            error: None,
            duration_ms: None,
        });
        session.last_activity = Utc::now();
        debug!(request_id, plugin = plugin_id, index, "recorded invocation");
        index
    }

    /// Set the outcome of a recorded invocation. Each outcome is written at
    /// most once; later writes are ignored with a warning.
    pub fn update_result(
        &self,
        request_id: &str,
        index: usize,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
        duration_ms: u64,
    ) {
        let mut state = self.lock();
        let Some(session) = state.active.as_mut().filter(|s| s.request_id == request_id) else {
            warn!(request_id, index, "result for unknown or archived session dropped");
            return;
        };
        let Some(invocation) = session.invocations.get_mut(index) else {
            warn!(request_id, index, "result for unknown invocation index dropped");
            return;
        };
        if invocation.success.is_some() {
            warn!(request_id, index, "invocation result already set; ignoring");
            return;
        }
        invocation.success = Some(success);
        invocation.result = result;
        invocation.error = error;
        invocation.duration_ms = Some(duration_ms);
        session.last_activity = Utc::now();
    }

    /// Whether this call would duplicate the immediately preceding invocation
    /// of the same session. Input comparison is deep equality, independent of
    /// key order. Non-consecutive repeats are allowed.
    pub fn is_consecutive_duplicate(
        &self,
        request_id: &str,
        plugin_id: &str,
        input: &Value,
    ) -> bool {
        let state = self.lock();
        let Some(session) = state.active.as_ref().filter(|s| s.request_id == request_id) else {
            return false;
        };
        match session.invocations.last() {
            Some(last) => last.plugin_id == plugin_id && last.input == *input,
            None => false,
        }
    }

    /// All invocations for a request, active or archived.
    pub fn session_invocations(&self, request_id: &str) -> Vec<Invocation> {
        let state = self.lock();
        if let Some(session) = state.active.as_ref().filter(|s| s.request_id == request_id) {
            return session.invocations.clone();
        }
        state
            .recent
            .iter()
            .find(|a| a.request_id == request_id)
            .map(|a| a.invocations.clone())
            .unwrap_or_default()
    }

    /// Plugin ids accessed by the current request, or the most recent one.
    pub fn plugins_accessed(&self) -> (Option<String>, Vec<String>) {
        let state = self.lock();
        if let Some(session) = state.active.as_ref() {
            if !session.invocations.is_empty() {
                return (
                    Some(session.request_id.clone()),
                    dedup_plugins(&session.invocations),
                );
            }
        }
        match state.recent.back() {
            Some(archived) => (
                Some(archived.request_id.clone()),
                dedup_plugins(&archived.invocations),
            ),
            None => (None, Vec::new()),
        }
    }

    /// Summary of one session, active or archived.
    pub fn session_summary(&self, request_id: &str) -> Option<SessionSummary> {
        let state = self.lock();
        if let Some(session) = state.active.as_ref().filter(|s| s.request_id == request_id) {
            return Some(summarize(request_id, &session.invocations));
        }
        state
            .recent
            .iter()
            .find(|a| a.request_id == request_id)
            .map(|a| a.summary.clone())
    }

    /// Summaries of archived sessions, oldest first.
    pub fn recent_sessions(&self) -> Vec<SessionSummary> {
        self.lock().recent.iter().map(|a| a.summary.clone()).collect()
    }

    /// Archive the active session if it has been idle longer than `max_idle`,
    /// and evict archived sessions older than that age.
    pub fn evict_idle(&self, max_idle: Duration) {
        let mut state = self.lock();
        let now = Utc::now();
        let stale = state
            .active
            .as_ref()
            .is_some_and(|s| now - s.last_activity > max_idle);
        if stale {
            Self::archive_active(&mut state, self.max_recent);
        }
        state.recent.retain(|a| now - a.archived_at <= max_idle);
    }

    /// Archive whatever session is active. Used at shutdown.
    pub fn flush(&self) {
        let mut state = self.lock();
        Self::archive_active(&mut state, self.max_recent);
    }

    fn session_for<'a>(
        state: &'a mut TrackerState,
        request_id: &str,
        max_recent: usize,
    ) -> &'a mut ActiveSession {
        let same = state
            .active
            .as_ref()
            .is_some_and(|s| s.request_id == request_id);
        if !same {
            Self::archive_active(state, max_recent);
            state.active = None;
        }
        state.active.get_or_insert_with(|| ActiveSession {
            request_id: request_id.to_string(),
            invocations: Vec::new(),
            last_activity: Utc::now(),
        })
    }

    fn archive_active(state: &mut TrackerState, max_recent: usize) {
        let Some(session) = state.active.take() else {
            return;
        };
        if session.invocations.is_empty() {
            return;
        }
        let summary = summarize(&session.request_id, &session.invocations);
        state.recent.push_back(ArchivedSession {
            request_id: session.request_id,
            archived_at: Utc::now(),
            invocations: session.invocations,
            summary,
        });
        while state.recent.len() > max_recent {
            state.recent.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned lock means a panic mid-update; the tracker is advisory
        // state, so continue with whatever is there.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn dedup_plugins(invocations: &[Invocation]) -> Vec<String> {
    let mut seen = Vec::new();
    for inv in invocations {
        if !seen.contains(&inv.plugin_id) {
            seen.push(inv.plugin_id.clone());
        }
    }
    seen
}

fn summarize(request_id: &str, invocations: &[Invocation]) -> SessionSummary {
    let mut plugin_counts: HashMap<String, usize> = HashMap::new();
    for inv in invocations {
        *plugin_counts.entry(inv.plugin_id.clone()).or_insert(0) += 1;
    }
    SessionSummary {
        request_id: request_id.to_string(),
        total_invocations: invocations.len(),
        unique_plugins: plugin_counts.len(),
        plugin_counts,
        started_at: invocations.first().map(|i| i.timestamp),
        ended_at: invocations.last().map(|i| i.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indices_are_monotonic() {
        let t = UsageTracker::default();
        assert_eq!(t.record_invocation("r1", "a", &json!({}), ""), 0);
        assert_eq!(t.record_invocation("r1", "b", &json!({}), ""), 1);
        assert_eq!(t.record_invocation("r1", "a", &json!({}), ""), 2);
    }

    #[test]
    fn consecutive_duplicate_is_flagged() {
        let t = UsageTracker::default();
        let input = json!({"operation": "read", "path": "a.txt"});
        t.record_invocation("r1", "local-fileio", &input, "read");
        assert!(t.is_consecutive_duplicate("r1", "local-fileio", &input));
    }

    #[test]
    fn duplicate_comparison_ignores_key_order() {
        let t = UsageTracker::default();
        let first = serde_json::from_str::<Value>(r#"{"operation":"read","path":"a.txt"}"#).unwrap();
        let reordered =
            serde_json::from_str::<Value>(r#"{"path":"a.txt","operation":"read"}"#).unwrap();
        t.record_invocation("r1", "local-fileio", &first, "");
        assert!(t.is_consecutive_duplicate("r1", "local-fileio", &reordered));
    }

    #[test]
    fn intervening_call_clears_the_duplicate_window() {
        let t = UsageTracker::default();
        let input = json!({"q": "rust"});
        t.record_invocation("r1", "web-search", &input, "");
        t.record_invocation("r1", "local-fileio", &json!({"path": "x"}), "");
        // Same input again, but not consecutive: allowed.
        assert!(!t.is_consecutive_duplicate("r1", "web-search", &input));
    }

    #[test]
    fn different_session_does_not_inherit_duplicates() {
        let t = UsageTracker::default();
        let input = json!({"q": "rust"});
        t.record_invocation("r1", "web-search", &input, "");
        assert!(!t.is_consecutive_duplicate("r2", "web-search", &input));
    }

    #[test]
    fn new_request_id_archives_prior_session() {
        let t = UsageTracker::default();
        t.record_invocation("r1", "a", &json!({}), "");
        t.record_invocation("r2", "b", &json!({}), "");
        let recent = t.recent_sessions();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].request_id, "r1");
        // Archived sessions stay queryable.
        assert_eq!(t.session_invocations("r1").len(), 1);
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let t = UsageTracker::new(2);
        for i in 0..4 {
            t.record_invocation(&format!("r{i}"), "a", &json!({}), "");
        }
        t.flush();
        let recent = t.recent_sessions();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "r2");
        assert_eq!(recent[1].request_id, "r3");
    }

    #[test]
    fn results_are_set_exactly_once() {
        let t = UsageTracker::default();
        let idx = t.record_invocation("r1", "a", &json!({}), "");
        t.update_result("r1", idx, true, Some(json!({"ok": true})), None, 12);
        t.update_result("r1", idx, false, None, Some("late write".into()), 99);
        let inv = &t.session_invocations("r1")[idx];
        assert_eq!(inv.success, Some(true));
        assert!(inv.error.is_none());
        assert_eq!(inv.duration_ms, Some(12));
    }

    #[test]
    fn plugins_accessed_reports_current_then_most_recent() {
        let t = UsageTracker::default();
        assert_eq!(t.plugins_accessed(), (None, vec![]));
        t.record_invocation("r1", "a", &json!({}), "");
        t.record_invocation("r1", "b", &json!({}), "");
        t.record_invocation("r1", "a", &json!({}), "");
        let (id, plugins) = t.plugins_accessed();
        assert_eq!(id.as_deref(), Some("r1"));
        assert_eq!(plugins, vec!["a".to_string(), "b".to_string()]);
        t.flush();
        let (id, plugins) = t.plugins_accessed();
        assert_eq!(id.as_deref(), Some("r1"));
        assert_eq!(plugins.len(), 2);
    }

    #[test]
    fn idle_sessions_are_archived_and_old_archives_purged() {
        let t = UsageTracker::default();
        t.record_invocation("r1", "a", &json!({}), "");
        // Everything is older than a negative idle threshold.
        t.evict_idle(Duration::seconds(-1));
        assert_eq!(t.plugins_accessed(), (None, vec![]));

        t.record_invocation("r2", "b", &json!({}), "");
        // Generous threshold leaves the active session alone.
        t.evict_idle(Duration::hours(1));
        assert_eq!(t.session_invocations("r2").len(), 1);
    }

    #[test]
    fn summary_counts_per_plugin() {
        let t = UsageTracker::default();
        t.record_invocation("r1", "a", &json!({}), "");
        t.record_invocation("r1", "a", &json!({"x": 1}), "");
        t.record_invocation("r1", "b", &json!({}), "");
        let s = t.session_summary("r1").unwrap();
        assert_eq!(s.total_invocations, 3);
        assert_eq!(s.unique_plugins, 2);
        assert_eq!(s.plugin_counts["a"], 2);
    }
}
