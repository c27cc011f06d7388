//! HTTP liveness probe.
//!
//! Process-alive is not the same as usable: a plugin counts as live only when
//! its discovery endpoint answers on the declared port.

use std::time::Duration;

use tracing::debug;

/// Probe a plugin's discovery endpoint on localhost.
pub async fn probe_port(client: &reqwest::Client, port: u16, timeout: Duration) -> bool {
    let url = format!("http://127.0.0.1:{port}/api/plugins");
    match client.get(&url).timeout(timeout).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(port, error = %e, "liveness probe failed");
            false
        }
    }
}
