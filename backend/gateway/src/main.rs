//! Famulus daemon entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use famulus_agent::{Orchestrator, OrchestratorSettings};
use famulus_model::OllamaClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = famulus_config::load_default().await?;
    logging::init_logger(&config.logging.dir, &config.logging.level);
    info!(model = %config.model.model, "starting famulus");

    let model = Arc::new(
        OllamaClient::new()
            .with_base_url(&config.model.base_url)
            .with_timeout(Duration::from_secs(config.model.timeout_secs)),
    );

    let mut settings = OrchestratorSettings::new(&config.plugins.dir, &config.model.model);
    settings.max_iterations = config.agent.max_iterations;
    settings.invoke_timeout = Duration::from_secs(config.plugins.invoke_timeout_secs);
    settings.probe_timeout = Duration::from_millis(config.plugins.probe_timeout_ms);
    settings.stop_grace = Duration::from_secs(config.plugins.stop_grace_secs);
    settings.max_recent_sessions = config.usage.max_recent_sessions;

    let orchestrator = Arc::new(Orchestrator::new(model, settings));
    let discovered = orchestrator.discover().await?;
    info!(discovered, "plugin discovery finished");

    spawn_usage_eviction(&orchestrator, config.usage.session_max_age_secs);

    let addr: SocketAddr = config
        .gateway
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid gateway address: {}", config.gateway.bind_addr()))?;
    famulus_gateway::start_server(addr, orchestrator).await
}

/// Periodically archive idle usage sessions and purge old archives.
fn spawn_usage_eviction(orchestrator: &Arc<Orchestrator>, max_age_secs: u64) {
    let tracker = orchestrator.tracker();
    let max_age = chrono::Duration::seconds(max_age_secs as i64);
    let period = Duration::from_secs(max_age_secs.max(60) / 4);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            tracker.evict_idle(max_age);
        }
    });
    if max_age_secs == 0 {
        warn!("session_max_age_secs is 0; sessions are archived almost immediately");
    }
}
