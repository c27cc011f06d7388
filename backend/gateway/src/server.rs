//! HTTP gateway server.
//!
//! Thin JSON layer over the orchestrator. Handlers do no orchestration work
//! of their own; they translate between HTTP and orchestrator calls and map
//! `FamulusError` variants onto status codes.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use famulus_agent::{Orchestrator, TurnOutcome};
use famulus_core::FamulusError;
use famulus_plugins::{Capability, PermissionReport, StatusReport};

/// Error wrapper giving each `FamulusError` variant an HTTP status.
struct ApiError(FamulusError);

impl From<FamulusError> for ApiError {
    fn from(err: FamulusError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FamulusError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            FamulusError::Process { detail, .. } if detail.contains("unknown plugin") => {
                StatusCode::NOT_FOUND
            }
            FamulusError::Process { detail, .. } if detail.contains("disabled") => {
                StatusCode::CONFLICT
            }
            FamulusError::Invocation { .. } | FamulusError::Model(_) => StatusCode::BAD_GATEWAY,
            FamulusError::Manifest(_) | FamulusError::Protocol { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/plugins", get(list_plugins))
        .route("/api/plugins/:id/status", get(plugin_status))
        .route("/api/plugins/:id/permissions", get(permissions).post(approve_permissions))
        .route("/api/plugins/:id/start", post(start_plugin))
        .route("/api/plugins/:id/stop", post(stop_plugin))
        .route("/api/plugins/:id/enable", post(enable_plugin))
        .route("/api/plugins/:id/disable", post(disable_plugin))
        .route("/api/plugins/:id/logs", get(plugin_logs))
        .route("/api/generate", post(generate))
        .route("/api/usage/accessed", get(plugins_accessed))
        .route("/api/usage/recent", get(recent_sessions))
        .route("/api/usage/:request_id", get(session_summary))
        .with_state(orchestrator)
}

/// Bind and serve until the process is signalled to stop.
pub async fn start_server(addr: SocketAddr, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let app = router(orchestrator.clone());
    info!(%addr, "gateway listening");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await?;
    Ok(())
}

async fn shutdown_signal(orchestrator: Arc<Orchestrator>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    orchestrator.shutdown().await;
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_plugins(State(orch): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    Json(json!({ "plugins": orch.list_plugins().await }))
}

async fn plugin_status(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(orch.plugin_status(&id).await?))
}

async fn permissions(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<PermissionReport>, ApiError> {
    Ok(Json(orch.permission_report(&id).await?))
}

#[derive(Deserialize)]
struct ApprovalRequest {
    granted: BTreeSet<Capability>,
}

async fn approve_permissions(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalRequest>,
) -> Result<Json<PermissionReport>, ApiError> {
    Ok(Json(orch.approve_permissions(&id, body.granted).await?))
}

async fn start_plugin(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(orch.start_plugin(&id).await?))
}

async fn stop_plugin(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(orch.stop_plugin(&id).await?))
}

async fn enable_plugin(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    orch.enable_plugin(&id).await?;
    Ok(Json(json!({ "enabled": true })))
}

async fn disable_plugin(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    orch.disable_plugin(&id).await?;
    Ok(Json(json!({ "enabled": false })))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_lines")]
    lines: usize,
}

fn default_log_lines() -> usize {
    50
}

async fn plugin_logs(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (stdout, stderr) = orch.tail_logs(&id, query.lines).await?;
    Ok(Json(json!({ "stdout": stdout, "stderr": stderr })))
}

#[derive(Deserialize)]
struct GenerateRequest {
    prompt: String,
    /// Optional caller-supplied request id; one is generated otherwise.
    request_id: Option<String>,
}

async fn generate(
    State(orch): State<Arc<Orchestrator>>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let outcome = match &body.request_id {
        Some(id) => orch.clone().handle_prompt_as(&body.prompt, id).await?,
        None => orch.clone().handle_prompt(&body.prompt).await?,
    };
    Ok(Json(outcome))
}

async fn plugins_accessed(State(orch): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    let (request_id, plugins) = orch.plugins_accessed();
    Json(json!({ "request_id": request_id, "plugins": plugins }))
}

async fn recent_sessions(State(orch): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    Json(json!({ "sessions": orch.recent_sessions() }))
}

async fn session_summary(
    State(orch): State<Arc<Orchestrator>>,
    Path(request_id): Path<String>,
) -> Response {
    match orch.session_summary(&request_id) {
        Some(summary) => Json(summary).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown session" })),
        )
            .into_response(),
    }
}
