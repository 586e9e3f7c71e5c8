// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface (spec.md §6): intent interpretation/confirmation,
//! execution, and admin endpoints over the process registry.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::application::launcher::Launcher;
use crate::application::orchestrator::Orchestrator;
use crate::application::registry::ServerRegistry;
use crate::domain::errors::{ErrorBody, ErrorKind};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ServerRegistry>,
    pub launcher: Arc<Launcher>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/intent/interpret", post(interpret))
        .route("/intent/confirm", post(confirm))
        .route("/admin/servers", get(list_servers))
        .route("/admin/servers/{name}/reset", post(reset_server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct ApiError(ErrorKind);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ErrorKind::ServerNotFound(_) | ErrorKind::ToolNotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::ValidationError(_) | ErrorKind::ToolInvalidParams(_, _) => StatusCode::BAD_REQUEST,
            ErrorKind::ConnectionTimeout | ErrorKind::ToolExecutionTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ServerUnavailable(_) | ErrorKind::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body: ErrorBody = self.0.into();
        (status, Json(body)).into_response()
    }
}

impl From<ErrorKind> for ApiError {
    fn from(value: ErrorKind) -> Self {
        Self(value)
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct InterpretRequest {
    user_id: String,
    query: String,
}

#[derive(Debug, Serialize)]
struct InterpretResponse {
    session_id: Uuid,
    status: String,
    message: String,
    pending_tool_calls: Vec<crate::domain::session::ToolCallSpec>,
}

async fn interpret(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InterpretRequest>,
) -> Result<Json<InterpretResponse>, ApiError> {
    let outcome = state.orchestrator.interpret(&req.user_id, &req.query).await?;
    Ok(Json(InterpretResponse {
        session_id: outcome.session_id,
        status: format!("{:?}", outcome.status).to_lowercase(),
        message: outcome.message,
        pending_tool_calls: outcome.pending_tool_calls,
    }))
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    session_id: Uuid,
    user_input: String,
}

/// spec.md §6: `confirm` never raises, so this mirrors `ConfirmOutcome`
/// directly rather than riding the `ApiError`/`Result` path every other
/// handler uses.
#[derive(Debug, Serialize)]
struct ConfirmResponse {
    session_id: Uuid,
    success: bool,
    content: Option<String>,
    error: Option<ErrorBody>,
}

async fn confirm(State(state): State<Arc<AppState>>, Json(req): Json<ConfirmRequest>) -> Json<ConfirmResponse> {
    let outcome = state.orchestrator.confirm(req.session_id, &req.user_input).await;
    Json(ConfirmResponse {
        session_id: outcome.session_id,
        success: outcome.success,
        content: outcome.content,
        error: outcome.error,
    })
}

#[derive(Debug, Serialize)]
struct ServerSummary {
    name: String,
    enabled: bool,
    running: bool,
    marked_failed: bool,
    consecutive_failures: u32,
    restart_count: u64,
}

async fn list_servers(State(state): State<Arc<AppState>>) -> Json<Vec<ServerSummary>> {
    let mut summaries = Vec::new();
    for entry in state.registry.all() {
        let status = entry.status.lock().await;
        summaries.push(ServerSummary {
            name: entry.config.name.clone(),
            enabled: status.enabled,
            running: status.running,
            marked_failed: status.marked_failed,
            consecutive_failures: status.consecutive_failures,
            restart_count: status.restart_count,
        });
    }
    Json(summaries)
}

async fn reset_server(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let entry = state.registry.get(&name)?;
    {
        let mut status = entry.status.lock().await;
        status.reset_failures();
    }
    state.launcher.start_server(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
