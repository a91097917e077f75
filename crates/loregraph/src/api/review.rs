//! Review session routes

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;
use super::extract::{JsonBody, QueryParams};
use crate::error::Result;
use crate::review::{
    ApproveOutcome, ClearOutcome, DiffReport, ResourceType, RollbackOutcome, SessionInfo,
    Snapshot, TextDiff,
};

#[derive(Debug, Default, Deserialize)]
pub struct OpenSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RollbackQuery {
    pub task_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TextDiffRequest {
    pub text_a: String,
    pub text_b: String,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotsResponse {
    pub session_id: String,
    pub count: usize,
    pub snapshots: Vec<Snapshot>,
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let sessions = state.graph.list_sessions().await;
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

pub async fn open_session(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<OpenSessionRequest>,
) -> Result<(StatusCode, Json<SessionInfo>)> {
    let info = state.graph.open_session(request.session_id).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<ClearOutcome>> {
    Ok(Json(state.graph.clear_session(&session_id).await?))
}

pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SnapshotsResponse>> {
    let snapshots = state.graph.list_snapshots(&session_id).await?;
    Ok(Json(SnapshotsResponse {
        session_id,
        count: snapshots.len(),
        snapshots,
    }))
}

pub async fn diff(
    State(state): State<Arc<AppState>>,
    Path((session_id, resource_type, resource_id)): Path<(String, String, String)>,
) -> Result<Json<DiffReport>> {
    let resource_type: ResourceType = resource_type.parse()?;
    let report = state
        .graph
        .diff(&session_id, resource_type, &resource_id)
        .await?;
    Ok(Json(report))
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path((session_id, resource_type, resource_id)): Path<(String, String, String)>,
) -> Result<Json<ApproveOutcome>> {
    let resource_type: ResourceType = resource_type.parse()?;
    let outcome = state
        .graph
        .approve(&session_id, resource_type, &resource_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn rollback(
    State(state): State<Arc<AppState>>,
    Path((session_id, resource_type, resource_id)): Path<(String, String, String)>,
    QueryParams(query): QueryParams<RollbackQuery>,
) -> Result<Json<RollbackOutcome>> {
    let resource_type: ResourceType = resource_type.parse()?;
    let outcome = state
        .graph
        .rollback(&session_id, resource_type, &resource_id, query.task_description)
        .await?;
    Ok(Json(outcome))
}

pub async fn text_diff(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<TextDiffRequest>,
) -> Json<TextDiff> {
    Json(state.graph.text_diff(&request.text_a, &request.text_b))
}
