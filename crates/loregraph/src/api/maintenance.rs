//! Garbage collection routes

use axum::{
    Json,
    extract::State,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;
use super::extract::{JsonBody, QueryParams};
use crate::error::Result;
use crate::maintenance::{
    BatchDeleteReport, DEFAULT_ORPHAN_LIMIT, OrphanEntity, OrphanMode, OrphanState,
};

#[derive(Debug, Deserialize)]
pub struct OrphanQuery {
    pub mode: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteStatesRequest {
    pub state_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteEntitiesRequest {
    pub entity_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OrphanStatesResponse {
    pub mode: OrphanMode,
    pub count: usize,
    pub states: Vec<OrphanState>,
}

#[derive(Debug, Serialize)]
pub struct OrphanEntitiesResponse {
    pub count: usize,
    pub entities: Vec<OrphanEntity>,
}

pub async fn orphan_states(
    State(state): State<Arc<AppState>>,
    QueryParams(query): QueryParams<OrphanQuery>,
) -> Result<Json<OrphanStatesResponse>> {
    let mode = match query.mode.as_deref() {
        Some(mode) => mode.parse()?,
        None => OrphanMode::default(),
    };
    let limit = query.limit.unwrap_or(DEFAULT_ORPHAN_LIMIT);
    let states = state.graph.find_orphan_states(mode, limit).await;
    Ok(Json(OrphanStatesResponse {
        mode,
        count: states.len(),
        states,
    }))
}

pub async fn delete_states(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<DeleteStatesRequest>,
) -> Result<Json<BatchDeleteReport>> {
    Ok(Json(state.graph.delete_states_batch(&request.state_ids).await?))
}

pub async fn orphan_entities(
    State(state): State<Arc<AppState>>,
    QueryParams(query): QueryParams<OrphanQuery>,
) -> Json<OrphanEntitiesResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_ORPHAN_LIMIT);
    let entities = state.graph.find_orphan_entities(limit).await;
    Json(OrphanEntitiesResponse {
        count: entities.len(),
        entities,
    })
}

pub async fn delete_entities(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<DeleteEntitiesRequest>,
) -> Result<Json<BatchDeleteReport>> {
    Ok(Json(state.graph.delete_entities_batch(&request.entity_ids).await?))
}
