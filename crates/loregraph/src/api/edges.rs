//! Direct edge, chapter and relationship routes

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;
use super::extract::{JsonBody, QueryParams};
use super::context::ReviewContext;
use crate::error::Result;
use crate::graph::{
    DirectEdgeDeleted, DirectEdgeInput, DirectEdgeView, DirectEdgeWritten, OutboundEdge,
    RelationshipView, RelayEdgeDeleted, RelayEdgeInput, RelayEdgeView, RelayEdgeWritten,
};

#[derive(Debug, Serialize)]
pub struct OutboundResponse {
    pub entity_id: String,
    pub count: usize,
    pub edges: Vec<OutboundEdge>,
}

/// `?force=true` also unlinks the edge's chapters
#[derive(Debug, Default, Deserialize)]
pub struct DeleteDirectQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn upsert_direct(
    State(state): State<Arc<AppState>>,
    Path((viewer_id, target_id)): Path<(String, String)>,
    ReviewContext(ctx): ReviewContext,
    JsonBody(input): JsonBody<DirectEdgeInput>,
) -> Result<Json<DirectEdgeWritten>> {
    let written = state
        .graph
        .upsert_direct_edge(&viewer_id, &target_id, input, &ctx)
        .await?;
    Ok(Json(written))
}

pub async fn get_direct(
    State(state): State<Arc<AppState>>,
    Path((viewer_id, target_id)): Path<(String, String)>,
) -> Result<Json<DirectEdgeView>> {
    Ok(Json(state.graph.get_direct_edge(&viewer_id, &target_id).await?))
}

pub async fn delete_direct(
    State(state): State<Arc<AppState>>,
    Path((viewer_id, target_id)): Path<(String, String)>,
    QueryParams(query): QueryParams<DeleteDirectQuery>,
    ReviewContext(ctx): ReviewContext,
) -> Result<Json<DirectEdgeDeleted>> {
    let deleted = state
        .graph
        .delete_direct_edge(&viewer_id, &target_id, query.force, &ctx)
        .await?;
    Ok(Json(deleted))
}

pub async fn list_outbound(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<OutboundResponse>> {
    let edges = state.graph.list_outbound_edges(&entity_id).await?;
    Ok(Json(OutboundResponse {
        entity_id,
        count: edges.len(),
        edges,
    }))
}

pub async fn upsert_relay(
    State(state): State<Arc<AppState>>,
    Path((viewer_id, target_id, chapter)): Path<(String, String, String)>,
    ReviewContext(ctx): ReviewContext,
    JsonBody(input): JsonBody<RelayEdgeInput>,
) -> Result<Json<RelayEdgeWritten>> {
    let written = state
        .graph
        .upsert_relay_edge(&viewer_id, &target_id, &chapter, input, &ctx)
        .await?;
    Ok(Json(written))
}

pub async fn get_relay(
    State(state): State<Arc<AppState>>,
    Path((viewer_id, target_id, chapter)): Path<(String, String, String)>,
) -> Result<Json<RelayEdgeView>> {
    let view = state
        .graph
        .get_relay_edge(&viewer_id, &target_id, &chapter)
        .await?;
    Ok(Json(view))
}

pub async fn delete_relay(
    State(state): State<Arc<AppState>>,
    Path(edge_id): Path<String>,
    ReviewContext(ctx): ReviewContext,
) -> Result<Json<RelayEdgeDeleted>> {
    Ok(Json(state.graph.delete_relay_edge(&edge_id, &ctx).await?))
}

pub async fn get_relationship(
    State(state): State<Arc<AppState>>,
    Path((viewer_id, target_id)): Path<(String, String)>,
) -> Result<Json<RelationshipView>> {
    Ok(Json(state.graph.get_relationship(&viewer_id, &target_id).await?))
}
