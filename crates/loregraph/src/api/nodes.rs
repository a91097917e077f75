//! Entity, state and parent/child routes

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use super::AppState;
use super::extract::{JsonBody, QueryParams};
use super::context::ReviewContext;
use crate::error::Result;
use crate::graph::{
    ChildView, EntityCreated, EntityDeleted, EntityInclude, EntityView, NewEntity, NewVersion,
    NodeType, State as GraphState, StateDeleted, VersionCreated,
};

#[derive(Debug, Deserialize)]
pub struct CreateEntityRequest {
    pub entity_id: String,
    pub node_type: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub task_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IncludeQuery {
    pub include_basic: Option<bool>,
    pub include_history: Option<bool>,
    pub include_edges: Option<bool>,
    pub include_children: Option<bool>,
}

impl From<IncludeQuery> for EntityInclude {
    fn from(query: IncludeQuery) -> Self {
        let defaults = EntityInclude::default();
        Self {
            basic: query.include_basic.unwrap_or(defaults.basic),
            history: query.include_history.unwrap_or(defaults.history),
            edges: query.include_edges.unwrap_or(defaults.edges),
            children: query.include_children.unwrap_or(defaults.children),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ParentLinkRequest {
    pub child_id: String,
    pub parent_id: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entity_id: String,
    pub count: usize,
    pub history: Vec<GraphState>,
}

#[derive(Debug, Serialize)]
pub struct ChildrenResponse {
    pub parent_id: String,
    pub count: usize,
    pub children: Vec<ChildView>,
}

pub async fn create_entity(
    State(state): State<Arc<AppState>>,
    ReviewContext(ctx): ReviewContext,
    JsonBody(request): JsonBody<CreateEntityRequest>,
) -> Result<(StatusCode, Json<EntityCreated>)> {
    let node_type: NodeType = request.node_type.parse()?;
    let created = state
        .graph
        .create_entity(
            NewEntity {
                entity_id: request.entity_id,
                node_type,
                name: request.name,
                content: request.content,
                task_description: request.task_description,
            },
            &ctx,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    QueryParams(include): QueryParams<IncludeQuery>,
) -> Result<Json<EntityView>> {
    let view = state.graph.get_entity(&entity_id, include.into()).await?;
    Ok(Json(view))
}

pub async fn create_version(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    ReviewContext(ctx): ReviewContext,
    JsonBody(request): JsonBody<NewVersion>,
) -> Result<(StatusCode, Json<VersionCreated>)> {
    let created = state.graph.create_version(&entity_id, request, &ctx).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityDeleted>> {
    Ok(Json(state.graph.delete_entity(&entity_id).await?))
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<HistoryResponse>> {
    let history = state.graph.list_history(&entity_id).await?;
    Ok(Json(HistoryResponse {
        entity_id,
        count: history.len(),
        history,
    }))
}

pub async fn list_children(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<ChildrenResponse>> {
    let children = state.graph.list_children(&entity_id).await?;
    Ok(Json(ChildrenResponse {
        parent_id: entity_id,
        count: children.len(),
        children,
    }))
}

pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(state_id): Path<String>,
) -> Result<Json<GraphState>> {
    Ok(Json(state.graph.get_state(&state_id).await?))
}

pub async fn delete_state(
    State(state): State<Arc<AppState>>,
    Path(state_id): Path<String>,
) -> Result<Json<StateDeleted>> {
    Ok(Json(state.graph.delete_state(&state_id).await?))
}

pub async fn link_parent(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<ParentLinkRequest>,
) -> Result<Json<Value>> {
    let change = state
        .graph
        .link_parent(&request.child_id, &request.parent_id)
        .await?;
    Ok(Json(json!({
        "child_id": change.child_id,
        "parent_id": change.parent_id,
        "created": change.changed,
    })))
}

pub async fn unlink_parent(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<ParentLinkRequest>,
) -> Result<Json<Value>> {
    let change = state
        .graph
        .unlink_parent(&request.child_id, &request.parent_id)
        .await?;
    Ok(Json(json!({
        "child_id": change.child_id,
        "parent_id": change.parent_id,
        "deleted": change.changed,
    })))
}
