use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;
use crate::graph::CatalogEntry;

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub count: usize,
    pub entities: Vec<CatalogEntry>,
}

/// Visible entities with their outbound edges and chapter counts
pub async fn catalog(State(state): State<Arc<AppState>>) -> Json<CatalogResponse> {
    let entities = state.graph.catalog().await;
    Json(CatalogResponse {
        count: entities.len(),
        entities,
    })
}
