//! HTTP API
//!
//! Thin axum handlers over [`MemoryGraph`]. Identifiers are opaque path
//! segments; clients percent-encode them and axum decodes them again.

pub mod catalog;
pub mod context;
pub mod edges;
pub mod error;
pub mod extract;
pub mod maintenance;
pub mod nodes;
pub mod review;
pub mod server;

use axum::{
    Json, Router,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::handlers::{events_handler, stats_handler};
use crate::config::ServerConfig;
use crate::service::MemoryGraph;

pub use context::ReviewContext;
pub use server::ApiServer;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// The memory graph
    pub graph: Arc<MemoryGraph>,
    /// Server configuration
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(graph: Arc<MemoryGraph>, config: ServerConfig) -> Self {
        Self { graph, config }
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.timeout_secs.max(1));

    let api = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        // Nodes
        .route("/nodes/entities", post(nodes::create_entity))
        .route(
            "/nodes/entities/{entity_id}",
            get(nodes::get_entity).delete(nodes::delete_entity),
        )
        .route("/nodes/entities/{entity_id}/update", post(nodes::create_version))
        .route("/nodes/entities/{entity_id}/history", get(nodes::list_history))
        .route("/nodes/entities/{entity_id}/children", get(nodes::list_children))
        .route(
            "/nodes/states/{state_id}",
            get(nodes::get_state).delete(nodes::delete_state),
        )
        .route("/nodes/parent-child/link", post(nodes::link_parent))
        .route("/nodes/parent-child/unlink", post(nodes::unlink_parent))
        // Edges
        .route(
            "/edges/direct/{viewer_id}/{target_id}",
            put(edges::upsert_direct)
                .get(edges::get_direct)
                .delete(edges::delete_direct),
        )
        .route("/edges/outbound/{entity_id}", get(edges::list_outbound))
        .route(
            "/edges/relay/{viewer_id}/{target_id}/{chapter}",
            put(edges::upsert_relay).get(edges::get_relay),
        )
        .route("/edges/relay/{edge_id}", delete(edges::delete_relay))
        .route(
            "/edges/relationship/{viewer_id}/{target_id}",
            get(edges::get_relationship),
        )
        // Review
        .route(
            "/review/sessions",
            get(review::list_sessions).post(review::open_session),
        )
        .route("/review/sessions/{session_id}", delete(review::clear_session))
        .route(
            "/review/sessions/{session_id}/snapshots",
            get(review::list_snapshots),
        )
        .route(
            "/review/sessions/{session_id}/diff/{resource_type}/{resource_id}",
            get(review::diff),
        )
        .route(
            "/review/sessions/{session_id}/approve/{resource_type}/{resource_id}",
            post(review::approve),
        )
        .route(
            "/review/sessions/{session_id}/rollback/{resource_type}/{resource_id}",
            post(review::rollback),
        )
        .route("/review/diff", post(review::text_diff))
        // Maintenance
        .route("/maintenance/orphan_states", get(maintenance::orphan_states))
        .route("/maintenance/delete_states", post(maintenance::delete_states))
        .route("/maintenance/orphan_entities", get(maintenance::orphan_entities))
        .route("/maintenance/delete_entities", post(maintenance::delete_entities))
        .route("/catalog", get(catalog::catalog))
        .layer(TimeoutLayer::new(timeout));

    // Event streams stay open past the request timeout
    Router::new()
        .merge(api)
        .route("/admin/events", get(events_handler))
        .route("/admin/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "loregraph",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
