//! Test utilities for loregraph - fixtures shared by unit and integration tests

use std::sync::Arc;

use axum::Router;

use crate::api::{AppState, create_router};
use crate::config::Config;
use crate::graph::{DirectEdgeInput, NewEntity, NewVersion, NodeType, RelayEdgeInput};
use crate::review::WriteContext;
use crate::service::MemoryGraph;

/// Config that never touches the file system
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.storage.persist = false;
    config
}

pub fn new_graph() -> MemoryGraph {
    MemoryGraph::new(&test_config())
}

/// Router over `graph` with the default server settings
pub fn test_router(graph: Arc<MemoryGraph>) -> Router {
    create_router(Arc::new(AppState::new(graph, test_config().server)))
}

pub fn character(entity_id: &str, name: &str, content: &str) -> NewEntity {
    entity(entity_id, NodeType::Character, name, content)
}

pub fn entity(entity_id: &str, node_type: NodeType, name: &str, content: &str) -> NewEntity {
    NewEntity {
        entity_id: entity_id.to_string(),
        node_type,
        name: name.to_string(),
        content: content.to_string(),
        task_description: None,
    }
}

pub fn version(content: &str) -> NewVersion {
    NewVersion {
        content: content.to_string(),
        ..NewVersion::default()
    }
}

pub fn direct(relation: &str, content: &str) -> DirectEdgeInput {
    DirectEdgeInput {
        relation: relation.to_string(),
        content: content.to_string(),
        ..DirectEdgeInput::default()
    }
}

pub fn chapter(content: &str) -> RelayEdgeInput {
    RelayEdgeInput {
        content: content.to_string(),
        ..RelayEdgeInput::default()
    }
}

/// Two characters `char_a` and `char_b` joined by an untracked direct edge
pub async fn seed_pair(graph: &MemoryGraph) {
    let untracked = WriteContext::Untracked;
    for (id, name) in [("char_a", "Alice"), ("char_b", "Bob")] {
        if let Err(e) = graph
            .create_entity(character(id, name, &format!("{name} v1")), &untracked)
            .await
        {
            panic!("failed to seed {id}: {e}");
        }
    }
    if let Err(e) = graph
        .upsert_direct_edge("char_a", "char_b", direct("KNOWS", "met at the inn"), &untracked)
        .await
    {
        panic!("failed to seed edge: {e}");
    }
}
