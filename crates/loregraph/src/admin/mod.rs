//! Admin module for monitoring
//!
//! Provides the event types streamed to admin clients and the statistics
//! snapshot served by the daemon.

pub mod handlers;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::GraphCounts;
use crate::review::ResourceType;

/// Events emitted after every committed graph or ledger change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    EntityCreated {
        entity_id: String,
        version: u64,
        session_id: Option<String>,
    },
    VersionCreated {
        entity_id: String,
        version: u64,
        session_id: Option<String>,
    },
    StateDeleted {
        state_id: String,
        entity_id: String,
        new_current_version: Option<u64>,
    },
    EntityDeleted {
        entity_id: String,
    },
    DirectEdgeWritten {
        edge_id: String,
        created: bool,
        session_id: Option<String>,
    },
    DirectEdgeDeleted {
        edge_id: String,
        removed_relay_links: usize,
        session_id: Option<String>,
    },
    RelayEdgeWritten {
        edge_id: String,
        version: u64,
        session_id: Option<String>,
    },
    RelayEdgeDeleted {
        edge_id: String,
        session_id: Option<String>,
    },
    ParentLinkChanged {
        child_id: String,
        parent_id: String,
        linked: bool,
    },
    SnapshotApproved {
        session_id: String,
        resource_type: ResourceType,
        resource_id: String,
    },
    SnapshotRolledBack {
        session_id: String,
        resource_type: ResourceType,
        resource_id: String,
        new_version: Option<u64>,
    },
    SessionCleared {
        session_id: String,
        approved: usize,
    },
    GarbageCollected {
        deleted_states: usize,
        deleted_entities: usize,
    },
    Checkpointed {
        generation: u64,
        entities: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Statistics about the daemon's current state
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphStats {
    #[serde(flatten)]
    pub graph: GraphCounts,
    /// Number of open review sessions
    pub sessions: u64,
    /// Snapshots pending review across all sessions
    pub pending_snapshots: u64,
    /// Mutation counter
    pub generation: u64,
}
