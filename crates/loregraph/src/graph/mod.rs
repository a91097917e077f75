//! The versioned knowledge graph.
//!
//! Every entity lives in its own slot behind an async mutex. Edges are stored
//! in their viewer's slot and pin `(entity_id, version)` pairs on both ends;
//! the pinned states carry `in_count`/`out_count` so that referenced states
//! can never be deleted out from under an edge.

pub mod edges;
pub mod locks;
pub mod types;
pub mod versioned;
pub mod views;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::config::GraphConfig;
use crate::error::{LoreError, Result};

pub use edges::{
    DirectEdgeDeleted, DirectEdgeInput, DirectEdgeWritten, OutboundEdge, ParentLinkChange,
    RelationshipView, RelayEdgeDeleted, RelayEdgeInput, RelayEdgeView, RelayEdgeWritten,
};
pub use locks::LockedEntities;
pub use types::{DirectEdge, EntityRecord, NodeType, RelayLink, State};
pub use versioned::{EntityCreated, EntityDeleted, NewEntity, NewVersion, StateDeleted, VersionCreated};
pub use views::{CatalogEdge, CatalogEntry, ChildView, DirectEdgeView, EntityInclude, EntityView, HistoryEntry};

use locks::Slot;

/// Identity of an edge resolved from its edge id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeKey {
    pub viewer_id: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

/// Aggregate sizes of the graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounts {
    pub entities: u64,
    pub hidden_entities: u64,
    pub states: u64,
    pub direct_edges: u64,
    pub relay_links: u64,
    pub parent_links: u64,
}

/// Concurrent store of entities, states and edges
pub struct GraphStore {
    entities: DashMap<String, Slot>,
    /// state_id -> entity_id
    state_index: DashMap<String, String>,
    /// direct edge id -> endpoints
    direct_index: DashMap<String, EdgeKey>,
    /// relay edge id -> endpoints and chapter
    relay_index: DashMap<String, EdgeKey>,
    settings: GraphConfig,
    generation: AtomicU64,
}

impl GraphStore {
    pub fn new(settings: GraphConfig) -> Self {
        Self {
            entities: DashMap::new(),
            state_index: DashMap::new(),
            direct_index: DashMap::new(),
            relay_index: DashMap::new(),
            settings,
            generation: AtomicU64::new(0),
        }
    }

    /// Rebuild a store from checkpointed records.
    ///
    /// Reference counts are recomputed from the edges so that a hand-edited
    /// or truncated checkpoint cannot leave states undeletable.
    pub fn from_records(records: Vec<EntityRecord>, settings: GraphConfig) -> Result<Self> {
        let store = Self::new(settings);
        let mut records: BTreeMap<String, EntityRecord> = records
            .into_iter()
            .map(|r| (r.entity_id.clone(), r))
            .collect();

        let mut expected: HashMap<(String, u64), (u32, u32)> = HashMap::new();
        for record in records.values() {
            for edge in record.direct_edges.values() {
                expected.entry((edge.viewer_id.clone(), edge.viewer_version)).or_default().1 += 1;
                expected.entry((edge.target_id.clone(), edge.target_version)).or_default().0 += 1;
            }
            for link in record.relay_links.values() {
                expected.entry((link.viewer_id.clone(), link.viewer_version)).or_default().1 += 1;
                let chapter = expected
                    .entry((link.relay_entity_id.clone(), link.chapter_version))
                    .or_default();
                chapter.0 += 1;
                chapter.1 += 1;
                expected.entry((link.target_id.clone(), link.target_version)).or_default().0 += 1;
            }
        }

        for ((entity_id, version), _) in expected.iter() {
            let pinned = records
                .get(entity_id)
                .is_some_and(|r| r.states.contains_key(version));
            if !pinned {
                return Err(LoreError::Storage(format!(
                    "checkpoint references missing state {entity_id} v{version}"
                )));
            }
        }

        for record in records.values_mut() {
            for state in record.states.values_mut() {
                let (in_count, out_count) = expected
                    .get(&(record.entity_id.clone(), state.version))
                    .copied()
                    .unwrap_or_default();
                if state.in_count != in_count || state.out_count != out_count {
                    tracing::warn!(
                        state_id = %state.state_id,
                        "reference counts repaired on load"
                    );
                }
                state.in_count = in_count;
                state.out_count = out_count;
            }
            if let Some(max) = record.current_version() {
                record.next_version = record.next_version.max(max + 1);
            }
        }

        for (entity_id, record) in records {
            for state in record.states.values() {
                store.index_state(state);
            }
            for edge in record.direct_edges.values() {
                store.index_direct(edge);
            }
            for link in record.relay_links.values() {
                store.index_relay(link);
            }
            store.entities.insert(entity_id, Arc::new(Mutex::new(record)));
        }

        Ok(store)
    }

    pub fn settings(&self) -> &GraphConfig {
        &self.settings
    }

    /// Monotonic counter bumped on every committed mutation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn touch(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// All entity ids, sorted
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entities.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn lookup_state(&self, state_id: &str) -> Option<String> {
        self.state_index.get(state_id).map(|r| r.value().clone())
    }

    pub fn lookup_direct(&self, edge_id: &str) -> Option<EdgeKey> {
        self.direct_index.get(edge_id).map(|r| r.value().clone())
    }

    pub fn lookup_relay(&self, edge_id: &str) -> Option<EdgeKey> {
        self.relay_index.get(edge_id).map(|r| r.value().clone())
    }

    pub(crate) fn index_state(&self, state: &State) {
        self.state_index
            .insert(state.state_id.clone(), state.entity_id.clone());
    }

    pub(crate) fn unindex_state(&self, state_id: &str) {
        self.state_index.remove(state_id);
    }

    pub(crate) fn index_direct(&self, edge: &DirectEdge) {
        self.direct_index.insert(
            edge.edge_id.clone(),
            EdgeKey {
                viewer_id: edge.viewer_id.clone(),
                target_id: edge.target_id.clone(),
                chapter: None,
            },
        );
    }

    pub(crate) fn unindex_direct(&self, edge_id: &str) {
        self.direct_index.remove(edge_id);
    }

    pub(crate) fn index_relay(&self, link: &RelayLink) {
        self.relay_index.insert(
            link.edge_id.clone(),
            EdgeKey {
                viewer_id: link.viewer_id.clone(),
                target_id: link.target_id.clone(),
                chapter: Some(link.chapter.clone()),
            },
        );
    }

    pub(crate) fn unindex_relay(&self, edge_id: &str) {
        self.relay_index.remove(edge_id);
    }

    /// Drop a removed entity's slot from the map
    pub(crate) fn forget_entity(&self, record: &EntityRecord) {
        for state in record.states.values() {
            self.unindex_state(&state.state_id);
        }
        self.entities.remove(&record.entity_id);
    }

    /// Clone every record held by a full lock set
    pub(crate) fn records_of(locked: &LockedEntities) -> Vec<EntityRecord> {
        locked
            .ids()
            .filter_map(|id| locked.get(id).cloned())
            .collect()
    }

    /// Consistent copy of every entity record
    pub async fn export(&self) -> Vec<EntityRecord> {
        let locked = self.lock_all().await;
        Self::records_of(&locked)
    }

    /// Size statistics, gathered one entity at a time
    pub async fn counts(&self) -> GraphCounts {
        let mut counts = GraphCounts::default();
        for id in self.entity_ids() {
            let locked = self.lock_entities([id.as_str()]).await;
            if let Some(record) = locked.get(&id) {
                counts.entities += 1;
                if record.hidden {
                    counts.hidden_entities += 1;
                }
                counts.states += record.states.len() as u64;
                counts.direct_edges += record.direct_edges.len() as u64;
                counts.relay_links += record.relay_links.len() as u64;
                counts.parent_links += record.parents.len() as u64;
            }
        }
        counts
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}
