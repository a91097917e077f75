//! Read-side projections: entity views, children and the catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GraphStore;
use super::edges::{OutboundEdge, UNNAMED};
use super::types::{DirectEdge, NodeType, State};
use crate::error::Result;

/// Which sections of an entity view to populate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EntityInclude {
    #[serde(default = "default_true")]
    pub basic: bool,
    #[serde(default)]
    pub history: bool,
    #[serde(default)]
    pub edges: bool,
    #[serde(default)]
    pub children: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EntityInclude {
    fn default() -> Self {
        Self {
            basic: true,
            history: false,
            edges: false,
            children: false,
        }
    }
}

impl EntityInclude {
    pub fn all() -> Self {
        Self {
            basic: true,
            history: true,
            edges: true,
            children: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state_id: String,
    pub version: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub task_description: Option<String>,
    pub in_count: u32,
    pub out_count: u32,
}

impl From<&State> for HistoryEntry {
    fn from(state: &State) -> Self {
        Self {
            state_id: state.state_id.clone(),
            version: state.version,
            name: state.name.clone(),
            created_at: state.created_at,
            task_description: state.task_description.clone(),
            in_count: state.in_count,
            out_count: state.out_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildView {
    pub entity_id: String,
    pub node_type: NodeType,
    pub state_id: String,
    pub version: u64,
    pub name: String,
    pub content: String,
}

/// An entity with its current state and the requested sections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub entity_id: String,
    pub node_type: NodeType,
    pub hidden: bool,
    pub name: Option<String>,
    pub content: Option<String>,
    pub version: Option<u64>,
    pub state_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub in_count: u32,
    pub out_count: u32,
    pub parents: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub edges: Vec<OutboundEdge>,
    pub children: Vec<ChildView>,
}

/// A single direct edge as read by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectEdgeView {
    pub edge_id: String,
    pub viewer_entity_id: String,
    pub target_entity_id: String,
    pub target_name: String,
    pub relation: String,
    pub content: String,
    pub inheritable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub viewer_version: u64,
    pub target_version: u64,
}

impl DirectEdgeView {
    pub(crate) fn from_edge(edge: DirectEdge, target_name: String) -> Self {
        Self {
            edge_id: edge.edge_id,
            viewer_entity_id: edge.viewer_id,
            target_entity_id: edge.target_id,
            target_name,
            relation: edge.relation,
            content: edge.content,
            inheritable: edge.inheritable,
            created_at: edge.created_at,
            updated_at: edge.updated_at,
            viewer_version: edge.viewer_version,
            target_version: edge.target_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEdge {
    pub edge_id: String,
    pub target_entity_id: String,
    pub target_name: String,
    pub relation: String,
    pub chapter_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub entity_id: String,
    pub node_type: NodeType,
    pub name: String,
    pub version: u64,
    pub edges: Vec<CatalogEdge>,
}

impl GraphStore {
    pub async fn get_entity(&self, entity_id: &str, include: EntityInclude) -> Result<EntityView> {
        let (mut view, child_ids) = {
            let locked = self.lock_entities([entity_id]).await;
            let record = locked.entity(entity_id)?;
            let current = record.current();
            let view = EntityView {
                entity_id: record.entity_id.clone(),
                node_type: record.node_type,
                hidden: record.hidden,
                name: current.filter(|_| include.basic).map(|s| s.name.clone()),
                content: current.filter(|_| include.basic).map(|s| s.content.clone()),
                version: current.map(|s| s.version),
                state_id: current.map(|s| s.state_id.clone()),
                created_at: record.created_at,
                in_count: current.map(|s| s.in_count).unwrap_or(0),
                out_count: current.map(|s| s.out_count).unwrap_or(0),
                parents: record.parents.iter().cloned().collect(),
                history: if include.history {
                    record.states.values().rev().map(HistoryEntry::from).collect()
                } else {
                    Vec::new()
                },
                edges: Vec::new(),
                children: Vec::new(),
            };
            let child_ids: Vec<String> = record.children.iter().cloned().collect();
            (view, child_ids)
        };

        if include.edges {
            view.edges = self.list_outbound_edges(entity_id).await?;
        }
        if include.children {
            view.children = self.children_of(child_ids).await;
        }
        Ok(view)
    }

    /// Children's current states ordered by name
    pub async fn list_children(&self, parent_id: &str) -> Result<Vec<ChildView>> {
        let child_ids: Vec<String> = {
            let locked = self.lock_entities([parent_id]).await;
            locked.entity(parent_id)?.children.iter().cloned().collect()
        };
        Ok(self.children_of(child_ids).await)
    }

    async fn children_of(&self, child_ids: Vec<String>) -> Vec<ChildView> {
        let mut children = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            let locked = self.lock_entities([child_id.as_str()]).await;
            let Some(record) = locked.get(&child_id) else {
                continue;
            };
            if let Some(state) = record.current() {
                children.push(ChildView {
                    entity_id: child_id.clone(),
                    node_type: record.node_type,
                    state_id: state.state_id.clone(),
                    version: state.version,
                    name: state.name.clone(),
                    content: state.content.clone(),
                });
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.entity_id.cmp(&b.entity_id)));
        children
    }

    /// Visible entities with a current state, their outbound edges and
    /// chapter counts, ordered by entity id
    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        let mut catalog = Vec::new();
        for entity_id in self.entity_ids() {
            let entry = {
                let locked = self.lock_entities([entity_id.as_str()]).await;
                let Some(record) = locked.get(&entity_id) else {
                    continue;
                };
                if record.hidden {
                    continue;
                }
                let Some(current) = record.current() else {
                    continue;
                };
                let edges: Vec<(DirectEdge, usize)> = record
                    .direct_edges
                    .values()
                    .map(|e| (e.clone(), record.relay_count_toward(&e.target_id)))
                    .collect();
                (record.node_type, current.name.clone(), current.version, edges)
            };

            let (node_type, name, version, edges) = entry;
            let mut catalog_edges = Vec::with_capacity(edges.len());
            for (edge, chapter_count) in edges {
                let target_name = self.pinned_name(&edge.target_id, edge.target_version).await;
                catalog_edges.push(CatalogEdge {
                    edge_id: edge.edge_id,
                    target_entity_id: edge.target_id,
                    target_name,
                    relation: edge.relation,
                    chapter_count,
                });
            }
            catalog.push(CatalogEntry {
                entity_id,
                node_type,
                name: if name.is_empty() { UNNAMED.to_string() } else { name },
                version,
                edges: catalog_edges,
            });
            tokio::task::yield_now().await;
        }
        catalog
    }
}
