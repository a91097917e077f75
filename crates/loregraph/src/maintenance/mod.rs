//! On-demand garbage collection of unreferenced states and empty entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LoreError, Result};
use crate::graph::{GraphStore, NodeType};

/// Characters of content kept in an orphan listing
pub const SNIPPET_CHARS: usize = 150;

/// Default page size of orphan scans
pub const DEFAULT_ORPHAN_LIMIT: usize = 100;

/// Which states count as orphaned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanMode {
    /// Nothing points at the state
    #[default]
    InZero,
    /// Nothing points at the state and it points at nothing
    AllZero,
}

impl OrphanMode {
    fn admits(&self, in_count: u32, out_count: u32) -> bool {
        match self {
            OrphanMode::InZero => in_count == 0,
            OrphanMode::AllZero => in_count == 0 && out_count == 0,
        }
    }
}

impl fmt::Display for OrphanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanMode::InZero => f.write_str("in_zero"),
            OrphanMode::AllZero => f.write_str("all_zero"),
        }
    }
}

impl FromStr for OrphanMode {
    type Err = LoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_zero" => Ok(OrphanMode::InZero),
            "all_zero" => Ok(OrphanMode::AllZero),
            other => Err(LoreError::validation(format!(
                "invalid mode '{other}', expected in_zero or all_zero"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanState {
    pub state_id: String,
    pub entity_id: String,
    pub version: u64,
    pub name: String,
    pub content_snippet: String,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
    pub in_count: u32,
    pub out_count: u32,
    pub entity_type: NodeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanEntity {
    pub entity_id: String,
    pub node_type: NodeType,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub parent_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
    pub kind: String,
}

/// Outcome of a batch delete; each id succeeds or fails on its own
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeleteReport {
    pub deleted_count: usize,
    pub failed_count: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchDeleteReport {
    fn success(&mut self, id: &str) {
        self.deleted.push(id.to_string());
        self.deleted_count += 1;
    }

    fn failure(&mut self, id: &str, err: &LoreError) {
        self.failed.push(BatchFailure {
            id: id.to_string(),
            error: err.to_string(),
            kind: err.kind().to_string(),
        });
        self.failed_count += 1;
    }
}

fn snippet(content: &str) -> String {
    if content.chars().count() > SNIPPET_CHARS {
        let head: String = content.chars().take(SNIPPET_CHARS).collect();
        format!("{head} [truncated]")
    } else {
        content.to_string()
    }
}

fn require_ids(ids: &[String], field: &str) -> Result<()> {
    if ids.is_empty() {
        return Err(LoreError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Scans and deletes orphans. Never runs on its own.
pub struct GarbageCollector<'a> {
    store: &'a GraphStore,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// States matching `mode`, by entity id then version descending
    pub async fn find_orphan_states(&self, mode: OrphanMode, limit: usize) -> Vec<OrphanState> {
        let mut found = Vec::new();
        for entity_id in self.store.entity_ids() {
            if found.len() >= limit {
                break;
            }
            {
                let locked = self.store.lock_entities([entity_id.as_str()]).await;
                let Some(record) = locked.get(&entity_id) else {
                    continue;
                };
                let current = record.current_version();
                for state in record.states.values().rev() {
                    if found.len() >= limit {
                        break;
                    }
                    if !mode.admits(state.in_count, state.out_count) {
                        continue;
                    }
                    found.push(OrphanState {
                        state_id: state.state_id.clone(),
                        entity_id: entity_id.clone(),
                        version: state.version,
                        name: state.name.clone(),
                        content_snippet: snippet(&state.content),
                        created_at: state.created_at,
                        is_current: Some(state.version) == current,
                        in_count: state.in_count,
                        out_count: state.out_count,
                        entity_type: record.node_type,
                    });
                }
            }
            tokio::task::yield_now().await;
        }
        tracing::debug!(%mode, found = found.len(), "orphan state scan");
        found
    }

    pub async fn delete_states_batch(&self, state_ids: &[String]) -> Result<BatchDeleteReport> {
        require_ids(state_ids, "state_ids")?;
        let mut report = BatchDeleteReport::default();
        for state_id in state_ids {
            match self.store.delete_state(state_id).await {
                Ok(_) => report.success(state_id),
                Err(e) => {
                    tracing::warn!(state_id = %state_id, error = %e, "batch state delete failed");
                    report.failure(state_id, &e);
                }
            }
        }
        tracing::info!(
            deleted = report.deleted_count,
            failed = report.failed_count,
            "batch state delete"
        );
        Ok(report)
    }

    /// Stateless entities that have no children
    pub async fn find_orphan_entities(&self, limit: usize) -> Vec<OrphanEntity> {
        let mut found = Vec::new();
        for entity_id in self.store.entity_ids() {
            if found.len() >= limit {
                break;
            }
            {
                let locked = self.store.lock_entities([entity_id.as_str()]).await;
                let Some(record) = locked.get(&entity_id) else {
                    continue;
                };
                if record.states.is_empty() && record.children.is_empty() {
                    found.push(OrphanEntity {
                        entity_id: entity_id.clone(),
                        node_type: record.node_type,
                        hidden: record.hidden,
                        created_at: record.created_at,
                        parent_count: record.parents.len(),
                    });
                }
            }
            tokio::task::yield_now().await;
        }
        found
    }

    pub async fn delete_entities_batch(&self, entity_ids: &[String]) -> Result<BatchDeleteReport> {
        require_ids(entity_ids, "entity_ids")?;
        let mut report = BatchDeleteReport::default();
        for entity_id in entity_ids {
            match self.store.delete_entity(entity_id).await {
                Ok(_) => report.success(entity_id),
                Err(e) => {
                    tracing::warn!(entity_id = %entity_id, error = %e, "batch entity delete failed");
                    report.failure(entity_id, &e);
                }
            }
        }
        tracing::info!(
            deleted = report.deleted_count,
            failed = report.failed_count,
            "batch entity delete"
        );
        Ok(report)
    }
}
