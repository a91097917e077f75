use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::diff::DiffHunk;
use crate::error::{LoreError, Result};
use crate::graph::NodeType;
use crate::graph::types::{direct_edge_id, inheritable_by_default, relay_edge_id};

/// Kinds of resource a session can hold snapshots of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Entity,
    DirectEdge,
    RelayEdge,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Entity => "entity",
            ResourceType::DirectEdge => "direct_edge",
            ResourceType::RelayEdge => "relay_edge",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = LoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "entity" => Ok(ResourceType::Entity),
            "direct_edge" => Ok(ResourceType::DirectEdge),
            "relay_edge" => Ok(ResourceType::RelayEdge),
            other => Err(LoreError::validation(format!(
                "invalid resource_type '{other}', expected entity, direct_edge or relay_edge"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Modify,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => f.write_str("create"),
            OperationType::Modify => f.write_str("modify"),
        }
    }
}

/// Structural identity of a reviewed resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRef {
    Entity {
        entity_id: String,
    },
    DirectEdge {
        viewer_id: String,
        target_id: String,
    },
    RelayEdge {
        viewer_id: String,
        target_id: String,
        chapter: String,
    },
}

impl ResourceRef {
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self::Entity {
            entity_id: entity_id.into(),
        }
    }

    pub fn direct(viewer_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self::DirectEdge {
            viewer_id: viewer_id.into(),
            target_id: target_id.into(),
        }
    }

    pub fn relay(
        viewer_id: impl Into<String>,
        target_id: impl Into<String>,
        chapter: impl Into<String>,
    ) -> Self {
        Self::RelayEdge {
            viewer_id: viewer_id.into(),
            target_id: target_id.into(),
            chapter: chapter.into(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceRef::Entity { .. } => ResourceType::Entity,
            ResourceRef::DirectEdge { .. } => ResourceType::DirectEdge,
            ResourceRef::RelayEdge { .. } => ResourceType::RelayEdge,
        }
    }

    pub fn resource_id(&self) -> String {
        match self {
            ResourceRef::Entity { entity_id } => entity_id.clone(),
            ResourceRef::DirectEdge { viewer_id, target_id } => direct_edge_id(viewer_id, target_id),
            ResourceRef::RelayEdge {
                viewer_id,
                target_id,
                chapter,
            } => relay_edge_id(viewer_id, chapter, target_id),
        }
    }
}

/// Pre-session values needed to undo a modification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreImage {
    Entity {
        node_type: NodeType,
        version: Option<u64>,
        name: Option<String>,
        content: Option<String>,
    },
    DirectEdge {
        relation: String,
        content: String,
        #[serde(default = "inheritable_by_default")]
        inheritable: bool,
        viewer_version: u64,
        target_version: u64,
    },
    RelayEdge {
        relation: String,
        content: String,
        #[serde(default = "inheritable_by_default")]
        inheritable: bool,
        chapter_version: u64,
        viewer_version: u64,
        target_version: u64,
    },
}

impl PreImage {
    /// Text compared against the live resource
    pub fn content(&self) -> Option<&str> {
        match self {
            PreImage::Entity { content, .. } => content.as_deref(),
            PreImage::DirectEdge { content, .. } | PreImage::RelayEdge { content, .. } => {
                Some(content.as_str())
            }
        }
    }
}

/// A captured pre-session image, before it is bound to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub resource: ResourceRef,
    pub operation_type: OperationType,
    pub pre_image: Option<PreImage>,
    /// Highest version the backing entity had allocated at capture time
    /// (0 when it did not exist). Rollback drops states above it.
    pub baseline_version: u64,
    /// Version of the backing entity produced by the write being recorded
    pub written_version: Option<u64>,
}

impl Capture {
    pub fn created(resource: ResourceRef, baseline_version: u64) -> Self {
        Self {
            resource,
            operation_type: OperationType::Create,
            pre_image: None,
            baseline_version,
            written_version: None,
        }
    }

    pub fn modified(resource: ResourceRef, pre_image: PreImage, baseline_version: u64) -> Self {
        Self {
            resource,
            operation_type: OperationType::Modify,
            pre_image: Some(pre_image),
            baseline_version,
            written_version: None,
        }
    }

    /// Note the backing-entity version the tracked write produced
    pub fn wrote(mut self, version: u64) -> Self {
        self.written_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    pub snapshot_content: Option<String>,
    pub snapshot_time: DateTime<Utc>,
    pub resource: ResourceRef,
    pub pre_image: Option<PreImage>,
    #[serde(default)]
    pub baseline_version: u64,
    /// Backing-entity versions written by this session since the snapshot
    #[serde(default)]
    pub session_versions: BTreeSet<u64>,
}

impl Snapshot {
    pub fn bind(session_id: &str, capture: Capture) -> Self {
        Self {
            session_id: session_id.to_string(),
            resource_id: capture.resource.resource_id(),
            resource_type: capture.resource.resource_type(),
            operation_type: capture.operation_type,
            snapshot_content: capture
                .pre_image
                .as_ref()
                .and_then(|p| p.content())
                .map(str::to_string),
            snapshot_time: Utc::now(),
            resource: capture.resource,
            pre_image: capture.pre_image,
            baseline_version: capture.baseline_version,
            session_versions: capture.written_version.into_iter().collect(),
        }
    }

    /// Whether every version in `versions` was written by this session
    pub fn owns_all(&self, mut versions: impl Iterator<Item = u64>) -> bool {
        versions.all(|v| self.session_versions.contains(&v))
    }

    pub fn matches(&self, resource_type: ResourceType, resource_id: &str) -> bool {
        self.resource_type == resource_type && self.resource_id == resource_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub resource_count: usize,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            created_at: session.created_at,
            resource_count: session.snapshots.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub session_id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub operation_type: Option<OperationType>,
    pub snapshot_content: Option<String>,
    pub current_content: String,
    pub has_changes: bool,
    pub diff_summary: String,
    pub diff_unified: String,
    pub hunks: Vec<DiffHunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveOutcome {
    pub session_id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub success: bool,
    pub session_closed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub session_id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub success: bool,
    pub message: String,
    pub new_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearOutcome {
    pub session_id: String,
    pub approved: usize,
    pub message: String,
}
