//! Core graph records: entities, their immutable states, and the edges that
//! pin specific state versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{LoreError, Result};

/// Separator reserved for composite identifiers
pub const ID_SEPARATOR: &str = "__";

/// Prefix of every relay sub-entity id
pub const RELAY_PREFIX: &str = "relay__";

/// Kind of thing an entity describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Character,
    Location,
    Faction,
    Event,
    Item,
    Relationship,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Character,
        NodeType::Location,
        NodeType::Faction,
        NodeType::Event,
        NodeType::Item,
        NodeType::Relationship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Character => "character",
            NodeType::Location => "location",
            NodeType::Faction => "faction",
            NodeType::Event => "event",
            NodeType::Item => "item",
            NodeType::Relationship => "relationship",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = LoreError;

    fn from_str(s: &str) -> Result<Self> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                LoreError::validation(format!(
                    "invalid node_type '{s}', expected one of: character, location, faction, event, item, relationship"
                ))
            })
    }
}

/// One immutable version of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state_id: String,
    pub entity_id: String,
    pub version: u64,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,
    pub in_count: u32,
    pub out_count: u32,
}

impl State {
    pub fn new(
        entity_id: &str,
        version: u64,
        name: impl Into<String>,
        content: impl Into<String>,
        task_description: Option<String>,
    ) -> Self {
        Self {
            state_id: state_id_for(entity_id, version),
            entity_id: entity_id.to_string(),
            version,
            name: name.into(),
            content: content.into(),
            created_at: Utc::now(),
            task_description,
            in_count: 0,
            out_count: 0,
        }
    }

    /// No edge pins this state in either direction
    pub fn is_unreferenced(&self) -> bool {
        self.in_count == 0 && self.out_count == 0
    }
}

/// Edges written without an explicit inheritability are inheritable
pub(crate) fn inheritable_by_default() -> bool {
    true
}

/// The single relationship a viewer holds toward a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectEdge {
    pub edge_id: String,
    pub viewer_id: String,
    pub target_id: String,
    pub relation: String,
    pub content: String,
    /// Whether children of the viewer may inherit the relationship
    #[serde(default = "inheritable_by_default")]
    pub inheritable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub viewer_version: u64,
    pub target_version: u64,
}

/// A named chapter under a direct edge, backed by a hidden sub-entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayLink {
    pub edge_id: String,
    pub viewer_id: String,
    pub target_id: String,
    pub chapter: String,
    pub relation: String,
    pub relay_entity_id: String,
    /// Never set while the direct edge above is not inheritable
    #[serde(default = "inheritable_by_default")]
    pub inheritable: bool,
    pub created_at: DateTime<Utc>,
    pub viewer_version: u64,
    pub chapter_version: u64,
    pub target_version: u64,
}

/// Everything owned by one entity slot.
///
/// Direct edges and relay links live in their viewer's record; the states
/// they pin on other entities are only referenced by `(entity_id, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    /// Next version to hand out; never decreases
    pub next_version: u64,
    #[serde(default)]
    pub states: BTreeMap<u64, State>,
    /// Direct edges keyed by target entity id
    #[serde(default)]
    pub direct_edges: BTreeMap<String, DirectEdge>,
    /// Relay links keyed by relay edge id
    #[serde(default)]
    pub relay_links: BTreeMap<String, RelayLink>,
    #[serde(default)]
    pub parents: BTreeSet<String>,
    #[serde(default)]
    pub children: BTreeSet<String>,
    /// Set once the entity is deleted; waiters that acquire the lock
    /// afterwards treat the slot as absent.
    #[serde(skip)]
    pub(crate) removed: bool,
}

impl EntityRecord {
    pub fn new(entity_id: impl Into<String>, node_type: NodeType, hidden: bool) -> Self {
        Self {
            entity_id: entity_id.into(),
            node_type,
            hidden,
            created_at: Utc::now(),
            next_version: 1,
            states: BTreeMap::new(),
            direct_edges: BTreeMap::new(),
            relay_links: BTreeMap::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            removed: false,
        }
    }

    pub fn current(&self) -> Option<&State> {
        self.states.values().next_back()
    }

    pub fn current_version(&self) -> Option<u64> {
        self.states.keys().next_back().copied()
    }

    /// Append a new state with a freshly allocated version
    pub fn push_state(
        &mut self,
        name: impl Into<String>,
        content: impl Into<String>,
        task_description: Option<String>,
    ) -> &State {
        let version = self.next_version;
        self.next_version += 1;
        let state = State::new(&self.entity_id, version, name, content, task_description);
        self.states.entry(version).or_insert(state)
    }

    /// Highest version ever allocated, including deleted ones
    pub fn high_water_mark(&self) -> u64 {
        self.next_version.saturating_sub(1)
    }

    pub fn relay_count_toward(&self, target_id: &str) -> usize {
        self.relay_links
            .values()
            .filter(|link| link.target_id == target_id)
            .count()
    }
}

/// `{entity_id}_v{version}`
pub fn state_id_for(entity_id: &str, version: u64) -> String {
    format!("{entity_id}_v{version}")
}

/// `{viewer}__DIRECT__{target}`
pub fn direct_edge_id(viewer_id: &str, target_id: &str) -> String {
    format!("{viewer_id}{ID_SEPARATOR}DIRECT{ID_SEPARATOR}{target_id}")
}

/// `{viewer}__{chapter}__{target}`
pub fn relay_edge_id(viewer_id: &str, chapter: &str, target_id: &str) -> String {
    format!("{viewer_id}{ID_SEPARATOR}{chapter}{ID_SEPARATOR}{target_id}")
}

/// `relay__{edge_id}`
pub fn relay_entity_id(edge_id: &str) -> String {
    format!("{RELAY_PREFIX}{edge_id}")
}

/// Reject empty values and values containing the reserved separator
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LoreError::validation(format!("{field} must not be empty")));
    }
    if value.contains(ID_SEPARATOR) {
        return Err(LoreError::validation(format!(
            "{field} '{value}' must not contain '{ID_SEPARATOR}'"
        )));
    }
    Ok(())
}

pub fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LoreError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}
