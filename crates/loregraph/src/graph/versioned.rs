//! Entities and their immutable state history

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::GraphStore;
use super::locks::LockedEntities;
use super::types::{EntityRecord, NodeType, State, require_text, validate_identifier};
use crate::error::{LoreError, Result};

/// Input for creating an entity with its first state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub entity_id: String,
    pub node_type: NodeType,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub task_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCreated {
    pub entity_id: String,
    pub state_id: String,
    pub version: u64,
}

/// Input for appending a state; `name` defaults to the current state's name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewVersion {
    pub content: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCreated {
    pub entity_id: String,
    pub old_version: Option<u64>,
    pub new_version: u64,
    pub state_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDeleted {
    pub deleted_state_id: String,
    pub entity_id: String,
    pub new_current_version: Option<u64>,
    /// Edge ids removed because they were pinned to the deleted state
    pub removed_edges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDeleted {
    pub deleted_entity_id: String,
    pub removed_parent_links: usize,
}

impl GraphStore {
    /// Insert a new entity slot and return it locked.
    ///
    /// The fresh slot is locked before it becomes visible, so no other task
    /// can observe the entity until the caller drops the lock set.
    pub(crate) fn insert_entity(
        &self,
        input: &NewEntity,
        hidden: bool,
        first_version: u64,
    ) -> Result<(LockedEntities, EntityCreated)> {
        // Relay sub-entity ids are composite and carry the separator
        if hidden {
            require_text("entity_id", &input.entity_id)?;
        } else {
            validate_identifier("entity_id", &input.entity_id)?;
        }
        require_text("name", &input.name)?;
        require_text("content", &input.content)?;

        let mut record = EntityRecord::new(&input.entity_id, input.node_type, hidden);
        record.next_version = first_version.max(1);
        let state = record
            .push_state(&input.name, &input.content, input.task_description.clone())
            .clone();

        let slot = Arc::new(Mutex::new(record));
        let guard = Arc::clone(&slot)
            .try_lock_owned()
            .map_err(|e| LoreError::Internal(format!("fresh entity slot is busy: {e}")))?;

        match self.entities.entry(input.entity_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(LoreError::conflict(
                    "entity",
                    &input.entity_id,
                    "entity already exists",
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }

        self.index_state(&state);
        self.touch();

        let mut locked = LockedEntities::new();
        locked.adopt(input.entity_id.clone(), guard);

        tracing::debug!(entity_id = %input.entity_id, node_type = %input.node_type, "entity created");
        Ok((
            locked,
            EntityCreated {
                entity_id: input.entity_id.clone(),
                state_id: state.state_id,
                version: state.version,
            },
        ))
    }

    pub async fn create_entity(&self, input: NewEntity) -> Result<EntityCreated> {
        let (_locked, created) = self.insert_entity(&input, false, 1)?;
        Ok(created)
    }

    pub(crate) fn apply_create_version(
        &self,
        locked: &mut LockedEntities,
        entity_id: &str,
        input: &NewVersion,
    ) -> Result<VersionCreated> {
        require_text("content", &input.content)?;
        if let Some(name) = &input.name {
            require_text("name", name)?;
        }

        let record = locked.entity_mut(entity_id)?;
        let old_version = record.current_version();
        let name = match (&input.name, record.current()) {
            (Some(name), _) => name.clone(),
            (None, Some(current)) => current.name.clone(),
            (None, None) => {
                return Err(LoreError::validation(format!(
                    "name is required: entity '{entity_id}' has no current state"
                )));
            }
        };

        let state = record
            .push_state(name, &input.content, input.task_description.clone())
            .clone();
        self.index_state(&state);
        self.touch();

        tracing::debug!(entity_id, version = state.version, "version created");
        Ok(VersionCreated {
            entity_id: entity_id.to_string(),
            old_version,
            new_version: state.version,
            state_id: state.state_id,
        })
    }

    pub async fn create_version(&self, entity_id: &str, input: NewVersion) -> Result<VersionCreated> {
        let mut locked = self.lock_entities([entity_id]).await;
        self.apply_create_version(&mut locked, entity_id, &input)
    }

    pub async fn get_current_state(&self, entity_id: &str) -> Result<State> {
        let locked = self.lock_entities([entity_id]).await;
        locked.current(entity_id).cloned()
    }

    pub async fn get_state(&self, state_id: &str) -> Result<State> {
        let entity_id = self
            .lookup_state(state_id)
            .ok_or_else(|| LoreError::not_found("state", state_id))?;
        let locked = self.lock_entities([entity_id.as_str()]).await;
        locked
            .get(&entity_id)
            .and_then(|record| record.states.values().find(|s| s.state_id == state_id))
            .cloned()
            .ok_or_else(|| LoreError::not_found("state", state_id))
    }

    /// All states of an entity, newest first
    pub async fn list_history(&self, entity_id: &str) -> Result<Vec<State>> {
        let locked = self.lock_entities([entity_id]).await;
        let record = locked.entity(entity_id)?;
        Ok(record.states.values().rev().cloned().collect())
    }

    /// Lock an entity plus everything its state's outgoing pins touch
    pub(crate) async fn lock_for_state_delete(&self, state_id: &str) -> Result<(LockedEntities, String, u64)> {
        let entity_id = self
            .lookup_state(state_id)
            .ok_or_else(|| LoreError::not_found("state", state_id))?;

        let locked = self
            .lock_planned(BTreeSet::from([entity_id.clone()]), |locked| {
                let (record, state) = find_state(locked, &entity_id, state_id)?;
                let mut needed = BTreeSet::from([entity_id.clone()]);
                for edge in record.direct_edges.values() {
                    if edge.viewer_version == state.version {
                        needed.insert(edge.target_id.clone());
                    }
                }
                for link in record.relay_links.values() {
                    if link.viewer_version == state.version {
                        needed.insert(link.target_id.clone());
                        needed.insert(link.relay_entity_id.clone());
                    }
                }
                Ok(needed)
            })
            .await?;

        let version = find_state(&locked, &entity_id, state_id)?.1.version;
        Ok((locked, entity_id, version))
    }

    pub(crate) fn apply_delete_state(
        &self,
        locked: &mut LockedEntities,
        entity_id: &str,
        version: u64,
    ) -> Result<StateDeleted> {
        let record = locked.entity(entity_id)?;
        let state = record
            .states
            .get(&version)
            .ok_or_else(|| LoreError::not_found("state", super::types::state_id_for(entity_id, version)))?;
        if state.in_count > 0 {
            tracing::warn!(state_id = %state.state_id, in_count = state.in_count, "refusing to delete referenced state");
            return Err(LoreError::conflict(
                "state",
                &state.state_id,
                format!("state is still referenced by {} incoming edge(s)", state.in_count),
            ));
        }
        let state_id = state.state_id.clone();

        let pinned_edges: Vec<_> = record
            .direct_edges
            .values()
            .filter(|e| e.viewer_version == version)
            .cloned()
            .collect();
        let pinned_links: Vec<_> = record
            .relay_links
            .values()
            .filter(|l| l.viewer_version == version)
            .cloned()
            .collect();

        let mut removed_edges = Vec::new();
        for edge in &pinned_edges {
            locked.pin_direct(edge, false)?;
            locked.entity_mut(entity_id)?.direct_edges.remove(&edge.target_id);
            self.unindex_direct(&edge.edge_id);
            removed_edges.push(edge.edge_id.clone());
        }
        for link in &pinned_links {
            locked.pin_relay(link, false)?;
            locked.entity_mut(entity_id)?.relay_links.remove(&link.edge_id);
            self.unindex_relay(&link.edge_id);
            removed_edges.push(link.edge_id.clone());
        }

        let record = locked.entity_mut(entity_id)?;
        record.states.remove(&version);
        let new_current_version = record.current_version();
        self.unindex_state(&state_id);
        self.touch();

        tracing::debug!(state_id = %state_id, ?new_current_version, "state deleted");
        Ok(StateDeleted {
            deleted_state_id: state_id,
            entity_id: entity_id.to_string(),
            new_current_version,
            removed_edges,
        })
    }

    pub async fn delete_state(&self, state_id: &str) -> Result<StateDeleted> {
        let (mut locked, entity_id, version) = self.lock_for_state_delete(state_id).await?;
        self.apply_delete_state(&mut locked, &entity_id, version)
    }

    pub(crate) async fn lock_for_entity_delete(&self, entity_id: &str) -> Result<LockedEntities> {
        self.lock_planned(BTreeSet::from([entity_id.to_string()]), |locked| {
            let record = locked.entity(entity_id)?;
            let mut needed: BTreeSet<String> = record.parents.iter().cloned().collect();
            needed.insert(entity_id.to_string());
            Ok(needed)
        })
        .await
    }

    pub(crate) fn apply_delete_entity(
        &self,
        locked: &mut LockedEntities,
        entity_id: &str,
    ) -> Result<EntityDeleted> {
        let record = locked.entity(entity_id)?;
        if !record.states.is_empty() {
            tracing::warn!(entity_id, states = record.states.len(), "refusing to delete entity with states");
            return Err(LoreError::conflict(
                "entity",
                entity_id,
                format!("entity still owns {} state(s)", record.states.len()),
            ));
        }
        if !record.children.is_empty() {
            tracing::warn!(entity_id, children = record.children.len(), "refusing to delete entity with children");
            return Err(LoreError::conflict(
                "entity",
                entity_id,
                format!("entity still has {} child link(s)", record.children.len()),
            ));
        }

        let parents: Vec<String> = record.parents.iter().cloned().collect();
        for parent_id in &parents {
            if let Some(parent) = locked.get_mut(parent_id) {
                parent.children.remove(entity_id);
            }
        }

        if let Some(record) = locked.mark_removed(entity_id) {
            self.forget_entity(&record);
        }
        self.touch();

        tracing::debug!(entity_id, removed_parent_links = parents.len(), "entity deleted");
        Ok(EntityDeleted {
            deleted_entity_id: entity_id.to_string(),
            removed_parent_links: parents.len(),
        })
    }

    pub async fn delete_entity(&self, entity_id: &str) -> Result<EntityDeleted> {
        let mut locked = self.lock_for_entity_delete(entity_id).await?;
        self.apply_delete_entity(&mut locked, entity_id)
    }

    /// Lock an entity with every entity it references or is linked to
    pub(crate) async fn lock_for_purge(&self, entity_id: &str) -> Result<LockedEntities> {
        self.lock_planned(BTreeSet::from([entity_id.to_string()]), |locked| {
            let Some(record) = locked.get(entity_id) else {
                return Ok(BTreeSet::from([entity_id.to_string()]));
            };
            let mut needed = BTreeSet::from([entity_id.to_string()]);
            needed.extend(record.direct_edges.keys().cloned());
            for link in record.relay_links.values() {
                needed.insert(link.target_id.clone());
                needed.insert(link.relay_entity_id.clone());
            }
            needed.extend(record.parents.iter().cloned());
            needed.extend(record.children.iter().cloned());
            Ok(needed)
        })
        .await
    }

    /// Check that an entity can be removed with everything it owns
    pub(crate) fn check_purge(locked: &LockedEntities, entity_id: &str) -> Result<()> {
        let record = locked.entity(entity_id)?;
        if let Some(state) = record.states.values().find(|s| s.in_count > 0) {
            return Err(LoreError::conflict(
                "entity",
                entity_id,
                format!(
                    "state '{}' is still referenced by {} incoming edge(s)",
                    state.state_id, state.in_count
                ),
            ));
        }
        Ok(())
    }

    /// Remove an entity with its states, outgoing edges and parent links
    pub(crate) fn apply_purge_entity(&self, locked: &mut LockedEntities, entity_id: &str) -> Result<()> {
        Self::check_purge(locked, entity_id)?;
        let record = locked.entity(entity_id)?.clone();

        for edge in record.direct_edges.values() {
            locked.pin_direct(edge, false)?;
            self.unindex_direct(&edge.edge_id);
        }
        for link in record.relay_links.values() {
            locked.pin_relay(link, false)?;
            self.unindex_relay(&link.edge_id);
        }
        for parent_id in &record.parents {
            if let Some(parent) = locked.get_mut(parent_id) {
                parent.children.remove(entity_id);
            }
        }
        for child_id in &record.children {
            if let Some(child) = locked.get_mut(child_id) {
                child.parents.remove(entity_id);
            }
        }

        if let Some(removed) = locked.mark_removed(entity_id) {
            self.forget_entity(&removed);
        }
        self.touch();
        tracing::debug!(entity_id, "entity purged");
        Ok(())
    }

    /// Drop every state newer than `keep_through`; all of them must be free
    /// of references.
    pub(crate) fn apply_truncate_versions(
        &self,
        locked: &mut LockedEntities,
        entity_id: &str,
        keep_through: u64,
    ) -> Result<Vec<String>> {
        let record = locked.entity_mut(entity_id)?;
        if let Some(state) = record
            .states
            .range(keep_through + 1..)
            .map(|(_, s)| s)
            .find(|s| !s.is_unreferenced())
        {
            return Err(LoreError::conflict(
                "state",
                &state.state_id,
                "state is still referenced",
            ));
        }
        let newer: Vec<u64> = record.states.range(keep_through + 1..).map(|(v, _)| *v).collect();
        let mut removed = Vec::with_capacity(newer.len());
        for version in newer {
            if let Some(state) = record.states.remove(&version) {
                removed.push(state.state_id);
            }
        }
        for state_id in &removed {
            self.unindex_state(state_id);
        }
        if !removed.is_empty() {
            self.touch();
        }
        Ok(removed)
    }
}

fn find_state<'a>(
    locked: &'a LockedEntities,
    entity_id: &str,
    state_id: &str,
) -> Result<(&'a EntityRecord, &'a State)> {
    let record = locked
        .get(entity_id)
        .ok_or_else(|| LoreError::not_found("state", state_id))?;
    let state = record
        .states
        .values()
        .find(|s| s.state_id == state_id)
        .ok_or_else(|| LoreError::not_found("state", state_id))?;
    Ok((record, state))
}
