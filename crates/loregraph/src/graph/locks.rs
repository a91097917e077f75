//! Multi-entity lock sets.
//!
//! Locks are always taken in ascending id order. Operations whose entity set
//! depends on the data they find (deleting a state with outgoing edges,
//! removing a relay link) plan the set under a smaller lock set, then lock
//! the full set and re-plan until the plan fits inside what is held.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::GraphStore;
use super::types::{DirectEdge, EntityRecord, RelayLink, State};
use crate::error::{LoreError, Result};

pub(crate) type Slot = Arc<Mutex<EntityRecord>>;

/// Which reference counter a pin touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefCount {
    In,
    Out,
}

/// Guards over a sorted set of entity slots
pub struct LockedEntities {
    guards: BTreeMap<String, OwnedMutexGuard<EntityRecord>>,
}

impl LockedEntities {
    pub(crate) fn new() -> Self {
        Self {
            guards: BTreeMap::new(),
        }
    }

    /// Take ownership of a guard acquired outside the sorted walk. Only
    /// valid for freshly created slots nobody else can be waiting on.
    pub(crate) fn adopt(&mut self, entity_id: String, guard: OwnedMutexGuard<EntityRecord>) {
        self.guards.insert(entity_id, guard);
    }

    pub(crate) fn merge(&mut self, other: LockedEntities) {
        self.guards.extend(other.guards);
    }

    pub fn holds(&self, entity_id: &str) -> bool {
        self.get(entity_id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.guards
            .iter()
            .filter(|(_, g)| !g.removed)
            .map(|(id, _)| id.as_str())
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityRecord> {
        self.guards
            .get(entity_id)
            .map(|g| &**g)
            .filter(|record| !record.removed)
    }

    pub fn get_mut(&mut self, entity_id: &str) -> Option<&mut EntityRecord> {
        self.guards
            .get_mut(entity_id)
            .map(|g| &mut **g)
            .filter(|record| !record.removed)
    }

    pub fn entity(&self, entity_id: &str) -> Result<&EntityRecord> {
        self.get(entity_id)
            .ok_or_else(|| LoreError::not_found("entity", entity_id))
    }

    pub fn entity_mut(&mut self, entity_id: &str) -> Result<&mut EntityRecord> {
        self.get_mut(entity_id)
            .ok_or_else(|| LoreError::not_found("entity", entity_id))
    }

    /// Current state of an entity that must exist and own at least one state
    pub fn current(&self, entity_id: &str) -> Result<&State> {
        self.entity(entity_id)?
            .current()
            .ok_or_else(|| LoreError::not_found("current state", entity_id))
    }

    pub(crate) fn bump(
        &mut self,
        entity_id: &str,
        version: u64,
        count: RefCount,
        increment: bool,
    ) -> Result<()> {
        let state = self
            .get_mut(entity_id)
            .and_then(|record| record.states.get_mut(&version))
            .ok_or_else(|| {
                LoreError::Internal(format!(
                    "pinned state {entity_id} v{version} is not held by this lock set"
                ))
            })?;
        let counter = match count {
            RefCount::In => &mut state.in_count,
            RefCount::Out => &mut state.out_count,
        };
        *counter = if increment {
            counter.saturating_add(1)
        } else {
            counter.saturating_sub(1)
        };
        Ok(())
    }

    pub(crate) fn pin_direct(&mut self, edge: &DirectEdge, increment: bool) -> Result<()> {
        self.bump(&edge.viewer_id, edge.viewer_version, RefCount::Out, increment)?;
        self.bump(&edge.target_id, edge.target_version, RefCount::In, increment)
    }

    pub(crate) fn pin_relay(&mut self, link: &RelayLink, increment: bool) -> Result<()> {
        self.bump(&link.viewer_id, link.viewer_version, RefCount::Out, increment)?;
        self.bump(&link.relay_entity_id, link.chapter_version, RefCount::In, increment)?;
        self.bump(&link.relay_entity_id, link.chapter_version, RefCount::Out, increment)?;
        self.bump(&link.target_id, link.target_version, RefCount::In, increment)
    }

    /// Mark an entity deleted; the caller drops it from the map
    pub(crate) fn mark_removed(&mut self, entity_id: &str) -> Option<EntityRecord> {
        let guard = self.guards.get_mut(entity_id)?;
        if guard.removed {
            return None;
        }
        guard.removed = true;
        Some(guard.clone())
    }
}

impl GraphStore {
    async fn lock_slot(&self, entity_id: &str) -> Option<OwnedMutexGuard<EntityRecord>> {
        // A slot may be deleted and recreated while we wait on it; follow
        // the map until the guard we hold is the live one.
        for _ in 0..3 {
            let slot = self.entities.get(entity_id).map(|r| Arc::clone(r.value()))?;
            let guard = slot.lock_owned().await;
            if !guard.removed {
                return Some(guard);
            }
        }
        None
    }

    /// Lock every listed entity that exists, in sorted order
    pub(crate) async fn lock_entities<I, S>(&self, ids: I) -> LockedEntities
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sorted: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        let mut locked = LockedEntities::new();
        for id in sorted {
            if let Some(guard) = self.lock_slot(&id).await {
                locked.guards.insert(id, guard);
            }
        }
        locked
    }

    /// Lock a data-dependent entity set.
    ///
    /// `plan` runs under the current lock set and returns every id the
    /// operation needs. Once the plan is covered by the ids requested the
    /// lock set is returned; otherwise the set grows and is re-acquired.
    pub(crate) async fn lock_planned<F>(
        &self,
        seed: BTreeSet<String>,
        plan: F,
    ) -> Result<LockedEntities>
    where
        F: Fn(&LockedEntities) -> Result<BTreeSet<String>>,
    {
        let mut wanted = seed;
        for attempt in 0..=self.settings.max_lock_retries {
            let locked = self.lock_entities(wanted.iter().cloned()).await;
            let needed = plan(&locked)?;
            if needed.is_subset(&wanted) {
                return Ok(locked);
            }
            tracing::debug!(attempt, "lock set grew, re-planning");
            drop(locked);
            wanted.extend(needed);
        }
        Err(LoreError::Internal(format!(
            "lock set did not stabilise after {} attempts",
            self.settings.max_lock_retries + 1
        )))
    }

    /// Lock every entity in the graph, in sorted order
    pub(crate) async fn lock_all(&self) -> LockedEntities {
        let ids: Vec<String> = self.entities.iter().map(|r| r.key().clone()).collect();
        self.lock_entities(ids).await
    }
}
