//! Compensating actions that undo a snapshot's changes.
//!
//! Every revert runs under the lock set returned by [`lock_for`]. Checks
//! happen before the first write; a failure after that point is reported as
//! `Internal` because the graph may no longer match either side.

use super::types::{OperationType, PreImage, ResourceRef, Snapshot};
use crate::error::{LoreError, Result};
use crate::graph::types::{relay_edge_id, relay_entity_id};
use crate::graph::{DirectEdgeInput, GraphStore, LockedEntities, NewEntity, NewVersion, RelayEdgeInput};

/// What a successful revert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reverted {
    pub message: String,
    pub new_version: Option<u64>,
}

impl Reverted {
    fn new(message: impl Into<String>, new_version: Option<u64>) -> Self {
        Self {
            message: message.into(),
            new_version,
        }
    }
}

/// Lock every entity a revert of `resource` may touch
pub(crate) async fn lock_for(store: &GraphStore, resource: &ResourceRef) -> Result<LockedEntities> {
    match resource {
        ResourceRef::Entity { entity_id } => store.lock_for_purge(entity_id).await,
        ResourceRef::DirectEdge { viewer_id, target_id } => {
            store.lock_for_direct_delete(viewer_id, target_id).await
        }
        ResourceRef::RelayEdge {
            viewer_id,
            target_id,
            chapter,
        } => store.lock_for_relay(viewer_id, target_id, chapter).await,
    }
}

fn missing_pre_image(snapshot: &Snapshot) -> LoreError {
    LoreError::Internal(format!(
        "snapshot of {} '{}' carries no usable pre-image",
        snapshot.resource_type, snapshot.resource_id
    ))
}

fn after_validation(err: LoreError) -> LoreError {
    LoreError::Internal(format!("rollback failed part-way: {err}"))
}

pub(crate) fn revert(
    store: &GraphStore,
    locked: &mut LockedEntities,
    snapshot: &Snapshot,
    task_description: &str,
) -> Result<Reverted> {
    match (&snapshot.resource, snapshot.operation_type) {
        (ResourceRef::Entity { entity_id }, OperationType::Create) => {
            revert_entity_create(store, locked, entity_id)
        }
        (ResourceRef::Entity { entity_id }, OperationType::Modify) => {
            let pre = snapshot.pre_image.as_ref().ok_or_else(|| missing_pre_image(snapshot))?;
            revert_entity_modify(store, locked, snapshot, entity_id, pre, task_description)
        }
        (ResourceRef::DirectEdge { viewer_id, target_id }, OperationType::Create) => {
            let exists = locked
                .get(viewer_id)
                .is_some_and(|r| r.direct_edges.contains_key(target_id));
            if !exists {
                return Ok(Reverted::new("Direct edge already removed", None));
            }
            let deleted = store.apply_delete_direct(locked, viewer_id, target_id, true)?;
            Ok(Reverted::new(
                format!(
                    "Direct edge removed with {} chapter link(s)",
                    deleted.removed_relay_links.len()
                ),
                None,
            ))
        }
        (ResourceRef::DirectEdge { viewer_id, target_id }, OperationType::Modify) => {
            let Some(PreImage::DirectEdge {
                relation,
                content,
                inheritable,
                viewer_version,
                target_version,
            }) = &snapshot.pre_image
            else {
                return Err(missing_pre_image(snapshot));
            };
            let existed = locked
                .get(viewer_id)
                .is_some_and(|r| r.direct_edges.contains_key(target_id));
            let written = store.write_direct_edge(
                locked,
                viewer_id,
                target_id,
                &DirectEdgeInput {
                    relation: relation.clone(),
                    content: content.clone(),
                    inheritable: Some(*inheritable),
                },
                Some((*viewer_version, *target_version)),
            )?;
            let message = if existed {
                "Direct edge restored from snapshot"
            } else {
                "Direct edge recreated from snapshot"
            };
            tracing::debug!(edge_id = %written.edge_id, "direct edge reverted");
            Ok(Reverted::new(message, None))
        }
        (
            ResourceRef::RelayEdge {
                viewer_id,
                target_id,
                chapter,
            },
            OperationType::Create,
        ) => revert_relay_create(store, locked, snapshot, viewer_id, target_id, chapter),
        (
            ResourceRef::RelayEdge {
                viewer_id,
                target_id,
                chapter,
            },
            OperationType::Modify,
        ) => {
            let Some(PreImage::RelayEdge {
                relation,
                content,
                inheritable,
                ..
            }) = &snapshot.pre_image
            else {
                return Err(missing_pre_image(snapshot));
            };
            let written = store.apply_upsert_relay(
                locked,
                viewer_id,
                target_id,
                chapter,
                &RelayEdgeInput {
                    relation: Some(relation.clone()),
                    content: content.clone(),
                    inheritable: Some(*inheritable),
                    task_description: Some(task_description.to_string()),
                },
            )?;
            Ok(Reverted::new(
                format!("Chapter restored as version {}", written.version),
                Some(written.version),
            ))
        }
    }
}

fn revert_entity_create(
    store: &GraphStore,
    locked: &mut LockedEntities,
    entity_id: &str,
) -> Result<Reverted> {
    if !locked.holds(entity_id) {
        return Ok(Reverted::new("Entity already removed", None));
    }
    GraphStore::check_purge(locked, entity_id)?;
    store
        .apply_purge_entity(locked, entity_id)
        .map_err(after_validation)?;
    Ok(Reverted::new("Entity removed", None))
}

fn revert_entity_modify(
    store: &GraphStore,
    locked: &mut LockedEntities,
    snapshot: &Snapshot,
    entity_id: &str,
    pre: &PreImage,
    task_description: &str,
) -> Result<Reverted> {
    let PreImage::Entity {
        node_type,
        version,
        name,
        content,
    } = pre
    else {
        return Err(missing_pre_image(snapshot));
    };

    let Some(record) = locked.get(entity_id) else {
        let (Some(version), Some(name), Some(content)) = (version, name, content) else {
            return Err(LoreError::conflict(
                "entity",
                entity_id,
                "entity was deleted and the snapshot holds no state to restore",
            ));
        };
        let (fresh, created) = store.insert_entity(
            &NewEntity {
                entity_id: entity_id.to_string(),
                node_type: *node_type,
                name: name.clone(),
                content: content.clone(),
                task_description: Some(task_description.to_string()),
            },
            false,
            *version,
        )?;
        locked.merge(fresh);
        return Ok(Reverted::new(
            "Entity recreated from snapshot",
            Some(created.version),
        ));
    };

    let (Some(version), Some(name), Some(content)) = (version, name, content) else {
        // The entity had no state before the session
        let newer = record.states.range(snapshot.baseline_version + 1..).map(|(v, _)| *v);
        if !snapshot.owns_all(newer) {
            return Err(LoreError::conflict(
                "entity",
                entity_id,
                "entity holds versions written outside this session and the snapshot has no state to restore",
            ));
        }
        store.apply_truncate_versions(locked, entity_id, snapshot.baseline_version)?;
        return Ok(Reverted::new("Entity restored to its stateless form", None));
    };

    // Truncation is only exact when every newer state is this session's own
    // unreferenced write; anything else gets a compensating version
    let exact = record
        .states
        .get(version)
        .is_some_and(|s| &s.name == name && &s.content == content)
        && record
            .states
            .range(version + 1..)
            .all(|(_, s)| s.is_unreferenced())
        && snapshot.owns_all(record.states.range(version + 1..).map(|(v, _)| *v));

    if exact {
        let dropped = store.apply_truncate_versions(locked, entity_id, *version)?;
        let message = if dropped.is_empty() {
            "Entity already matches snapshot".to_string()
        } else {
            format!(
                "Reverted to version {version}, dropped {} newer state(s)",
                dropped.len()
            )
        };
        return Ok(Reverted::new(message, Some(*version)));
    }

    let written = store.apply_create_version(
        locked,
        entity_id,
        &NewVersion {
            content: content.clone(),
            name: Some(name.clone()),
            task_description: Some(task_description.to_string()),
        },
    )?;
    Ok(Reverted::new(
        format!("Snapshot restored as version {}", written.new_version),
        Some(written.new_version),
    ))
}

fn revert_relay_create(
    store: &GraphStore,
    locked: &mut LockedEntities,
    snapshot: &Snapshot,
    viewer_id: &str,
    target_id: &str,
    chapter: &str,
) -> Result<Reverted> {
    let baseline_version = snapshot.baseline_version;
    let edge_id = relay_edge_id(viewer_id, chapter, target_id);
    let relay_id = relay_entity_id(&edge_id);
    let link = locked
        .get(viewer_id)
        .and_then(|r| r.relay_links.get(&edge_id))
        .cloned();

    // Chapter states written outside this session stay in the sub-entity's
    // history; only the link is removed then
    let truncate = locked.get(&relay_id).is_some_and(|record| {
        snapshot.owns_all(record.states.range(baseline_version + 1..).map(|(v, _)| *v))
    });

    if let Some(record) = locked.get(&relay_id).filter(|_| truncate) {
        for state in record.states.range(baseline_version + 1..).map(|(_, s)| s) {
            let pinned = u32::from(link.as_ref().is_some_and(|l| l.chapter_version == state.version));
            if state.in_count.saturating_sub(pinned) > 0 || state.out_count.saturating_sub(pinned) > 0 {
                return Err(LoreError::conflict(
                    "state",
                    &state.state_id,
                    "chapter state is referenced outside its relay link",
                ));
            }
        }
    }

    let unlinked = link.is_some();
    let removed_entity = (|| -> Result<bool> {
        if unlinked {
            store.apply_delete_relay(locked, viewer_id, &edge_id)?;
        }
        if !truncate || !locked.holds(&relay_id) {
            return Ok(false);
        }
        store.apply_truncate_versions(locked, &relay_id, baseline_version)?;
        let empty = locked.get(&relay_id).is_some_and(|r| r.states.is_empty());
        if baseline_version == 0 && empty {
            if let Some(record) = locked.mark_removed(&relay_id) {
                store.forget_entity(&record);
                store.touch();
                return Ok(true);
            }
        }
        Ok(false)
    })()
    .map_err(after_validation)?;

    let message = match (unlinked, removed_entity) {
        (true, true) => "Chapter link and sub-entity removed",
        (true, false) => "Chapter link removed",
        (false, true) => "Chapter sub-entity removed",
        (false, false) => "Chapter already removed",
    };
    Ok(Reverted::new(message, None))
}
