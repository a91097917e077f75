//! Direct edges, relay chapters and parent/child links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::GraphStore;
use super::locks::LockedEntities;
use super::types::{
    DirectEdge, NodeType, RelayLink, State, direct_edge_id, relay_edge_id, relay_entity_id,
    require_text, validate_identifier,
};
use super::versioned::{NewEntity, NewVersion};
use super::views::DirectEdgeView;
use crate::error::{LoreError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectEdgeInput {
    pub relation: String,
    pub content: String,
    /// Keeps the previous value when omitted; new edges default to true
    #[serde(default)]
    pub inheritable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectEdgeWritten {
    pub edge_id: String,
    pub created: bool,
    pub inheritable: bool,
    pub viewer_version: u64,
    pub target_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectEdgeDeleted {
    pub edge_id: String,
    pub removed_relay_links: Vec<String>,
}

/// Chapter write; the relation label defaults to the chapter name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayEdgeInput {
    #[serde(default)]
    pub relation: Option<String>,
    pub content: String,
    /// Keeps the previous value when omitted. Forced off while the direct
    /// edge is not inheritable.
    #[serde(default)]
    pub inheritable: Option<bool>,
    #[serde(default)]
    pub task_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEdgeWritten {
    pub edge_id: String,
    pub relay_entity_id: String,
    pub state_id: String,
    pub version: u64,
    pub created: bool,
    pub inheritable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEdgeDeleted {
    pub edge_id: String,
    pub relay_entity_id: String,
}

/// A relay link together with the chapter's current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEdgeView {
    pub edge_id: String,
    pub relation: String,
    pub chapter: String,
    pub viewer_entity_id: String,
    pub target_entity_id: String,
    pub relay_entity_id: String,
    pub inheritable: bool,
    pub viewer_version: u64,
    pub chapter_version: u64,
    pub target_version: u64,
    pub created_at: DateTime<Utc>,
    pub state: State,
}

/// One outgoing direct edge as listed for its viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEdge {
    pub edge_id: String,
    pub target_entity_id: String,
    pub target_name: String,
    pub relation: String,
    pub content: String,
    pub inheritable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub viewer_version: u64,
    pub target_version: u64,
    pub relay_count: usize,
}

/// The direct edge between two entities plus its chapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipView {
    pub direct: DirectEdgeView,
    pub relays: Vec<RelayEdgeView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLinkChange {
    pub child_id: String,
    pub parent_id: String,
    /// Whether the call changed anything
    pub changed: bool,
}

/// Name shown for a pinned state that carries none
pub(crate) const UNNAMED: &str = "Unnamed";

fn validate_pair(viewer_id: &str, target_id: &str) -> Result<()> {
    require_text("viewer_id", viewer_id)?;
    require_text("target_id", target_id)?;
    if viewer_id == target_id {
        return Err(LoreError::validation(format!(
            "self-edges are not allowed ('{viewer_id}')"
        )));
    }
    Ok(())
}

/// Version to pin on a direct-edge endpoint: `preferred` when that state
/// still exists, else the current version.
fn endpoint_version(locked: &LockedEntities, entity_id: &str, preferred: Option<u64>) -> Result<u64> {
    let record = locked.entity(entity_id)?;
    if record.hidden {
        return Err(LoreError::validation(format!(
            "relay sub-entity '{entity_id}' cannot be an edge endpoint"
        )));
    }
    if let Some(version) = preferred.filter(|v| record.states.contains_key(v)) {
        return Ok(version);
    }
    record
        .current_version()
        .ok_or_else(|| LoreError::not_found("current state", entity_id))
}

impl GraphStore {
    /// Write a direct edge, pinning `pins` where those states still exist
    pub(crate) fn write_direct_edge(
        &self,
        locked: &mut LockedEntities,
        viewer_id: &str,
        target_id: &str,
        input: &DirectEdgeInput,
        pins: Option<(u64, u64)>,
    ) -> Result<DirectEdgeWritten> {
        validate_pair(viewer_id, target_id)?;
        validate_identifier("relation", &input.relation)?;
        require_text("content", &input.content)?;

        let viewer_version = endpoint_version(locked, viewer_id, pins.map(|p| p.0))?;
        let target_version = endpoint_version(locked, target_id, pins.map(|p| p.1))?;
        let existing = locked.entity(viewer_id)?.direct_edges.get(target_id).cloned();
        let inheritable = input
            .inheritable
            .or(existing.as_ref().map(|e| e.inheritable))
            .unwrap_or(true);
        let now = Utc::now();

        let edge = match &existing {
            Some(old) => {
                locked.pin_direct(old, false)?;
                DirectEdge {
                    relation: input.relation.clone(),
                    content: input.content.clone(),
                    inheritable,
                    updated_at: now,
                    viewer_version,
                    target_version,
                    ..old.clone()
                }
            }
            None => DirectEdge {
                edge_id: direct_edge_id(viewer_id, target_id),
                viewer_id: viewer_id.to_string(),
                target_id: target_id.to_string(),
                relation: input.relation.clone(),
                content: input.content.clone(),
                inheritable,
                created_at: now,
                updated_at: now,
                viewer_version,
                target_version,
            },
        };

        locked.pin_direct(&edge, true)?;
        self.index_direct(&edge);
        let written = DirectEdgeWritten {
            edge_id: edge.edge_id.clone(),
            created: existing.is_none(),
            inheritable,
            viewer_version,
            target_version,
        };
        locked
            .entity_mut(viewer_id)?
            .direct_edges
            .insert(target_id.to_string(), edge);
        self.touch();

        tracing::debug!(
            edge_id = %written.edge_id,
            created = written.created,
            viewer_version,
            target_version,
            "direct edge written"
        );
        Ok(written)
    }

    pub(crate) fn apply_upsert_direct(
        &self,
        locked: &mut LockedEntities,
        viewer_id: &str,
        target_id: &str,
        input: &DirectEdgeInput,
    ) -> Result<DirectEdgeWritten> {
        self.write_direct_edge(locked, viewer_id, target_id, input, None)
    }

    pub async fn upsert_direct_edge(
        &self,
        viewer_id: &str,
        target_id: &str,
        input: DirectEdgeInput,
    ) -> Result<DirectEdgeWritten> {
        let mut locked = self.lock_entities([viewer_id, target_id]).await;
        self.apply_upsert_direct(&mut locked, viewer_id, target_id, &input)
    }

    pub async fn get_direct_edge(&self, viewer_id: &str, target_id: &str) -> Result<DirectEdgeView> {
        let edge = {
            let locked = self.lock_entities([viewer_id]).await;
            locked
                .entity(viewer_id)?
                .direct_edges
                .get(target_id)
                .cloned()
                .ok_or_else(|| LoreError::not_found("direct edge", direct_edge_id(viewer_id, target_id)))?
        };
        let target_name = self.pinned_name(target_id, edge.target_version).await;
        Ok(DirectEdgeView::from_edge(edge, target_name))
    }

    /// Lock both endpoints and every chapter sub-entity under the edge
    pub(crate) async fn lock_for_direct_delete(
        &self,
        viewer_id: &str,
        target_id: &str,
    ) -> Result<LockedEntities> {
        let seed = BTreeSet::from([viewer_id.to_string(), target_id.to_string()]);
        self.lock_planned(seed, |locked| {
            let mut needed = BTreeSet::from([viewer_id.to_string(), target_id.to_string()]);
            if let Some(record) = locked.get(viewer_id) {
                needed.extend(
                    record
                        .relay_links
                        .values()
                        .filter(|l| l.target_id == target_id)
                        .map(|l| l.relay_entity_id.clone()),
                );
            }
            Ok(needed)
        })
        .await
    }

    /// Delete a direct edge. Without `force` the delete is refused while
    /// chapter links hang off the edge; with it they are unlinked too.
    pub(crate) fn apply_delete_direct(
        &self,
        locked: &mut LockedEntities,
        viewer_id: &str,
        target_id: &str,
        force: bool,
    ) -> Result<DirectEdgeDeleted> {
        let record = locked.entity(viewer_id)?;
        let edge = record
            .direct_edges
            .get(target_id)
            .cloned()
            .ok_or_else(|| LoreError::not_found("direct edge", direct_edge_id(viewer_id, target_id)))?;
        let links: Vec<RelayLink> = record
            .relay_links
            .values()
            .filter(|l| l.target_id == target_id)
            .cloned()
            .collect();
        if !force && !links.is_empty() {
            tracing::warn!(edge_id = %edge.edge_id, relays = links.len(), "refusing to delete direct edge with chapters");
            return Err(LoreError::conflict(
                "direct edge",
                &edge.edge_id,
                format!(
                    "{} chapter link(s) depend on this edge; delete them first or pass force",
                    links.len()
                ),
            ));
        }

        let mut removed_relay_links = Vec::with_capacity(links.len());
        for link in &links {
            locked.pin_relay(link, false)?;
            locked.entity_mut(viewer_id)?.relay_links.remove(&link.edge_id);
            self.unindex_relay(&link.edge_id);
            removed_relay_links.push(link.edge_id.clone());
        }

        locked.pin_direct(&edge, false)?;
        locked.entity_mut(viewer_id)?.direct_edges.remove(target_id);
        self.unindex_direct(&edge.edge_id);
        self.touch();

        tracing::debug!(edge_id = %edge.edge_id, relays = removed_relay_links.len(), "direct edge deleted");
        Ok(DirectEdgeDeleted {
            edge_id: edge.edge_id,
            removed_relay_links,
        })
    }

    pub async fn delete_direct_edge(
        &self,
        viewer_id: &str,
        target_id: &str,
        force: bool,
    ) -> Result<DirectEdgeDeleted> {
        let mut locked = self.lock_for_direct_delete(viewer_id, target_id).await?;
        self.apply_delete_direct(&mut locked, viewer_id, target_id, force)
    }

    /// Lock viewer, target and the chapter sub-entity for a relay write.
    ///
    /// The sub-entity is only ever created while its viewer is locked, so
    /// once the viewer is held the sub-entity either is in the lock set or
    /// does not exist yet.
    pub(crate) async fn lock_for_relay(
        &self,
        viewer_id: &str,
        target_id: &str,
        chapter: &str,
    ) -> Result<LockedEntities> {
        let relay_id = relay_entity_id(&relay_edge_id(viewer_id, chapter, target_id));
        for _ in 0..=self.settings.max_lock_retries {
            let locked = self
                .lock_entities([viewer_id, target_id, relay_id.as_str()])
                .await;
            if locked.holds(&relay_id) || !self.contains(&relay_id) {
                return Ok(locked);
            }
        }
        Err(LoreError::Internal(format!(
            "could not lock chapter sub-entity '{relay_id}'"
        )))
    }

    pub(crate) fn apply_upsert_relay(
        &self,
        locked: &mut LockedEntities,
        viewer_id: &str,
        target_id: &str,
        chapter: &str,
        input: &RelayEdgeInput,
    ) -> Result<RelayEdgeWritten> {
        validate_pair(viewer_id, target_id)?;
        validate_identifier("chapter", chapter)?;
        require_text("content", &input.content)?;
        let relation = input.relation.clone().unwrap_or_else(|| chapter.to_string());
        validate_identifier("relation", &relation)?;

        let direct_inheritable = locked
            .entity(viewer_id)?
            .direct_edges
            .get(target_id)
            .map(|e| e.inheritable)
            .ok_or_else(|| LoreError::not_found("direct edge", direct_edge_id(viewer_id, target_id)))?;
        let viewer_version = endpoint_version(locked, viewer_id, None)?;
        let target_version = endpoint_version(locked, target_id, None)?;

        let edge_id = relay_edge_id(viewer_id, chapter, target_id);
        let relay_id = relay_entity_id(&edge_id);

        let (state_id, chapter_version) = if locked.holds(&relay_id) {
            let written = self.apply_create_version(
                locked,
                &relay_id,
                &NewVersion {
                    content: input.content.clone(),
                    name: Some(chapter.to_string()),
                    task_description: input.task_description.clone(),
                },
            )?;
            (written.state_id, written.new_version)
        } else {
            let (fresh, created) = self.insert_entity(
                &NewEntity {
                    entity_id: relay_id.clone(),
                    node_type: NodeType::Relationship,
                    name: chapter.to_string(),
                    content: input.content.clone(),
                    task_description: input.task_description.clone(),
                },
                true,
                1,
            )?;
            locked.merge(fresh);
            (created.state_id, created.version)
        };

        let existing = locked.entity(viewer_id)?.relay_links.get(&edge_id).cloned();
        if let Some(old) = &existing {
            locked.pin_relay(old, false)?;
        }
        let inheritable = direct_inheritable
            && input
                .inheritable
                .or(existing.as_ref().map(|l| l.inheritable))
                .unwrap_or(true);
        let link = RelayLink {
            edge_id: edge_id.clone(),
            viewer_id: viewer_id.to_string(),
            target_id: target_id.to_string(),
            chapter: chapter.to_string(),
            relation,
            relay_entity_id: relay_id.clone(),
            inheritable,
            created_at: existing.as_ref().map(|l| l.created_at).unwrap_or_else(Utc::now),
            viewer_version,
            chapter_version,
            target_version,
        };
        locked.pin_relay(&link, true)?;
        self.index_relay(&link);
        locked
            .entity_mut(viewer_id)?
            .relay_links
            .insert(edge_id.clone(), link);
        self.touch();

        tracing::debug!(edge_id = %edge_id, chapter_version, "relay edge written");
        Ok(RelayEdgeWritten {
            edge_id,
            relay_entity_id: relay_id,
            state_id,
            version: chapter_version,
            created: existing.is_none(),
            inheritable,
        })
    }

    pub async fn upsert_relay_edge(
        &self,
        viewer_id: &str,
        target_id: &str,
        chapter: &str,
        input: RelayEdgeInput,
    ) -> Result<RelayEdgeWritten> {
        let mut locked = self.lock_for_relay(viewer_id, target_id, chapter).await?;
        self.apply_upsert_relay(&mut locked, viewer_id, target_id, chapter, &input)
    }

    pub async fn get_relay_edge(&self, viewer_id: &str, target_id: &str, chapter: &str) -> Result<RelayEdgeView> {
        let edge_id = relay_edge_id(viewer_id, chapter, target_id);
        let link = {
            let locked = self.lock_entities([viewer_id]).await;
            locked
                .entity(viewer_id)?
                .relay_links
                .get(&edge_id)
                .cloned()
                .ok_or_else(|| LoreError::not_found("relay edge", &edge_id))?
        };
        self.relay_view(link).await
    }

    async fn relay_view(&self, link: RelayLink) -> Result<RelayEdgeView> {
        let state = self.get_current_state(&link.relay_entity_id).await?;
        Ok(RelayEdgeView {
            edge_id: link.edge_id,
            relation: link.relation,
            chapter: link.chapter,
            viewer_entity_id: link.viewer_id,
            target_entity_id: link.target_id,
            relay_entity_id: link.relay_entity_id,
            inheritable: link.inheritable,
            viewer_version: link.viewer_version,
            chapter_version: link.chapter_version,
            target_version: link.target_version,
            created_at: link.created_at,
            state,
        })
    }

    /// Lock the endpoints and sub-entity of an existing relay edge
    pub(crate) async fn lock_for_relay_delete(&self, edge_id: &str) -> Result<(LockedEntities, String)> {
        let key = self
            .lookup_relay(edge_id)
            .ok_or_else(|| LoreError::not_found("relay edge", edge_id))?;
        let relay_id = relay_entity_id(edge_id);
        let locked = self
            .lock_entities([key.viewer_id.as_str(), key.target_id.as_str(), relay_id.as_str()])
            .await;
        Ok((locked, key.viewer_id))
    }

    pub(crate) fn apply_delete_relay(
        &self,
        locked: &mut LockedEntities,
        viewer_id: &str,
        edge_id: &str,
    ) -> Result<RelayEdgeDeleted> {
        let link = locked
            .entity(viewer_id)?
            .relay_links
            .get(edge_id)
            .cloned()
            .ok_or_else(|| LoreError::not_found("relay edge", edge_id))?;

        locked.pin_relay(&link, false)?;
        locked.entity_mut(viewer_id)?.relay_links.remove(edge_id);
        self.unindex_relay(edge_id);
        self.touch();

        tracing::debug!(edge_id, "relay edge deleted");
        Ok(RelayEdgeDeleted {
            edge_id: link.edge_id,
            relay_entity_id: link.relay_entity_id,
        })
    }

    pub async fn delete_relay_edge(&self, edge_id: &str) -> Result<RelayEdgeDeleted> {
        let (mut locked, viewer_id) = self.lock_for_relay_delete(edge_id).await?;
        self.apply_delete_relay(&mut locked, &viewer_id, edge_id)
    }

    /// Every direct edge held by the entity, whichever version it pins
    pub async fn list_outbound_edges(&self, entity_id: &str) -> Result<Vec<OutboundEdge>> {
        let (edges, relay_counts): (Vec<DirectEdge>, Vec<usize>) = {
            let locked = self.lock_entities([entity_id]).await;
            let record = locked.entity(entity_id)?;
            record
                .direct_edges
                .values()
                .map(|e| (e.clone(), record.relay_count_toward(&e.target_id)))
                .unzip()
        };

        let mut outbound = Vec::with_capacity(edges.len());
        for (edge, relay_count) in edges.into_iter().zip(relay_counts) {
            let target_name = self.pinned_name(&edge.target_id, edge.target_version).await;
            outbound.push(OutboundEdge {
                edge_id: edge.edge_id,
                target_entity_id: edge.target_id,
                target_name,
                relation: edge.relation,
                content: edge.content,
                inheritable: edge.inheritable,
                created_at: edge.created_at,
                updated_at: edge.updated_at,
                viewer_version: edge.viewer_version,
                target_version: edge.target_version,
                relay_count,
            });
        }
        Ok(outbound)
    }

    pub async fn get_relationship(&self, viewer_id: &str, target_id: &str) -> Result<RelationshipView> {
        let direct = self.get_direct_edge(viewer_id, target_id).await?;
        let links: Vec<RelayLink> = {
            let locked = self.lock_entities([viewer_id]).await;
            locked
                .entity(viewer_id)?
                .relay_links
                .values()
                .filter(|l| l.target_id == target_id)
                .cloned()
                .collect()
        };

        let mut relays = Vec::with_capacity(links.len());
        for link in links {
            match self.relay_view(link).await {
                Ok(view) => relays.push(view),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(RelationshipView { direct, relays })
    }

    /// Name of a pinned state, falling back to a placeholder
    pub(crate) async fn pinned_name(&self, entity_id: &str, version: u64) -> String {
        let locked = self.lock_entities([entity_id]).await;
        locked
            .get(entity_id)
            .and_then(|r| r.states.get(&version).or_else(|| r.current()))
            .map(|s| s.name.clone())
            .unwrap_or_else(|| UNNAMED.to_string())
    }

    pub async fn link_parent(&self, child_id: &str, parent_id: &str) -> Result<ParentLinkChange> {
        require_text("child_id", child_id)?;
        require_text("parent_id", parent_id)?;
        if child_id == parent_id {
            return Err(LoreError::validation(format!(
                "entity '{child_id}' cannot be its own parent"
            )));
        }

        let mut locked = self.lock_entities([child_id, parent_id]).await;
        let child = locked.entity(child_id)?;
        let parent = locked.entity(parent_id)?;

        let changed = if child.parents.contains(parent_id) {
            false
        } else if parent.parents.contains(child_id) {
            tracing::warn!(child_id, parent_id, "refusing parent link that closes a cycle");
            return Err(LoreError::conflict(
                "parent link",
                format!("{child_id} -> {parent_id}"),
                format!("'{parent_id}' is already a child of '{child_id}'"),
            ));
        } else if self.settings.single_parent && !child.parents.is_empty() {
            return Err(LoreError::conflict(
                "parent link",
                format!("{child_id} -> {parent_id}"),
                format!("'{child_id}' already has a parent"),
            ));
        } else {
            locked.entity_mut(child_id)?.parents.insert(parent_id.to_string());
            locked.entity_mut(parent_id)?.children.insert(child_id.to_string());
            self.touch();
            true
        };

        tracing::debug!(child_id, parent_id, changed, "parent link");
        Ok(ParentLinkChange {
            child_id: child_id.to_string(),
            parent_id: parent_id.to_string(),
            changed,
        })
    }

    pub async fn unlink_parent(&self, child_id: &str, parent_id: &str) -> Result<ParentLinkChange> {
        let mut locked = self.lock_entities([child_id, parent_id]).await;
        locked.entity(parent_id)?;
        let changed = locked.entity_mut(child_id)?.parents.remove(parent_id);
        locked.entity_mut(parent_id)?.children.remove(child_id);
        if changed {
            self.touch();
        }

        tracing::debug!(child_id, parent_id, changed, "parent unlink");
        Ok(ParentLinkChange {
            child_id: child_id.to_string(),
            parent_id: parent_id.to_string(),
            changed,
        })
    }
}
