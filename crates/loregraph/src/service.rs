//! The memory graph façade.
//!
//! Every caller goes through [`MemoryGraph`]. Tracked mutations capture the
//! pre-session image under the same entity locks as the write and bind it to
//! a review session only once the write succeeded.

use tokio::sync::broadcast;

use crate::admin::{GraphEvent, GraphStats};
use crate::config::{Config, ReviewConfig};
use crate::error::{LoreError, Result};
use crate::graph::types::{relay_edge_id, relay_entity_id};
use crate::graph::{
    CatalogEntry, ChildView, DirectEdgeDeleted, DirectEdgeInput, DirectEdgeView,
    DirectEdgeWritten, EntityCreated, EntityDeleted, EntityInclude, EntityView, GraphStore,
    LockedEntities, NewEntity, NewVersion, OutboundEdge, ParentLinkChange, RelationshipView,
    RelayEdgeDeleted, RelayEdgeInput, RelayEdgeView, RelayEdgeWritten, State, StateDeleted,
    VersionCreated,
};
use crate::maintenance::{BatchDeleteReport, GarbageCollector, OrphanEntity, OrphanMode, OrphanState};
use crate::review::rollback;
use crate::review::{
    ApproveOutcome, Capture, ClearOutcome, DiffReport, PreImage, ResourceRef, ResourceType,
    ReviewLedger, RollbackOutcome, SessionInfo, Snapshot, TextDiff, WriteContext, diff_texts,
};
use crate::storage::GraphImage;

pub struct MemoryGraph {
    store: GraphStore,
    ledger: ReviewLedger,
    review: ReviewConfig,
    events: broadcast::Sender<GraphEvent>,
}

fn capture_entity(locked: &LockedEntities, entity_id: &str) -> Capture {
    let resource = ResourceRef::entity(entity_id);
    match locked.get(entity_id) {
        Some(record) => {
            let current = record.current();
            Capture::modified(
                resource,
                PreImage::Entity {
                    node_type: record.node_type,
                    version: current.map(|s| s.version),
                    name: current.map(|s| s.name.clone()),
                    content: current.map(|s| s.content.clone()),
                },
                record.high_water_mark(),
            )
        }
        None => Capture::created(resource, 0),
    }
}

fn capture_direct(locked: &LockedEntities, viewer_id: &str, target_id: &str) -> Capture {
    let resource = ResourceRef::direct(viewer_id, target_id);
    match locked.get(viewer_id).and_then(|r| r.direct_edges.get(target_id)) {
        Some(edge) => Capture::modified(
            resource,
            PreImage::DirectEdge {
                relation: edge.relation.clone(),
                content: edge.content.clone(),
                inheritable: edge.inheritable,
                viewer_version: edge.viewer_version,
                target_version: edge.target_version,
            },
            0,
        ),
        None => Capture::created(resource, 0),
    }
}

fn capture_relay(locked: &LockedEntities, viewer_id: &str, target_id: &str, chapter: &str) -> Capture {
    let resource = ResourceRef::relay(viewer_id, target_id, chapter);
    let edge_id = relay_edge_id(viewer_id, chapter, target_id);
    let link = locked.get(viewer_id).and_then(|r| r.relay_links.get(&edge_id));
    let sub_entity = link
        .map(|l| l.relay_entity_id.clone())
        .unwrap_or_else(|| relay_entity_id(&edge_id));
    let sub_record = locked.get(&sub_entity);
    let baseline = sub_record.map(|r| r.high_water_mark()).unwrap_or(0);

    match link {
        Some(link) => Capture::modified(
            resource,
            PreImage::RelayEdge {
                relation: link.relation.clone(),
                inheritable: link.inheritable,
                content: sub_record
                    .and_then(|r| r.current())
                    .map(|s| s.content.clone())
                    .unwrap_or_default(),
                chapter_version: link.chapter_version,
                viewer_version: link.viewer_version,
                target_version: link.target_version,
            },
            baseline,
        ),
        None => Capture::created(resource, baseline),
    }
}

impl MemoryGraph {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            GraphStore::new(config.graph.clone()),
            ReviewLedger::new(),
            config,
        )
    }

    pub fn from_parts(store: GraphStore, ledger: ReviewLedger, config: &Config) -> Self {
        let (events, _) = broadcast::channel(config.server.event_buffer.max(1));
        Self {
            store,
            ledger,
            review: config.review.clone(),
            events,
        }
    }

    /// Rebuild from a checkpoint image
    pub fn from_image(image: GraphImage, config: &Config) -> Result<Self> {
        let store = GraphStore::from_records(image.entities, config.graph.clone())?;
        let ledger = ReviewLedger::from_image(image.ledger);
        Ok(Self::from_parts(store, ledger, config))
    }

    /// Consistent image of the graph and ledger.
    ///
    /// Holds every entity lock while the ledger is copied, so no tracked
    /// mutation can land between the two.
    pub async fn image(&self) -> GraphImage {
        let locked = self.store.lock_all().await;
        let entities = GraphStore::records_of(&locked);
        let ledger = self.ledger.export().await;
        let generation = self.store.generation();
        drop(locked);
        GraphImage::new(generation, entities, ledger)
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn ledger(&self) -> &ReviewLedger {
        &self.ledger
    }

    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event; dropped when nobody listens
    pub fn notify(&self, event: GraphEvent) {
        let _ = self.events.send(event);
    }

    fn effective(&self, ctx: &WriteContext) -> WriteContext {
        match ctx {
            WriteContext::Auto if !self.review.track_by_default => WriteContext::Untracked,
            other => other.clone(),
        }
    }

    async fn record(&self, ctx: &WriteContext, capture: Capture) -> Option<String> {
        self.ledger.record(ctx, capture).await.map(|r| r.session_id)
    }

    // ------------------------------------------------------------------
    // Tracked mutations
    // ------------------------------------------------------------------

    pub async fn create_entity(&self, input: NewEntity, ctx: &WriteContext) -> Result<EntityCreated> {
        let ctx = self.effective(ctx);
        let (locked, created) = self.store.insert_entity(&input, false, 1)?;
        let capture = Capture::created(ResourceRef::entity(&input.entity_id), 0).wrote(created.version);
        let session_id = self.record(&ctx, capture).await;
        drop(locked);

        self.notify(GraphEvent::EntityCreated {
            entity_id: created.entity_id.clone(),
            version: created.version,
            session_id,
        });
        Ok(created)
    }

    pub async fn create_version(
        &self,
        entity_id: &str,
        input: NewVersion,
        ctx: &WriteContext,
    ) -> Result<VersionCreated> {
        let ctx = self.effective(ctx);
        let mut locked = self.store.lock_entities([entity_id]).await;
        let capture = capture_entity(&locked, entity_id);
        let created = self.store.apply_create_version(&mut locked, entity_id, &input)?;
        let session_id = self.record(&ctx, capture.wrote(created.new_version)).await;
        drop(locked);

        self.notify(GraphEvent::VersionCreated {
            entity_id: entity_id.to_string(),
            version: created.new_version,
            session_id,
        });
        Ok(created)
    }

    pub async fn upsert_direct_edge(
        &self,
        viewer_id: &str,
        target_id: &str,
        input: DirectEdgeInput,
        ctx: &WriteContext,
    ) -> Result<DirectEdgeWritten> {
        let ctx = self.effective(ctx);
        let mut locked = self.store.lock_entities([viewer_id, target_id]).await;
        let capture = capture_direct(&locked, viewer_id, target_id);
        let written = self
            .store
            .apply_upsert_direct(&mut locked, viewer_id, target_id, &input)?;
        let session_id = self.record(&ctx, capture).await;
        drop(locked);

        self.notify(GraphEvent::DirectEdgeWritten {
            edge_id: written.edge_id.clone(),
            created: written.created,
            session_id,
        });
        Ok(written)
    }

    /// Delete a direct edge; `force` also unlinks its chapters. Cascaded
    /// chapter links are snapshotted too so that a rollback can bring them
    /// back.
    pub async fn delete_direct_edge(
        &self,
        viewer_id: &str,
        target_id: &str,
        force: bool,
        ctx: &WriteContext,
    ) -> Result<DirectEdgeDeleted> {
        let ctx = self.effective(ctx);
        let mut locked = self.store.lock_for_direct_delete(viewer_id, target_id).await?;
        let mut captures = vec![capture_direct(&locked, viewer_id, target_id)];
        if let Some(record) = locked.get(viewer_id) {
            let chapters: Vec<String> = record
                .relay_links
                .values()
                .filter(|l| l.target_id == target_id)
                .map(|l| l.chapter.clone())
                .collect();
            captures.extend(
                chapters
                    .iter()
                    .map(|chapter| capture_relay(&locked, viewer_id, target_id, chapter)),
            );
        }

        let deleted = self
            .store
            .apply_delete_direct(&mut locked, viewer_id, target_id, force)?;
        let mut session_id = None;
        for capture in captures {
            session_id = self.record(&ctx, capture).await;
        }
        drop(locked);

        self.notify(GraphEvent::DirectEdgeDeleted {
            edge_id: deleted.edge_id.clone(),
            removed_relay_links: deleted.removed_relay_links.len(),
            session_id,
        });
        Ok(deleted)
    }

    pub async fn upsert_relay_edge(
        &self,
        viewer_id: &str,
        target_id: &str,
        chapter: &str,
        input: RelayEdgeInput,
        ctx: &WriteContext,
    ) -> Result<RelayEdgeWritten> {
        let ctx = self.effective(ctx);
        let mut locked = self.store.lock_for_relay(viewer_id, target_id, chapter).await?;
        let capture = capture_relay(&locked, viewer_id, target_id, chapter);
        let written = self
            .store
            .apply_upsert_relay(&mut locked, viewer_id, target_id, chapter, &input)?;
        let session_id = self.record(&ctx, capture.wrote(written.version)).await;
        drop(locked);

        self.notify(GraphEvent::RelayEdgeWritten {
            edge_id: written.edge_id.clone(),
            version: written.version,
            session_id,
        });
        Ok(written)
    }

    pub async fn delete_relay_edge(&self, edge_id: &str, ctx: &WriteContext) -> Result<RelayEdgeDeleted> {
        let ctx = self.effective(ctx);
        let (mut locked, viewer_id) = self.store.lock_for_relay_delete(edge_id).await?;
        let link = locked
            .get(&viewer_id)
            .and_then(|r| r.relay_links.get(edge_id))
            .cloned()
            .ok_or_else(|| LoreError::not_found("relay edge", edge_id))?;
        let capture = capture_relay(&locked, &link.viewer_id, &link.target_id, &link.chapter);
        let deleted = self.store.apply_delete_relay(&mut locked, &viewer_id, edge_id)?;
        let session_id = self.record(&ctx, capture).await;
        drop(locked);

        self.notify(GraphEvent::RelayEdgeDeleted {
            edge_id: deleted.edge_id.clone(),
            session_id,
        });
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Maintenance mutations (never snapshotted)
    // ------------------------------------------------------------------

    pub async fn delete_state(&self, state_id: &str) -> Result<StateDeleted> {
        let deleted = self.store.delete_state(state_id).await?;
        self.notify(GraphEvent::StateDeleted {
            state_id: deleted.deleted_state_id.clone(),
            entity_id: deleted.entity_id.clone(),
            new_current_version: deleted.new_current_version,
        });
        Ok(deleted)
    }

    pub async fn delete_entity(&self, entity_id: &str) -> Result<EntityDeleted> {
        let deleted = self.store.delete_entity(entity_id).await?;
        self.notify(GraphEvent::EntityDeleted {
            entity_id: deleted.deleted_entity_id.clone(),
        });
        Ok(deleted)
    }

    pub async fn link_parent(&self, child_id: &str, parent_id: &str) -> Result<ParentLinkChange> {
        let change = self.store.link_parent(child_id, parent_id).await?;
        if change.changed {
            self.notify(GraphEvent::ParentLinkChanged {
                child_id: change.child_id.clone(),
                parent_id: change.parent_id.clone(),
                linked: true,
            });
        }
        Ok(change)
    }

    pub async fn unlink_parent(&self, child_id: &str, parent_id: &str) -> Result<ParentLinkChange> {
        let change = self.store.unlink_parent(child_id, parent_id).await?;
        if change.changed {
            self.notify(GraphEvent::ParentLinkChanged {
                child_id: change.child_id.clone(),
                parent_id: change.parent_id.clone(),
                linked: false,
            });
        }
        Ok(change)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_entity(&self, entity_id: &str, include: EntityInclude) -> Result<EntityView> {
        self.store.get_entity(entity_id, include).await
    }

    pub async fn get_current_state(&self, entity_id: &str) -> Result<State> {
        self.store.get_current_state(entity_id).await
    }

    pub async fn get_state(&self, state_id: &str) -> Result<State> {
        self.store.get_state(state_id).await
    }

    pub async fn list_history(&self, entity_id: &str) -> Result<Vec<State>> {
        self.store.list_history(entity_id).await
    }

    pub async fn get_direct_edge(&self, viewer_id: &str, target_id: &str) -> Result<DirectEdgeView> {
        self.store.get_direct_edge(viewer_id, target_id).await
    }

    pub async fn get_relay_edge(&self, viewer_id: &str, target_id: &str, chapter: &str) -> Result<RelayEdgeView> {
        self.store.get_relay_edge(viewer_id, target_id, chapter).await
    }

    pub async fn list_outbound_edges(&self, entity_id: &str) -> Result<Vec<OutboundEdge>> {
        self.store.list_outbound_edges(entity_id).await
    }

    pub async fn get_relationship(&self, viewer_id: &str, target_id: &str) -> Result<RelationshipView> {
        self.store.get_relationship(viewer_id, target_id).await
    }

    pub async fn list_children(&self, parent_id: &str) -> Result<Vec<ChildView>> {
        self.store.list_children(parent_id).await
    }

    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        self.store.catalog().await
    }

    // ------------------------------------------------------------------
    // Review
    // ------------------------------------------------------------------

    pub async fn open_session(&self, session_id: Option<String>) -> Result<SessionInfo> {
        let info = self.ledger.open_session(session_id).await?;
        self.store.touch();
        Ok(info)
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.ledger.list_sessions().await
    }

    pub async fn list_snapshots(&self, session_id: &str) -> Result<Vec<Snapshot>> {
        self.ledger.list_snapshots(session_id).await
    }

    fn resolve_resource(&self, resource_type: ResourceType, resource_id: &str) -> Result<ResourceRef> {
        let resolved = match resource_type {
            ResourceType::Entity => self
                .store
                .contains(resource_id)
                .then(|| ResourceRef::entity(resource_id)),
            ResourceType::DirectEdge => self
                .store
                .lookup_direct(resource_id)
                .map(|key| ResourceRef::direct(key.viewer_id, key.target_id)),
            ResourceType::RelayEdge => self.store.lookup_relay(resource_id).and_then(|key| {
                key.chapter
                    .map(|chapter| ResourceRef::relay(key.viewer_id, key.target_id, chapter))
            }),
        };
        resolved.ok_or_else(|| LoreError::not_found(resource_kind(resource_type), resource_id))
    }

    /// Live text of a resource, `None` when it does not exist
    async fn current_content(&self, resource: &ResourceRef) -> Result<Option<String>> {
        let result = match resource {
            ResourceRef::Entity { entity_id } => {
                self.store.get_current_state(entity_id).await.map(|s| s.content)
            }
            ResourceRef::DirectEdge { viewer_id, target_id } => self
                .store
                .get_direct_edge(viewer_id, target_id)
                .await
                .map(|e| e.content),
            ResourceRef::RelayEdge {
                viewer_id,
                target_id,
                chapter,
            } => self
                .store
                .get_relay_edge(viewer_id, target_id, chapter)
                .await
                .map(|r| r.state.content),
        };
        match result {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn diff(
        &self,
        session_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<DiffReport> {
        let snapshot = self.ledger.find(session_id, resource_type, resource_id).await?;
        let resource = match &snapshot {
            Some(snapshot) => snapshot.resource.clone(),
            None => self.resolve_resource(resource_type, resource_id)?,
        };
        let current = self.current_content(&resource).await?;

        let (operation_type, baseline) = match &snapshot {
            Some(snapshot) => (Some(snapshot.operation_type), snapshot.snapshot_content.clone()),
            None => {
                let current = current
                    .clone()
                    .ok_or_else(|| LoreError::not_found(resource_kind(resource_type), resource_id))?;
                (None, Some(current))
            }
        };

        let current_content = current.unwrap_or_default();
        let diff = diff_texts(baseline.as_deref().unwrap_or(""), &current_content);
        Ok(DiffReport {
            session_id: session_id.to_string(),
            resource_id: resource_id.to_string(),
            resource_type,
            operation_type,
            snapshot_content: baseline,
            current_content,
            has_changes: diff.has_changes,
            diff_summary: diff.diff_summary,
            diff_unified: diff.diff_unified,
            hunks: diff.hunks,
        })
    }

    /// Accept the current value and forget the snapshot
    pub async fn approve(
        &self,
        session_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<ApproveOutcome> {
        let session_closed = self
            .ledger
            .remove(session_id, resource_type, resource_id, true)
            .await?;
        self.store.touch();

        tracing::info!(session_id, %resource_type, resource_id, "change approved");
        self.notify(GraphEvent::SnapshotApproved {
            session_id: session_id.to_string(),
            resource_type,
            resource_id: resource_id.to_string(),
        });
        Ok(ApproveOutcome {
            session_id: session_id.to_string(),
            resource_id: resource_id.to_string(),
            resource_type,
            success: true,
            session_closed,
            message: if session_closed {
                "Change approved, session closed".to_string()
            } else {
                "Change approved".to_string()
            },
        })
    }

    /// Restore the pre-session value of a resource and drop its snapshot
    pub async fn rollback(
        &self,
        session_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
        task_description: Option<String>,
    ) -> Result<RollbackOutcome> {
        let snapshot = self
            .ledger
            .require(session_id, resource_type, resource_id)
            .await?;
        let mut locked = rollback::lock_for(&self.store, &snapshot.resource).await?;

        // Detached for the duration of the revert, so a concurrent approve or
        // clear sees it as already resolved
        let (position, snapshot) = self
            .ledger
            .take(session_id, resource_type, resource_id)
            .await?;
        let task = task_description.unwrap_or_else(|| self.review.rollback_task_description.clone());

        let reverted = match rollback::revert(&self.store, &mut locked, &snapshot, &task) {
            Ok(reverted) => reverted,
            Err(e) => {
                tracing::warn!(session_id, %resource_type, resource_id, error = %e, "rollback refused");
                self.ledger.restore(position, snapshot).await;
                return Err(e);
            }
        };
        self.store.touch();
        drop(locked);

        tracing::info!(session_id, %resource_type, resource_id, "change rolled back");
        self.notify(GraphEvent::SnapshotRolledBack {
            session_id: session_id.to_string(),
            resource_type,
            resource_id: resource_id.to_string(),
            new_version: reverted.new_version,
        });
        Ok(RollbackOutcome {
            session_id: session_id.to_string(),
            resource_id: resource_id.to_string(),
            resource_type,
            success: true,
            message: reverted.message,
            new_version: reverted.new_version,
        })
    }

    /// Approve everything in a session and delete it
    pub async fn clear_session(&self, session_id: &str) -> Result<ClearOutcome> {
        let approved = self.ledger.clear_session(session_id).await?;
        self.store.touch();
        self.notify(GraphEvent::SessionCleared {
            session_id: session_id.to_string(),
            approved,
        });
        Ok(ClearOutcome {
            session_id: session_id.to_string(),
            approved,
            message: format!("Session {session_id} cleared, {approved} change(s) approved"),
        })
    }

    pub fn text_diff(&self, text_a: &str, text_b: &str) -> TextDiff {
        diff_texts(text_a, text_b)
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    pub fn gc(&self) -> GarbageCollector<'_> {
        GarbageCollector::new(&self.store)
    }

    pub async fn find_orphan_states(&self, mode: OrphanMode, limit: usize) -> Vec<OrphanState> {
        self.gc().find_orphan_states(mode, limit).await
    }

    pub async fn find_orphan_entities(&self, limit: usize) -> Vec<OrphanEntity> {
        self.gc().find_orphan_entities(limit).await
    }

    pub async fn delete_states_batch(&self, state_ids: &[String]) -> Result<BatchDeleteReport> {
        let report = self.gc().delete_states_batch(state_ids).await?;
        if report.deleted_count > 0 {
            self.notify(GraphEvent::GarbageCollected {
                deleted_states: report.deleted_count,
                deleted_entities: 0,
            });
        }
        Ok(report)
    }

    pub async fn delete_entities_batch(&self, entity_ids: &[String]) -> Result<BatchDeleteReport> {
        let report = self.gc().delete_entities_batch(entity_ids).await?;
        if report.deleted_count > 0 {
            self.notify(GraphEvent::GarbageCollected {
                deleted_states: 0,
                deleted_entities: report.deleted_count,
            });
        }
        Ok(report)
    }

    pub async fn stats(&self) -> GraphStats {
        let graph = self.store.counts().await;
        let (sessions, snapshots) = self.ledger.counts().await;
        GraphStats {
            graph,
            sessions: sessions as u64,
            pending_snapshots: snapshots as u64,
            generation: self.store.generation(),
        }
    }
}

fn resource_kind(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Entity => "entity",
        ResourceType::DirectEdge => "direct edge",
        ResourceType::RelayEdge => "relay edge",
    }
}
