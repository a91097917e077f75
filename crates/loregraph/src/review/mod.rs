//! Review sessions: pre-session snapshots of everything an agent touched,
//! waiting for a human to approve or roll back each one.

pub mod diff;
pub mod rollback;
pub mod types;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{LoreError, Result};
use crate::graph::types::require_text;

pub use diff::{DiffHunk, DiffOp, TextDiff, diff_texts};
pub use types::{
    ApproveOutcome, Capture, ClearOutcome, DiffReport, OperationType, PreImage, ResourceRef,
    ResourceType, RollbackOutcome, Session, SessionInfo, Snapshot,
};

/// How a mutation is attributed to a review session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteContext {
    /// Use the newest open session, opening one if none exists
    #[default]
    Auto,
    /// Use the named session, opening it if needed
    Session(String),
    /// Do not snapshot
    Untracked,
}

/// Serializable form of the ledger for checkpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerImage {
    /// Sessions in creation order
    #[serde(default)]
    pub sessions: Vec<Session>,
}

/// Result of binding a capture to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub session_id: String,
    /// False when the session already held a snapshot of the resource
    pub inserted: bool,
}

/// All review sessions, in creation order
#[derive(Debug, Default)]
pub struct ReviewLedger {
    sessions: Mutex<Vec<Session>>,
}

fn new_session_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("session_{}", &id[..12])
}

fn new_session(session_id: String) -> Session {
    Session {
        session_id,
        created_at: Utc::now(),
        snapshots: Vec::new(),
    }
}

impl ReviewLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_image(image: LedgerImage) -> Self {
        Self {
            sessions: Mutex::new(image.sessions),
        }
    }

    pub async fn export(&self) -> LedgerImage {
        LedgerImage {
            sessions: self.sessions.lock().await.clone(),
        }
    }

    /// Open a session, or return the existing one with that id
    pub async fn open_session(&self, session_id: Option<String>) -> Result<SessionInfo> {
        if let Some(id) = &session_id {
            require_text("session_id", id)?;
        }
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = session_id
            .as_deref()
            .and_then(|id| sessions.iter().find(|s| s.session_id == id))
        {
            return Ok(SessionInfo::from(existing));
        }

        let session = new_session(session_id.unwrap_or_else(new_session_id));
        tracing::info!(session_id = %session.session_id, "review session opened");
        let info = SessionInfo::from(&session);
        sessions.push(session);
        Ok(info)
    }

    /// Bind a capture to the session selected by `ctx`. The first snapshot
    /// of a resource in a session wins; later captures only add the version
    /// they wrote.
    pub async fn record(&self, ctx: &WriteContext, capture: Capture) -> Option<Recorded> {
        let mut sessions = self.sessions.lock().await;
        let index = match ctx {
            WriteContext::Untracked => return None,
            WriteContext::Auto => match sessions.len() {
                0 => {
                    sessions.push(new_session(new_session_id()));
                    0
                }
                n => n - 1,
            },
            WriteContext::Session(id) => match sessions.iter().position(|s| &s.session_id == id) {
                Some(index) => index,
                None => {
                    sessions.push(new_session(id.clone()));
                    sessions.len() - 1
                }
            },
        };

        let session = &mut sessions[index];
        let resource_type = capture.resource.resource_type();
        let resource_id = capture.resource.resource_id();
        let existing = session
            .snapshots
            .iter_mut()
            .find(|s| s.matches(resource_type, &resource_id));
        let inserted = existing.is_none();
        if let Some(snapshot) = existing {
            snapshot.session_versions.extend(capture.written_version);
        } else {
            tracing::debug!(
                session_id = %session.session_id,
                %resource_type,
                resource_id = %resource_id,
                "snapshot recorded"
            );
            session.snapshots.push(Snapshot::bind(&session.session_id, capture));
        }
        Some(Recorded {
            session_id: session.session_id.clone(),
            inserted,
        })
    }

    /// The snapshot of a resource, if any. `NotFound` for unknown sessions.
    pub async fn find(
        &self,
        session_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<Snapshot>> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| LoreError::not_found("session", session_id))?;
        Ok(session
            .snapshots
            .iter()
            .find(|s| s.matches(resource_type, resource_id))
            .cloned())
    }

    pub async fn require(
        &self,
        session_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Snapshot> {
        self.find(session_id, resource_type, resource_id)
            .await?
            .ok_or_else(|| LoreError::not_found("snapshot", format!("{session_id}/{resource_type}/{resource_id}")))
    }

    /// Remove a snapshot. Returns whether the session was closed because it
    /// became empty and `close_if_empty` was set.
    pub async fn remove(
        &self,
        session_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
        close_if_empty: bool,
    ) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let index = sessions
            .iter()
            .position(|s| s.session_id == session_id)
            .ok_or_else(|| LoreError::not_found("session", session_id))?;
        let session = &mut sessions[index];
        let before = session.snapshots.len();
        session
            .snapshots
            .retain(|s| !s.matches(resource_type, resource_id));
        if session.snapshots.len() == before {
            return Err(LoreError::not_found(
                "snapshot",
                format!("{session_id}/{resource_type}/{resource_id}"),
            ));
        }

        let closed = close_if_empty && session.snapshots.is_empty();
        if closed {
            sessions.remove(index);
            tracing::info!(session_id, "review session closed");
        }
        Ok(closed)
    }

    /// Detach a snapshot while a rollback is applied. Returns it with its
    /// position so [`ReviewLedger::restore`] can put it back.
    pub async fn take(
        &self,
        session_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(usize, Snapshot)> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| LoreError::not_found("session", session_id))?;
        let position = session
            .snapshots
            .iter()
            .position(|s| s.matches(resource_type, resource_id))
            .ok_or_else(|| {
                LoreError::not_found("snapshot", format!("{session_id}/{resource_type}/{resource_id}"))
            })?;
        Ok((position, session.snapshots.remove(position)))
    }

    /// Re-attach a snapshot detached by [`ReviewLedger::take`]. Dropped when
    /// its session was cleared in the meantime.
    pub async fn restore(&self, position: usize, snapshot: Snapshot) {
        let mut sessions = self.sessions.lock().await;
        match sessions.iter_mut().find(|s| s.session_id == snapshot.session_id) {
            Some(session) => {
                let position = position.min(session.snapshots.len());
                session.snapshots.insert(position, snapshot);
            }
            None => {
                tracing::warn!(
                    session_id = %snapshot.session_id,
                    resource_id = %snapshot.resource_id,
                    "session cleared during rollback, snapshot dropped"
                );
            }
        }
    }

    /// Delete a session with all its snapshots; returns how many it held
    pub async fn clear_session(&self, session_id: &str) -> Result<usize> {
        let mut sessions = self.sessions.lock().await;
        let index = sessions
            .iter()
            .position(|s| s.session_id == session_id)
            .ok_or_else(|| LoreError::not_found("session", session_id))?;
        let session = sessions.remove(index);
        tracing::info!(session_id, approved = session.snapshots.len(), "review session cleared");
        Ok(session.snapshots.len())
    }

    /// Sessions, newest first
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.iter().rev().map(SessionInfo::from).collect()
    }

    /// Snapshots of a session in creation order
    pub async fn list_snapshots(&self, session_id: &str) -> Result<Vec<Snapshot>> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .map(|s| s.snapshots.clone())
            .ok_or_else(|| LoreError::not_found("session", session_id))
    }

    pub async fn session_exists(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.iter().any(|s| s.session_id == session_id)
    }

    /// (sessions, snapshots)
    pub async fn counts(&self) -> (usize, usize) {
        let sessions = self.sessions.lock().await;
        let snapshots = sessions.iter().map(|s| s.snapshots.len()).sum();
        (sessions.len(), snapshots)
    }
}
