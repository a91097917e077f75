//! Checkpoint persistence.
//!
//! The whole graph and review ledger are serialised into one JSON image.
//! Images are written to a temporary file and renamed into place, so a crash
//! mid-write leaves the previous checkpoint intact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::config::CHECKPOINT_FILE;
use crate::error::{LoreError, Result};
use crate::graph::EntityRecord;
use crate::review::LedgerImage;
use crate::service::MemoryGraph;

/// Current checkpoint layout
pub const IMAGE_FORMAT_VERSION: u32 = 1;

/// Serialised graph and ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphImage {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    pub generation: u64,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub ledger: LedgerImage,
}

impl GraphImage {
    pub fn new(generation: u64, entities: Vec<EntityRecord>, ledger: LedgerImage) -> Self {
        Self {
            format_version: IMAGE_FORMAT_VERSION,
            saved_at: Utc::now(),
            generation,
            entities,
            ledger,
        }
    }

    pub fn empty() -> Self {
        Self::new(0, Vec::new(), LedgerImage::default())
    }
}

/// Where checkpoints are kept
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The last saved image, or `None` when nothing was saved yet
    async fn load(&self) -> Result<Option<GraphImage>>;

    async fn save(&self, image: &GraphImage) -> Result<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// JSON checkpoint on the local file system
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store using the default checkpoint file inside `data_dir`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| CHECKPOINT_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<GraphImage>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LoreError::Storage(format!(
                    "Failed to read checkpoint {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let image: GraphImage = serde_json::from_slice(&bytes).map_err(|e| {
            LoreError::Storage(format!(
                "Failed to parse checkpoint {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if image.format_version > IMAGE_FORMAT_VERSION {
            return Err(LoreError::Storage(format!(
                "Checkpoint {} has format version {}, newer than supported {}",
                self.path.display(),
                image.format_version,
                IMAGE_FORMAT_VERSION
            )));
        }
        Ok(Some(image))
    }

    async fn save(&self, image: &GraphImage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    LoreError::Storage(format!(
                        "Failed to create data directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let bytes = serde_json::to_vec_pretty(image)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await.map_err(|e| {
            LoreError::Storage(format!("Failed to write {}: {}", temp.display(), e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            LoreError::Storage(format!(
                "Failed to move checkpoint into {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps the last image in memory; used when persistence is disabled
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    image: TokioMutex<Option<GraphImage>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<GraphImage>> {
        Ok(self.image.lock().await.clone())
    }

    async fn save(&self, image: &GraphImage) -> Result<()> {
        *self.image.lock().await = Some(image.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Writes an image whenever the graph changed since the last one
pub struct Checkpointer {
    graph: Arc<MemoryGraph>,
    store: Arc<dyn SnapshotStore>,
    last_saved: AtomicU64,
}

impl Checkpointer {
    pub fn new(graph: Arc<MemoryGraph>, store: Arc<dyn SnapshotStore>) -> Self {
        let last_saved = AtomicU64::new(graph.generation());
        Self {
            graph,
            store,
            last_saved,
        }
    }

    /// Save if anything changed; returns whether an image was written
    pub async fn checkpoint(&self) -> Result<bool> {
        if self.graph.generation() == self.last_saved.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.save_now().await?;
        Ok(true)
    }

    /// Save unconditionally
    pub async fn save_now(&self) -> Result<()> {
        let image = self.graph.image().await;
        let entities = image.entities.len();
        self.store.save(&image).await?;
        self.last_saved.store(image.generation, Ordering::SeqCst);
        tracing::debug!(
            generation = image.generation,
            entities,
            target = %self.store.describe(),
            "checkpoint written"
        );
        self.graph.notify(crate::admin::GraphEvent::Checkpointed {
            generation: image.generation,
            entities,
            timestamp: image.saved_at,
        });
        Ok(())
    }

    /// Run [`Checkpointer::checkpoint`] every `interval` until aborted
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.checkpoint().await {
                    tracing::warn!("Checkpoint failed: {e}");
                }
            }
        })
    }
}
