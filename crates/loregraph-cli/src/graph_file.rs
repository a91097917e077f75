//! The graph checkpoint as an offline working copy

use std::path::Path;

use loregraph_server::MemoryGraph;
use loregraph_server::config::Config;
use loregraph_server::storage::{FileSnapshotStore, SnapshotStore};

use crate::error::{CliError, CliResult};

/// A graph loaded from a data directory's checkpoint
pub struct GraphFile {
    graph: MemoryGraph,
    store: FileSnapshotStore,
    loaded_generation: u64,
}

impl GraphFile {
    /// Load the checkpoint in `data_dir`, or start empty when there is none
    pub async fn open(data_dir: &Path, config: &Config) -> CliResult<Self> {
        let store = FileSnapshotStore::in_dir(data_dir);
        let loaded = store
            .load()
            .await
            .map_err(|e| CliError::checkpoint(store.path(), e))?;
        let graph = match loaded {
            Some(image) => {
                tracing::debug!(entities = image.entities.len(), path = %store.describe(), "checkpoint loaded");
                MemoryGraph::from_image(image, config).map_err(|e| CliError::checkpoint(store.path(), e))?
            }
            None => {
                tracing::debug!(path = %store.describe(), "no checkpoint, starting empty");
                MemoryGraph::new(config)
            }
        };
        let loaded_generation = graph.generation();
        Ok(Self {
            graph,
            store,
            loaded_generation,
        })
    }

    pub fn graph(&self) -> &MemoryGraph {
        &self.graph
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Write the checkpoint back when a command changed anything
    pub async fn save_if_changed(&self) -> CliResult<bool> {
        if self.graph.generation() == self.loaded_generation {
            return Ok(false);
        }
        let image = self.graph.image().await;
        self.store
            .save(&image)
            .await
            .map_err(|e| CliError::checkpoint(self.store.path(), e))?;
        tracing::debug!(generation = image.generation, path = %self.store.describe(), "checkpoint saved");
        Ok(true)
    }
}
