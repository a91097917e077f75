use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{LoreError, Result};

/// Main configuration structure for Loregraph
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Data directory and checkpointing
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Graph invariants that are tunable
    #[serde(default)]
    pub graph: GraphConfig,
    /// Review session behaviour
    #[serde(default)]
    pub review: ReviewConfig,
}

impl Config {
    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LoreError::Config(format!("Failed to parse config: {e}")))
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoreError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the config from an explicit path, or from the first default
    /// location that exists, falling back to defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        for path in default_config_paths() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(&path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    [
        dirs::home_dir().map(|h| h.join(".loregraph").join("config.toml")),
        dirs::config_dir().map(|c| c.join("loregraph").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Storage and checkpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the graph checkpoint
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Write checkpoints to disk; when false the graph lives in memory only
    #[serde(default = "default_persist")]
    pub persist: bool,
    /// Seconds between background checkpoints
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist: default_persist(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

impl StorageConfig {
    /// Path of the checkpoint file inside the data directory
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(CHECKPOINT_FILE)
    }
}

/// File name of the graph checkpoint inside the data directory
pub const CHECKPOINT_FILE: &str = "graph.json";

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".loregraph"))
        .unwrap_or_else(|| PathBuf::from(".loregraph"))
}

fn default_persist() -> bool {
    true
}

fn default_checkpoint_interval_secs() -> u64 {
    30
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Capacity of the admin event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            timeout_secs: default_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    256
}

/// Tunable graph rules
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Allow at most one parent per child
    #[serde(default)]
    pub single_parent: bool,
    /// How often a lock set may be re-planned before giving up
    #[serde(default = "default_max_lock_retries")]
    pub max_lock_retries: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            single_parent: false,
            max_lock_retries: default_max_lock_retries(),
        }
    }
}

fn default_max_lock_retries() -> usize {
    8
}

/// Review session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    /// Track writes that carry no explicit write context
    #[serde(default = "default_track_by_default")]
    pub track_by_default: bool,
    /// Task description stamped on versions written by a rollback
    #[serde(default = "default_rollback_task_description")]
    pub rollback_task_description: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            track_by_default: default_track_by_default(),
            rollback_task_description: default_rollback_task_description(),
        }
    }
}

fn default_track_by_default() -> bool {
    true
}

fn default_rollback_task_description() -> String {
    "Rollback to snapshot".to_string()
}
