use std::path::PathBuf;

use loregraph_server::LoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    /// The checkpoint in the data directory could not be read or written
    #[error("checkpoint {}: {source}", path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: LoreError,
    },

    /// A graph or review operation was refused
    #[error("{0}")]
    Graph(#[from] LoreError),

    #[error("failed to render JSON output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    pub(crate) fn checkpoint(path: impl Into<PathBuf>, source: LoreError) -> Self {
        CliError::Checkpoint {
            path: path.into(),
            source,
        }
    }

    /// The graph error behind this failure, if any
    pub fn graph_error(&self) -> Option<&LoreError> {
        match self {
            CliError::Checkpoint { source, .. } => Some(source),
            CliError::Graph(e) => Some(e),
            CliError::Output(_) => None,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
