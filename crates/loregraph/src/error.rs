//! Error types for Loregraph

use thiserror::Error;

/// Main error type for Loregraph operations
#[derive(Error, Debug)]
pub enum LoreError {
    /// A resource referenced by id does not exist
    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    /// The operation would violate a graph invariant
    #[error("{resource} '{id}': {reason}")]
    Conflict {
        resource: &'static str,
        id: String,
        reason: String,
    },

    /// Request payload failed validation (empty content, bad identifiers, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A multi-step unit could not complete
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LoreError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn conflict(resource: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            resource,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Validation(_) => "validation_error",
            Self::Internal(_)
            | Self::Config(_)
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Serialization(_) => "internal",
        }
    }

    /// The resource kind and id the error refers to, when there is one
    pub fn subject(&self) -> Option<(&'static str, &str)> {
        match self {
            Self::NotFound { resource, id } | Self::Conflict { resource, id, .. } => {
                Some((resource, id.as_str()))
            }
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<serde_json::Error> for LoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Loregraph operations
pub type Result<T> = std::result::Result<T, LoreError>;
