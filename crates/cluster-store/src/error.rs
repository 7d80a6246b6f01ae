//! Storage errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No row matched the lookup
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency failure; re-read and retry
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Lookup key carries neither id nor name, or no project
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
