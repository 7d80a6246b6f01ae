//! Event dispatch errors

use thiserror::Error;

/// Errors that can occur while dispatching resource events
#[derive(Debug, Error)]
pub enum EventError {
    /// Resource key could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue stopped; no more items are accepted
    #[error("Queue closed")]
    QueueClosed,
}
