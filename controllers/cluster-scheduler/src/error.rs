//! Controller-specific error types.

use bootstrap_client::BootstrapError;
use cluster_store::StoreError;
use fleet_credentials::CredentialError;
use fleet_events::EventError;
use fleet_types::PatchError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the cluster scheduler.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Bootstrap service error
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Status merge failed; nothing was written
    #[error("status merge error: {0}")]
    Patch(#[from] PatchError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown or revoked registration token
    #[error("invalid token")]
    InvalidToken,

    /// Registration token was already exchanged
    #[error("token already used")]
    UsedToken,

    #[error("token {0} cannot be registered for template {1}")]
    TemplateMismatch(String, String),

    /// Cluster failed validation
    #[error("invalid cluster: {0}")]
    InvalidCluster(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),
}
