//! Repository traits
//!
//! Narrow per-entity interfaces the control plane stores through. Every
//! update carries `metadata.resourceVersion`; a stale version fails with
//! `StoreError::Conflict` and the caller retries its read-merge-write cycle.

use crate::error::StoreError;
use crate::key::ClusterKey;
use fleet_types::{Cluster, ClusterNamespace, ClusterToken};
use tokio::sync::broadcast;

#[async_trait::async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Cluster, StoreError>;

    /// Every cluster in scope, used by anti-entropy
    async fn list_clusters(&self) -> Result<Vec<Cluster>, StoreError>;

    /// Persist a new cluster including its initial status
    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError>;

    /// Write labels, annotations and finalizers
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError>;

    /// Write the status
    async fn update_cluster_status(&self, cluster: &Cluster) -> Result<Cluster, StoreError>;

    async fn delete_cluster(&self, key: &ClusterKey) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait NamespaceRepository: Send + Sync {
    /// Namespaces placed on a cluster
    async fn list_namespaces(
        &self,
        project: &str,
        cluster_id: &str,
    ) -> Result<Vec<ClusterNamespace>, StoreError>;

    async fn update_namespace_status(
        &self,
        namespace: &ClusterNamespace,
    ) -> Result<ClusterNamespace, StoreError>;
}

#[async_trait::async_trait]
pub trait TokenRepository: Send + Sync {
    /// Token by value
    async fn get_token(&self, token: &str) -> Result<ClusterToken, StoreError>;

    async fn create_token(&self, token: &ClusterToken) -> Result<ClusterToken, StoreError>;

    async fn update_token_status(&self, token: &ClusterToken) -> Result<ClusterToken, StoreError>;
}

/// Everything the cluster service stores through
pub trait Store: ClusterRepository + NamespaceRepository + TokenRepository {}

impl<T> Store for T where T: ClusterRepository + NamespaceRepository + TokenRepository {}

/// Publish/subscribe side channel for change notifications
pub trait Notifier: Send + Sync {
    /// Publish `payload` to current listeners of `channel`
    fn notify(&self, channel: &str, payload: &str);

    fn listen(&self, channel: &str) -> broadcast::Receiver<String>;
}
