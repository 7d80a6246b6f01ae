//! Reconciliation of clusters.
//!
//! - `ClusterReconciler`: acts on the Delete and BootstrapAgent conditions
//! - `conditions::ClusterConditionReconciler`: folds namespace conditions into NamespaceSync
//!
//! Every outcome is written as a status holding only the changed condition, so
//! reconcilers acting on different condition types never overwrite each other.

pub mod conditions;

pub use conditions::ClusterConditionReconciler;

use crate::error::ControllerError;
use crate::service::ClusterService;
use cluster_store::ClusterKey;
use fleet_types::{Cluster, ClusterConditionType, ClusterStatus, ConditionStatus, RELAYS_ANNOTATION};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimum age of a `Retry` condition before its action runs again.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Action picked for a cluster; first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAction {
    Delete,
    BootstrapAgent,
    None,
}

pub struct ClusterReconciler {
    service: Arc<ClusterService>,
    cooldown: Duration,
}

impl ClusterReconciler {
    pub fn new(service: Arc<ClusterService>, cooldown: Duration) -> Self {
        Self { service, cooldown }
    }

    /// True if the action behind `kind` was requested or is due for a retry.
    fn is_due(&self, cluster: &Cluster, kind: ClusterConditionType) -> bool {
        cluster.is_condition(kind, ConditionStatus::Pending) || cluster.is_cooled_down(kind, self.cooldown)
    }

    pub fn next_action(&self, cluster: &Cluster) -> ClusterAction {
        if self.is_due(cluster, ClusterConditionType::Delete) {
            ClusterAction::Delete
        } else if self.is_due(cluster, ClusterConditionType::BootstrapAgent) {
            ClusterAction::BootstrapAgent
        } else {
            ClusterAction::None
        }
    }

    /// Run the action the cluster's conditions call for.
    ///
    /// A failed action is recorded as `Retry` with the error as reason and the
    /// action error is returned, even when recording it fails.
    pub async fn reconcile(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        match self.next_action(cluster) {
            ClusterAction::Delete => self.handle_delete(cluster).await,
            ClusterAction::BootstrapAgent => self.handle_bootstrap_agent(cluster).await,
            ClusterAction::None => {
                debug!("Cluster {} is stable, nothing to do", cluster.cluster_name());
                Ok(())
            }
        }
    }

    async fn handle_delete(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        let key = ClusterKey::for_cluster(cluster);
        info!("Deleting cluster {}", key);

        if let Err(e) = self.service.delete_bootstrap_agents_for_cluster(cluster).await {
            warn!("Unable to delete cluster {}: {}", key, e);
            let reason = format!("unable to delete cluster: {}", e);
            self.write_retry(&key, ClusterConditionType::Delete, &reason).await;
            return Err(e);
        }

        self.write(&key, ClusterConditionType::Delete, ConditionStatus::Success, "cluster deleted")
            .await
    }

    async fn handle_bootstrap_agent(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        let key = ClusterKey::for_cluster(cluster);
        info!("Creating bootstrap agent for cluster {}", key);

        let mut updated = cluster.clone();
        if let Err(e) = self.service.create_bootstrap_agent_for_cluster(&mut updated).await {
            warn!("Unable to create bootstrap agent for cluster {}: {}", key, e);
            let reason = format!("unable to create cluster bootstrap agent: {}", e);
            self.write_retry(&key, ClusterConditionType::BootstrapAgent, &reason).await;
            return Err(e);
        }

        self.write(&key, ClusterConditionType::BootstrapAgent, ConditionStatus::Success, "bootstrap agent created")
            .await?;

        let relays: BTreeMap<String, String> = updated
            .annotation(RELAYS_ANNOTATION)
            .map(|relays| BTreeMap::from([(RELAYS_ANNOTATION.to_string(), relays.to_string())]))
            .unwrap_or_default();
        self.service.update_cluster_annotations(&key, &relays).await?;
        Ok(())
    }

    /// Record a failed action; a failed write is only logged so the action error wins.
    async fn write_retry(&self, key: &ClusterKey, kind: ClusterConditionType, reason: &str) {
        if let Err(e) = self.write(key, kind, ConditionStatus::Retry, reason).await {
            warn!("Unable to record {:?} retry for cluster {}: {}", kind, key, e);
        }
    }

    async fn write(
        &self,
        key: &ClusterKey,
        kind: ClusterConditionType,
        status: ConditionStatus,
        reason: &str,
    ) -> Result<(), ControllerError> {
        self.service
            .update_status(key, &ClusterStatus::with_condition(kind, status, reason))
            .await
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
