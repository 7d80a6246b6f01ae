//! Namespace condition aggregation.

use crate::error::ControllerError;
use crate::service::ClusterService;
use cluster_store::ClusterKey;
use fleet_types::{
    Cluster, ClusterConditionType, ClusterNamespace, ClusterStatus, ConditionStatus, HasConditions,
};
use std::sync::Arc;
use tracing::debug;

pub const ALL_NAMESPACES_SYNCED: &str = "all namespaces synced";

/// NamespaceSync condition implied by `namespaces`.
///
/// A failing namespace wins over readiness; with several failing namespaces
/// the last one provides the reason. Returns `None` when nothing can be said.
pub fn namespace_sync(namespaces: &[ClusterNamespace]) -> Option<(ConditionStatus, String)> {
    if namespaces.is_empty() {
        return None;
    }

    let mut failed_reason = None;
    let mut ready = true;
    for ns in namespaces {
        let status = ns.namespace_status();
        if let Some(reason) = status.failed_reason() {
            failed_reason = Some(format!(
                "Namespace: {}, failed reason {}",
                ns.spec.namespace, reason
            ));
        }
        if !status.is_ready_success() {
            ready = false;
        }
    }

    match failed_reason {
        Some(reason) => Some((ConditionStatus::Failed, reason)),
        None if ready => Some((ConditionStatus::Success, ALL_NAMESPACES_SYNCED.to_string())),
        None => None,
    }
}

pub struct ClusterConditionReconciler {
    service: Arc<ClusterService>,
}

impl ClusterConditionReconciler {
    pub fn new(service: Arc<ClusterService>) -> Self {
        Self { service }
    }

    /// Fold the cluster's namespace conditions into its NamespaceSync condition.
    pub async fn reconcile(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        let namespaces = self.service.list_namespaces(cluster).await?;
        let Some((status, reason)) = namespace_sync(&namespaces) else {
            return Ok(());
        };

        let current = cluster
            .status
            .as_ref()
            .and_then(|s| s.condition(ClusterConditionType::NamespaceSync));
        if current.is_some_and(|c| c.status == status && c.reason == reason) {
            debug!("NamespaceSync of {} unchanged", cluster.cluster_name());
            return Ok(());
        }

        let incoming = ClusterStatus::with_condition(ClusterConditionType::NamespaceSync, status, &reason);
        self.service
            .update_status(&ClusterKey::for_cluster(cluster), &incoming)
            .await
    }
}
