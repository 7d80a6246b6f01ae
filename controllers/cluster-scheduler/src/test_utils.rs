//! Test utilities for unit testing the service and reconcilers
//!
//! Builds a `ClusterService` over the in-memory store and the mock bootstrap
//! client, plus fixtures for clusters, namespaces and templates.

use crate::service::{ClusterService, ServiceSettings};
use bootstrap_client::MockBootstrapClient;
use chrono::{DateTime, Utc};
use cluster_store::{BroadcastNotifier, InMemoryStore};
use fleet_types::*;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TEST_CORE_RELAY_TEMPLATE: &str = "core-relay";

pub fn test_settings() -> ServiceSettings {
    ServiceSettings {
        relay_bootstrap_addr: "bootstrap.fleet.local:443".to_string(),
        core_relay_template: TEST_CORE_RELAY_TEMPLATE.to_string(),
        ..Default::default()
    }
}

/// Service over fresh in-memory collaborators; the returned handles share their state
pub fn create_test_service() -> (Arc<ClusterService>, InMemoryStore, MockBootstrapClient) {
    let store = InMemoryStore::new();
    let bootstrap = MockBootstrapClient::new();
    let service = ClusterService::new(
        Arc::new(store.clone()),
        Arc::new(bootstrap.clone()),
        Arc::new(BroadcastNotifier::default()),
        test_settings(),
    );
    (Arc::new(service), store, bootstrap)
}

/// Helper to create a stored-looking cluster with the default condition set
pub fn create_test_cluster(project: &str, name: &str, id: &str) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            partner: "partner-1".to_string(),
            organization: "org-1".to_string(),
            project: project.to_string(),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(project.to_string());
    cluster.metadata.labels = Some(BTreeMap::from([(CLUSTER_ID_LABEL.to_string(), id.to_string())]));
    cluster.status = Some(ClusterStatus::with_defaults());
    cluster
}

/// Cluster with one condition forced to `status`, last updated at `at`
pub fn with_condition_at(
    mut cluster: Cluster,
    kind: ClusterConditionType,
    status: ConditionStatus,
    reason: &str,
    at: DateTime<Utc>,
) -> Cluster {
    let mut condition = new_condition(kind)(status, reason);
    condition.last_updated = at;
    cluster
        .status
        .get_or_insert_with(ClusterStatus::with_defaults)
        .set_condition(condition);
    cluster
}

pub fn with_condition(cluster: Cluster, kind: ClusterConditionType, status: ConditionStatus, reason: &str) -> Cluster {
    with_condition_at(cluster, kind, status, reason, Utc::now())
}

/// Helper to create a namespace with the given Converged and Ready statuses
pub fn create_test_namespace(
    project: &str,
    cluster_id: &str,
    namespace: &str,
    converged: (ConditionStatus, &str),
    ready: (ConditionStatus, &str),
) -> ClusterNamespace {
    let mut ns = ClusterNamespace::new(
        &format!("{}-{}", cluster_id, namespace),
        ClusterNamespaceSpec {
            cluster_id: cluster_id.to_string(),
            namespace: namespace.to_string(),
            project: project.to_string(),
        },
    );
    let mut status = NamespaceStatus::default();
    status.set_condition(new_condition(NamespaceConditionType::Converged)(converged.0, converged.1));
    status.set_condition(new_condition(NamespaceConditionType::Ready)(ready.0, ready.1));
    ns.status = Some(status);
    ns
}

/// Helper to create a default relay template with one internal and one external host
pub fn create_test_relay_template(name: &str, template_type: BootstrapTemplateType) -> BootstrapAgentTemplate {
    BootstrapAgentTemplate {
        name: name.to_string(),
        labels: BTreeMap::from([(DEFAULT_RELAY_LABEL.to_string(), "true".to_string())]),
        template_type,
        hosts: vec![
            BootstrapTemplateHost {
                host: "relay.internal:443".to_string(),
                host_type: BootstrapTemplateHostType::Internal,
            },
            BootstrapTemplateHost {
                host: format!("{}.fleet.example.com:443", name),
                host_type: BootstrapTemplateHostType::External,
            },
        ],
        token: format!("{}-template-token", name),
        infra_ref: format!("{}-infra", name),
        ..Default::default()
    }
}

/// Handler remembering every event it receives
#[derive(Default)]
pub struct RecordingHandler {
    events: std::sync::Mutex<Vec<fleet_events::Resource>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<fleet_events::Resource> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl fleet_events::Handler for RecordingHandler {
    async fn on_change(&self, resource: fleet_events::Resource) {
        self.events.lock().unwrap().push(resource);
    }
}
