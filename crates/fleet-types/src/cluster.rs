//! Cluster CRD
//!
//! A tenant cluster registered with the fleet. The Kubernetes namespace of a
//! `Cluster` object is the owning project.

use crate::condition::{
    ClusterCondition, ClusterConditionType, ConditionStatus, HasConditions, default_conditions,
    new_condition,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label holding the stable cluster identifier.
pub const CLUSTER_ID_LABEL: &str = "fleet.microscaler.io/cluster-id";

/// Annotation holding the JSON encoded relay list of a cluster.
pub const RELAYS_ANNOTATION: &str = "fleet.microscaler.io/relays";

/// Finalizer keeping a deleted cluster around until its bootstrap agents are gone.
pub const CLUSTER_FINALIZER: &str = "fleet.microscaler.io/cluster-cleanup";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "fleet.microscaler.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    shortname = "fc"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Owning partner
    pub partner: String,

    /// Owning organization
    pub organization: String,

    /// Owning project
    pub project: String,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// How the cluster was provisioned
    #[serde(default)]
    pub cluster_type: ClusterType,

    /// Additional projects the cluster is shared with
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_projects: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Cluster provisioning type
#[serde(rename_all = "PascalCase")]
pub enum ClusterType {
    /// Existing cluster imported into the fleet
    #[default]
    #[serde(alias = "imported")]
    Imported,

    /// Cluster provisioned by the fleet
    #[serde(alias = "provisioned")]
    Provisioned,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Condition set, one entry per condition type
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,

    /// Blueprint currently published to the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_blueprint: Option<String>,

    /// Registration token issued for the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ClusterStatus {
    /// Status of a new cluster: every condition `NotSet`.
    pub fn with_defaults() -> Self {
        Self {
            conditions: default_conditions(),
            ..Default::default()
        }
    }

    /// Minimal status carrying exactly one condition.
    pub fn with_condition(kind: ClusterConditionType, status: ConditionStatus, reason: &str) -> Self {
        Self {
            conditions: vec![new_condition(kind)(status, reason)],
            ..Default::default()
        }
    }
}

impl HasConditions for ClusterStatus {
    type Kind = ClusterConditionType;

    fn conditions(&self) -> &[ClusterCondition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<ClusterCondition> {
        &mut self.conditions
    }
}

impl Cluster {
    /// Stable cluster identifier.
    pub fn id(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CLUSTER_ID_LABEL))
            .map(String::as_str)
    }

    /// Cluster name.
    pub fn cluster_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// True if the condition of `kind` currently holds `status`.
    pub fn is_condition(&self, kind: ClusterConditionType, status: ConditionStatus) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.is_condition(kind, status))
    }

    /// True if the condition of `kind` is `Retry` and older than `cooldown`.
    pub fn is_cooled_down(&self, kind: ClusterConditionType, cooldown: std::time::Duration) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.is_cooled_down(kind, cooldown))
    }

    /// True once the API server marked the object for deletion.
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == CLUSTER_FINALIZER))
    }

    /// Annotation value, if present.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}
