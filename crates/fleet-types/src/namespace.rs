//! ClusterNamespace CRD
//!
//! Placement of a project namespace on one cluster, with its own condition set.

use crate::condition::{
    ConditionStatus, HasConditions, NamespaceCondition, NamespaceConditionType,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "fleet.microscaler.io",
    version = "v1alpha1",
    kind = "ClusterNamespace",
    namespaced,
    status = "NamespaceStatus",
    shortname = "fcns"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNamespaceSpec {
    /// Identifier of the cluster the namespace is placed on
    pub cluster_id: String,

    /// Namespace name on the target cluster
    pub namespace: String,

    /// Owning project
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStatus {
    /// Condition set, one entry per condition type
    #[serde(default)]
    pub conditions: Vec<NamespaceCondition>,
}

impl HasConditions for NamespaceStatus {
    type Kind = NamespaceConditionType;

    fn conditions(&self) -> &[NamespaceCondition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<NamespaceCondition> {
        &mut self.conditions
    }
}

impl NamespaceStatus {
    pub fn is_converged_failed(&self) -> bool {
        self.is_condition(NamespaceConditionType::Converged, ConditionStatus::Failed)
    }

    pub fn is_ready_failed(&self) -> bool {
        self.is_condition(NamespaceConditionType::Ready, ConditionStatus::Failed)
    }

    pub fn is_ready_success(&self) -> bool {
        self.is_condition(NamespaceConditionType::Ready, ConditionStatus::Success)
    }

    /// Reason of the failing condition, Converged first.
    pub fn failed_reason(&self) -> Option<&str> {
        if self.is_converged_failed() {
            self.condition_reason(NamespaceConditionType::Converged)
        } else if self.is_ready_failed() {
            self.condition_reason(NamespaceConditionType::Ready)
        } else {
            None
        }
    }
}

impl ClusterNamespace {
    /// Namespace status, empty when the object has none yet.
    pub fn namespace_status(&self) -> NamespaceStatus {
        self.status.clone().unwrap_or_default()
    }
}
