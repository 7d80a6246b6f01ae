//! ClusterToken CRD
//!
//! One-time registration token issued when a cluster is created. The object
//! name is the token value; the resource is cluster scoped.

use crate::bootstrap::TokenState;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "fleet.microscaler.io",
    version = "v1alpha1",
    kind = "ClusterToken",
    status = "ClusterTokenStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTokenSpec {
    /// Identifier of the cluster the token was issued for
    pub cluster_id: String,

    /// Name of the cluster the token was issued for
    pub cluster_name: String,

    /// Project of the cluster
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTokenStatus {
    /// Token lifecycle state
    #[serde(default)]
    pub state: TokenState,
}

impl ClusterToken {
    /// Token lifecycle state, `NotSet` when no status was written yet.
    pub fn state(&self) -> TokenState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}
