//! Tenant scoped cluster lookup key

use fleet_events::Resource;
use fleet_types::Cluster;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a cluster within a tenant scope.
///
/// Lookups prefer `id` and fall back to `name`. The project is always part of
/// the scope; partner and organization narrow it further when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterKey {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ClusterKey {
    pub fn by_id(project: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn by_name(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Narrow the scope to a partner and organization
    pub fn with_tenant(mut self, partner: impl Into<String>, organization: impl Into<String>) -> Self {
        self.partner = partner.into();
        self.organization = organization.into();
        self
    }

    /// Full identity of a stored cluster
    pub fn for_cluster(cluster: &Cluster) -> Self {
        Self {
            partner: cluster.spec.partner.clone(),
            organization: cluster.spec.organization.clone(),
            project: cluster.spec.project.clone(),
            id: cluster.id().unwrap_or_default().to_string(),
            name: cluster.cluster_name().to_string(),
        }
    }

    /// Same cluster, looked up by id only
    pub fn id_only(&self) -> Self {
        Self {
            name: String::new(),
            ..self.clone()
        }
    }

    /// Same cluster, looked up by name only
    pub fn name_only(&self) -> Self {
        Self {
            id: String::new(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), crate::StoreError> {
        if self.project.is_empty() {
            return Err(crate::StoreError::InvalidKey(format!("{}: project is required", self)));
        }
        if self.id.is_empty() && self.name.is_empty() {
            return Err(crate::StoreError::InvalidKey(format!("{}: id or name is required", self)));
        }
        Ok(())
    }

    /// True if `cluster` is the one this key points at
    pub fn matches(&self, cluster: &Cluster) -> bool {
        let spec = &cluster.spec;
        let project = cluster.metadata.namespace.as_deref().unwrap_or(&spec.project);
        if project != self.project {
            return false;
        }
        if !self.partner.is_empty() && self.partner != spec.partner {
            return false;
        }
        if !self.organization.is_empty() && self.organization != spec.organization {
            return false;
        }
        if !self.id.is_empty() {
            return cluster.id() == Some(self.id.as_str());
        }
        !self.name.is_empty() && cluster.cluster_name() == self.name
    }
}

impl From<&Resource> for ClusterKey {
    fn from(resource: &Resource) -> Self {
        Self {
            partner: resource.partner_id.clone(),
            organization: resource.organization_id.clone(),
            project: resource.project_id.clone(),
            id: resource.id.clone(),
            name: resource.name.clone(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ident = if self.id.is_empty() { &self.name } else { &self.id };
        write!(f, "{}/{}", self.project, ident)
    }
}
