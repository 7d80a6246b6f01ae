//! Bootstrap entities
//!
//! Records owned by the bootstrap service. The control plane reads templates
//! and infra, and creates or deletes agents.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label selecting the templates every cluster gets an agent for.
pub const DEFAULT_RELAY_LABEL: &str = "fleet.microscaler.io/defaultRelay";

/// Label carrying the cluster name on bootstrap agents.
pub const CLUSTER_NAME_LABEL: &str = "clusterName";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Role of the agents created from a template
#[serde(rename_all = "PascalCase")]
pub enum BootstrapTemplateType {
    /// Agents authenticate as TLS clients
    #[default]
    #[serde(alias = "client")]
    Client,
    /// Agents serve TLS
    #[serde(alias = "server")]
    Server,
    /// Agents act as both
    #[serde(alias = "mixed")]
    Mixed,
}

impl BootstrapTemplateType {
    /// True for Client and Mixed.
    pub fn is_client(self) -> bool {
        matches!(self, Self::Client | Self::Mixed)
    }

    /// True for Server and Mixed.
    pub fn is_server(self) -> bool {
        matches!(self, Self::Server | Self::Mixed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum BootstrapTemplateHostType {
    #[default]
    #[serde(alias = "internal")]
    Internal,
    #[serde(alias = "external")]
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapTemplateHost {
    /// Hostname (and optional port) agents reach the relay on
    pub host: String,

    /// Network the host is reachable from
    #[serde(default)]
    pub host_type: BootstrapTemplateHostType,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapAgentTemplate {
    /// Template name
    pub name: String,

    /// Labels used for template selection
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Role of the agents created from this template
    #[serde(default)]
    pub template_type: BootstrapTemplateType,

    /// Hostnames trusted for this template
    #[serde(default)]
    pub hosts: Vec<BootstrapTemplateHost>,

    /// Template token, handed to agents with their relay config
    #[serde(default)]
    pub token: String,

    /// Name of the bootstrap infra holding the CA
    pub infra_ref: String,

    /// Create agents on first registration
    #[serde(default)]
    pub auto_register: bool,

    /// Approve agents on registration
    #[serde(default)]
    pub auto_approve: bool,
}

impl BootstrapAgentTemplate {
    /// Host reachable from outside the control plane; the last one wins.
    pub fn external_host(&self) -> Option<&str> {
        self.hosts
            .iter()
            .rfind(|h| h.host_type == BootstrapTemplateHostType::External)
            .map(|h| h.host.as_str())
    }

    /// Hostnames without port, for certificate SANs.
    pub fn host_names(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|h| h.host.split(':').next().unwrap_or(&h.host).to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Lifecycle state of a one-time token
#[serde(rename_all = "PascalCase")]
pub enum TokenState {
    #[default]
    #[serde(alias = "notset")]
    NotSet,
    /// Issued, not yet exchanged
    #[serde(alias = "issued")]
    Issued,
    /// Exchanged; never accepted again
    #[serde(alias = "used")]
    Used,
    /// Withdrawn by an operator
    #[serde(alias = "revoked")]
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapAgent {
    /// Agent name, the cluster id for relay agents
    pub name: String,

    /// Display name, the cluster name for relay agents
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub partner: String,

    #[serde(default)]
    pub organization: String,

    #[serde(default)]
    pub project: String,

    /// Template the agent was created from
    pub template_ref: String,

    /// Agent registration token
    pub token: String,

    #[serde(default)]
    pub token_state: TokenState,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapInfra {
    /// Infra name, referenced by templates
    pub name: String,

    /// PEM encoded CA certificate
    #[serde(default)]
    pub ca_cert: String,

    /// PEM encoded CA key, optionally password encrypted
    #[serde(default)]
    pub ca_key: String,
}

/// Relay entry written into a cluster's relays annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Relay {
    /// Agent token
    pub token: String,

    /// Bootstrap address the agent registers against
    pub addr: String,

    /// External relay endpoint
    pub endpoint: String,

    /// Template name
    pub name: String,

    /// Template token
    pub template_token: String,
}
