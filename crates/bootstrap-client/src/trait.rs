//! BootstrapClient trait for mocking
//!
//! The control plane only talks to the bootstrap service through this trait,
//! so reconcilers can be exercised against the in-memory mock.

use crate::error::BootstrapError;
use fleet_types::{BootstrapAgent, BootstrapAgentTemplate, BootstrapInfra};

/// Bootstrap service operations used by the control plane
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait BootstrapClientTrait: Send + Sync {
    /// Templates whose labels match a `key=value[,key=value]` selector
    async fn get_bootstrap_agent_templates(
        &self,
        selector: &str,
    ) -> Result<Vec<BootstrapAgentTemplate>, BootstrapError>;

    async fn get_bootstrap_agent_template(
        &self,
        name: &str,
    ) -> Result<BootstrapAgentTemplate, BootstrapError>;

    async fn get_bootstrap_agent(
        &self,
        template: &str,
        name: &str,
    ) -> Result<BootstrapAgent, BootstrapError>;

    async fn get_bootstrap_agent_for_token(
        &self,
        token: &str,
    ) -> Result<BootstrapAgent, BootstrapError>;

    async fn create_bootstrap_agent(
        &self,
        agent: &BootstrapAgent,
    ) -> Result<BootstrapAgent, BootstrapError>;

    async fn delete_bootstrap_agent(&self, template: &str, name: &str)
        -> Result<(), BootstrapError>;

    /// Mark the agent holding `token` as registered
    async fn register_bootstrap_agent(
        &self,
        template: &str,
        token: &str,
    ) -> Result<(), BootstrapError>;

    async fn get_bootstrap_infra(&self, name: &str) -> Result<BootstrapInfra, BootstrapError>;

    /// Replace the CA material stored on an infra record
    async fn patch_bootstrap_infra(
        &self,
        infra: &BootstrapInfra,
    ) -> Result<BootstrapInfra, BootstrapError>;
}
