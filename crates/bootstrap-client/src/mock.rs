//! Mock BootstrapClient for unit testing
//!
//! In-memory implementation of `BootstrapClientTrait`. Operations can be made
//! to fail a fixed number of times to drive retry paths.

use crate::bootstrap_trait::BootstrapClientTrait;
use crate::error::BootstrapError;
use fleet_types::{BootstrapAgent, BootstrapAgentTemplate, BootstrapInfra, TokenState};
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock BootstrapClient for testing
#[derive(Clone, Default)]
pub struct MockBootstrapClient {
    templates: Arc<Mutex<BTreeMap<String, BootstrapAgentTemplate>>>,
    // keyed by (template, agent name)
    agents: Arc<Mutex<BTreeMap<(String, String), BootstrapAgent>>>,
    infras: Arc<Mutex<HashMap<String, BootstrapInfra>>>,
    // operation name -> remaining injected failures
    failures: Arc<Mutex<HashMap<String, u32>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `k=v,k2=v2` against a label map; empty selects everything.
fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).is_some_and(|l| l == v.trim()),
            None => labels.contains_key(term),
        })
}

impl MockBootstrapClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template to the mock store (for test setup)
    pub fn add_template(&self, template: BootstrapAgentTemplate) {
        locked(&self.templates).insert(template.name.clone(), template);
    }

    pub fn add_agent(&self, agent: BootstrapAgent) {
        locked(&self.agents).insert((agent.template_ref.clone(), agent.name.clone()), agent);
    }

    pub fn add_infra(&self, infra: BootstrapInfra) {
        locked(&self.infras).insert(infra.name.clone(), infra);
    }

    /// Make the named trait method fail `times` more times with a 503 answer
    pub fn fail_operation(&self, operation: &str, times: u32) {
        locked(&self.failures).insert(operation.to_string(), times);
    }

    /// All agents, ordered by template then name
    pub fn agents(&self) -> Vec<BootstrapAgent> {
        locked(&self.agents).values().cloned().collect()
    }

    pub fn infra(&self, name: &str) -> Option<BootstrapInfra> {
        locked(&self.infras).get(name).cloned()
    }

    /// Number of calls made to the named trait method
    pub fn call_count(&self, operation: &str) -> usize {
        locked(&self.calls).iter().filter(|c| *c == operation).count()
    }

    fn enter(&self, operation: &str) -> Result<(), BootstrapError> {
        locked(&self.calls).push(operation.to_string());
        let mut failures = locked(&self.failures);
        if let Some(remaining) = failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BootstrapError::Status {
                    action: operation.to_string(),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: "injected failure".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BootstrapClientTrait for MockBootstrapClient {
    async fn get_bootstrap_agent_templates(
        &self,
        selector: &str,
    ) -> Result<Vec<BootstrapAgentTemplate>, BootstrapError> {
        self.enter("get_bootstrap_agent_templates")?;
        Ok(locked(&self.templates)
            .values()
            .filter(|t| selector_matches(selector, &t.labels))
            .cloned()
            .collect())
    }

    async fn get_bootstrap_agent_template(
        &self,
        name: &str,
    ) -> Result<BootstrapAgentTemplate, BootstrapError> {
        self.enter("get_bootstrap_agent_template")?;
        locked(&self.templates)
            .get(name)
            .cloned()
            .ok_or_else(|| BootstrapError::NotFound(format!("template {}", name)))
    }

    async fn get_bootstrap_agent(
        &self,
        template: &str,
        name: &str,
    ) -> Result<BootstrapAgent, BootstrapError> {
        self.enter("get_bootstrap_agent")?;
        locked(&self.agents)
            .get(&(template.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| BootstrapError::NotFound(format!("agent {}/{}", template, name)))
    }

    async fn get_bootstrap_agent_for_token(
        &self,
        token: &str,
    ) -> Result<BootstrapAgent, BootstrapError> {
        self.enter("get_bootstrap_agent_for_token")?;
        locked(&self.agents)
            .values()
            .find(|a| a.token == token)
            .cloned()
            .ok_or_else(|| BootstrapError::NotFound("agent for token".to_string()))
    }

    async fn create_bootstrap_agent(
        &self,
        agent: &BootstrapAgent,
    ) -> Result<BootstrapAgent, BootstrapError> {
        self.enter("create_bootstrap_agent")?;
        if agent.name.is_empty() || agent.template_ref.is_empty() {
            return Err(BootstrapError::IncompleteAgent("name and template are required"));
        }
        let key = (agent.template_ref.clone(), agent.name.clone());
        let mut agents = locked(&self.agents);
        if agents.contains_key(&key) {
            return Err(BootstrapError::AlreadyExists(format!("agent {}", agent.name)));
        }
        let mut created = agent.clone();
        if created.token_state == TokenState::NotSet {
            created.token_state = TokenState::Issued;
        }
        agents.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_bootstrap_agent(
        &self,
        template: &str,
        name: &str,
    ) -> Result<(), BootstrapError> {
        self.enter("delete_bootstrap_agent")?;
        locked(&self.agents)
            .remove(&(template.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| BootstrapError::NotFound(format!("agent {}/{}", template, name)))
    }

    async fn register_bootstrap_agent(
        &self,
        template: &str,
        token: &str,
    ) -> Result<(), BootstrapError> {
        self.enter("register_bootstrap_agent")?;
        let mut agents = locked(&self.agents);
        let agent = agents
            .values_mut()
            .find(|a| a.template_ref == template && a.token == token)
            .ok_or_else(|| BootstrapError::NotFound("agent for token".to_string()))?;
        if agent.token_state == TokenState::Revoked {
            return Err(BootstrapError::TokenRevoked(format!("agent {}", agent.name)));
        }
        agent.token_state = TokenState::Used;
        Ok(())
    }

    async fn get_bootstrap_infra(&self, name: &str) -> Result<BootstrapInfra, BootstrapError> {
        self.enter("get_bootstrap_infra")?;
        locked(&self.infras)
            .get(name)
            .cloned()
            .ok_or_else(|| BootstrapError::NotFound(format!("infra {}", name)))
    }

    async fn patch_bootstrap_infra(
        &self,
        infra: &BootstrapInfra,
    ) -> Result<BootstrapInfra, BootstrapError> {
        self.enter("patch_bootstrap_infra")?;
        let mut infras = locked(&self.infras);
        let stored = infras
            .get_mut(&infra.name)
            .ok_or_else(|| BootstrapError::NotFound(format!("infra {}", infra.name)))?;
        stored.ca_cert = infra.ca_cert.clone();
        stored.ca_key = infra.ca_key.clone();
        Ok(stored.clone())
    }
}
