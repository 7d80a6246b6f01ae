//! Bootstrap service API client
//!
//! REST client for the bootstrap service. Templates, agents and infra live
//! under /v2/sentry/bootstrap/.

use crate::bootstrap_trait::BootstrapClientTrait;
use crate::error::BootstrapError;
use fleet_types::{BootstrapAgent, BootstrapAgentTemplate, BootstrapInfra};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const API_PREFIX: &str = "/v2/sentry/bootstrap";

/// List envelope returned by collection endpoints
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Bootstrap service API client
pub struct BootstrapClient {
    client: Client,
    base_url: String,
    token: String,
}

impl BootstrapClient {
    /// Create a new bootstrap client
    ///
    /// # Arguments
    /// * `base_url` - Bootstrap service URL (e.g., "http://sentry.fleet-system:11000")
    /// * `token` - API token for authentication
    pub fn new(base_url: String, token: String) -> Result<Self, BootstrapError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
    }

    /// Map non-success statuses onto `BootstrapError`
    async fn check(response: Response, what: &str) -> Result<Response, BootstrapError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BootstrapError::from_status(status, what, body))
    }
}

#[async_trait::async_trait]
impl BootstrapClientTrait for BootstrapClient {
    async fn get_bootstrap_agent_templates(
        &self,
        selector: &str,
    ) -> Result<Vec<BootstrapAgentTemplate>, BootstrapError> {
        let url = format!(
            "{}?selector={}",
            self.url("/templates"),
            urlencoding::encode(selector)
        );
        debug!("Listing bootstrap templates matching {}", selector);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = Self::check(response, "list bootstrap templates").await?;
        let list: ListResponse<BootstrapAgentTemplate> = response.json().await?;
        Ok(list.items)
    }

    async fn get_bootstrap_agent_template(
        &self,
        name: &str,
    ) -> Result<BootstrapAgentTemplate, BootstrapError> {
        let url = self.url(&format!("/templates/{}", urlencoding::encode(name)));
        debug!("Fetching bootstrap template {}", name);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = Self::check(response, &format!("get bootstrap template {}", name)).await?;
        Ok(response.json().await?)
    }

    async fn get_bootstrap_agent(
        &self,
        template: &str,
        name: &str,
    ) -> Result<BootstrapAgent, BootstrapError> {
        let url = self.url(&format!(
            "/templates/{}/agents/{}",
            urlencoding::encode(template),
            urlencoding::encode(name)
        ));
        debug!("Fetching bootstrap agent {}/{}", template, name);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = Self::check(
            response,
            &format!("get bootstrap agent {} of template {}", name, template),
        )
        .await?;
        Ok(response.json().await?)
    }

    async fn get_bootstrap_agent_for_token(
        &self,
        token: &str,
    ) -> Result<BootstrapAgent, BootstrapError> {
        let url = self.url(&format!("/agents/{}", urlencoding::encode(token)));

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = Self::check(response, "get bootstrap agent for token").await?;
        Ok(response.json().await?)
    }

    async fn create_bootstrap_agent(
        &self,
        agent: &BootstrapAgent,
    ) -> Result<BootstrapAgent, BootstrapError> {
        if agent.name.is_empty() || agent.template_ref.is_empty() {
            return Err(BootstrapError::IncompleteAgent("name and template are required"));
        }
        let url = self.url(&format!(
            "/templates/{}/agents",
            urlencoding::encode(&agent.template_ref)
        ));
        debug!("Creating bootstrap agent {} for template {}", agent.name, agent.template_ref);

        let response = self
            .authorized(self.client.post(&url))
            .json(agent)
            .send()
            .await?;
        let response = Self::check(
            response,
            &format!("create bootstrap agent {}", agent.name),
        )
        .await?;
        Ok(response.json().await?)
    }

    async fn delete_bootstrap_agent(
        &self,
        template: &str,
        name: &str,
    ) -> Result<(), BootstrapError> {
        let url = self.url(&format!(
            "/templates/{}/agents/{}",
            urlencoding::encode(template),
            urlencoding::encode(name)
        ));
        debug!("Deleting bootstrap agent {}/{}", template, name);

        let response = self.authorized(self.client.delete(&url)).send().await?;
        Self::check(
            response,
            &format!("delete bootstrap agent {} of template {}", name, template),
        )
        .await?;
        Ok(())
    }

    async fn register_bootstrap_agent(
        &self,
        template: &str,
        token: &str,
    ) -> Result<(), BootstrapError> {
        let url = self.url(&format!(
            "/templates/{}/agents/register",
            urlencoding::encode(template)
        ));

        let body = serde_json::json!({ "token": token });
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        Self::check(
            response,
            &format!("register bootstrap agent for template {}", template),
        )
        .await?;
        Ok(())
    }

    async fn get_bootstrap_infra(&self, name: &str) -> Result<BootstrapInfra, BootstrapError> {
        let url = self.url(&format!("/infras/{}", urlencoding::encode(name)));
        debug!("Fetching bootstrap infra {}", name);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = Self::check(response, &format!("get bootstrap infra {}", name)).await?;
        Ok(response.json().await?)
    }

    async fn patch_bootstrap_infra(
        &self,
        infra: &BootstrapInfra,
    ) -> Result<BootstrapInfra, BootstrapError> {
        let url = self.url(&format!("/infras/{}", urlencoding::encode(&infra.name)));
        debug!("Updating bootstrap infra {}", infra.name);

        let response = self
            .authorized(self.client.put(&url))
            .json(infra)
            .send()
            .await?;
        let response =
            Self::check(response, &format!("update bootstrap infra {}", infra.name)).await?;
        Ok(response.json().await?)
    }
}
