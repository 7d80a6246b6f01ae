//! Bootstrap agents and agent registration.

use super::{ClusterService, new_token};
use crate::error::ControllerError;
use crate::metrics;
use cluster_store::ClusterKey;
use fleet_credentials::{
    CaIdentity, CaMaterial, CaSource, CaSubject, Signer, SignerOptions, cn_should_be, reconcile_ca,
};
use fleet_types::{
    BootstrapAgent, BootstrapAgentTemplate, BootstrapTemplateType, CLUSTER_NAME_LABEL, Cluster,
    ClusterConditionType, ClusterStatus, ConditionStatus, DEFAULT_RELAY_LABEL, HasConditions,
    RELAYS_ANNOTATION, Relay, TokenState, new_condition,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

const CHECK_IN_REASON: &str = "Relay agent established connection.";

/// Certificate request from a bootstrap agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub template: String,
    pub token: String,
    /// Agent name, used when the template auto-registers
    pub name: String,
    /// PEM encoded CSR
    pub csr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentResponse {
    pub certificate: String,
    pub ca_certificate: String,
}

/// Signing policy for agents of `template`.
///
/// Client agents must present the token as common name. DNS names are only
/// added for agents that serve TLS.
pub fn signer_options(template: &BootstrapAgentTemplate, token: &str) -> SignerOptions {
    let kind = template.template_type;
    let mut opts = SignerOptions {
        client: kind.is_client(),
        server: kind.is_server(),
        ..Default::default()
    };
    if kind.is_server() {
        opts.alt_names = template.host_names();
    }
    if kind == BootstrapTemplateType::Client {
        opts.subject_validators.push(cn_should_be(token));
    }
    opts
}

fn default_relay_selector() -> String {
    format!("{}=true", DEFAULT_RELAY_LABEL)
}

fn relay_agent(cluster: &Cluster, id: &str, template: &BootstrapAgentTemplate) -> BootstrapAgent {
    let name = cluster.cluster_name().to_string();
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), name.clone())]);
    for project in std::iter::once(&cluster.spec.project).chain(&cluster.spec.shared_projects) {
        labels.insert(format!("project/{}", project), String::new());
    }
    BootstrapAgent {
        name: id.to_string(),
        display_name: name,
        labels,
        partner: cluster.spec.partner.clone(),
        organization: cluster.spec.organization.clone(),
        project: cluster.spec.project.clone(),
        template_ref: template.name.clone(),
        token: new_token(),
        token_state: TokenState::Issued,
    }
}

impl ClusterService {
    fn ca_password(&self) -> Option<&[u8]> {
        self.settings.ca_key_password.as_deref().map(str::as_bytes)
    }

    /// Get or create the cluster's agent for every default relay template and
    /// record the relay list in the cluster's annotations.
    ///
    /// Only `cluster` is modified; persisting the annotations is up to the caller.
    pub async fn create_bootstrap_agent_for_cluster(&self, cluster: &mut Cluster) -> Result<(), ControllerError> {
        let id = cluster
            .id()
            .ok_or_else(|| ControllerError::Reconciliation(format!("cluster {} has no id", cluster.cluster_name())))?
            .to_string();

        let templates = self
            .bootstrap
            .get_bootstrap_agent_templates(&default_relay_selector())
            .await?;

        let mut relays = Vec::with_capacity(templates.len());
        for template in templates {
            let endpoint = template.external_host().map(str::to_string).ok_or_else(|| {
                ControllerError::Reconciliation(format!(
                    "no external endpoint for bootstrap template {}",
                    template.name
                ))
            })?;

            let agent = match self.bootstrap.get_bootstrap_agent(&template.name, &id).await {
                Ok(agent) => agent,
                Err(e) if e.is_not_found() => {
                    debug!("Creating bootstrap agent for cluster {} from template {}", id, template.name);
                    self.bootstrap
                        .create_bootstrap_agent(&relay_agent(cluster, &id, &template))
                        .await?
                }
                Err(e) => return Err(e.into()),
            };

            relays.push(Relay {
                token: agent.token,
                addr: self.settings.relay_bootstrap_addr.clone(),
                endpoint,
                name: template.name,
                template_token: template.token,
            });
        }

        cluster
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(RELAYS_ANNOTATION.to_string(), serde_json::to_string(&relays)?);
        Ok(())
    }

    /// Delete the cluster's agent of every default relay template.
    pub async fn delete_bootstrap_agents_for_cluster(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        let Some(id) = cluster.id() else {
            return Ok(());
        };
        let templates = self
            .bootstrap
            .get_bootstrap_agent_templates(&default_relay_selector())
            .await?;
        for template in templates {
            match self.bootstrap.delete_bootstrap_agent(&template.name, id).await {
                Ok(()) => debug!("Deleted bootstrap agent {} of template {}", id, template.name),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Sign an agent's CSR and register its token.
    pub async fn register_agent(&self, request: &RegisterAgentRequest) -> Result<RegisterAgentResponse, ControllerError> {
        let template = self.bootstrap.get_bootstrap_agent_template(&request.template).await?;
        let infra = self.bootstrap.get_bootstrap_infra(&template.infra_ref).await?;

        let signer = Signer::new(
            &infra.ca_cert,
            &infra.ca_key,
            self.ca_password(),
            signer_options(&template, &request.token),
        )?;
        let certificate = signer.sign(&request.csr)?;
        metrics::increment_certificates_signed();

        let agent = match self.bootstrap.get_bootstrap_agent_for_token(&request.token).await {
            Ok(agent) => agent,
            Err(e) if e.is_not_found() && template.auto_register => {
                let agent = BootstrapAgent {
                    name: request.name.clone(),
                    template_ref: template.name.clone(),
                    token: request.token.clone(),
                    token_state: TokenState::Issued,
                    ..Default::default()
                };
                self.bootstrap.create_bootstrap_agent(&agent).await?
            }
            Err(e) => return Err(e.into()),
        };

        if agent.template_ref != template.name {
            return Err(ControllerError::TemplateMismatch(request.token.clone(), template.name));
        }

        self.bootstrap
            .register_bootstrap_agent(&template.name, &request.token)
            .await?;

        if template.name == self.settings.core_relay_template {
            info!("Relay agent of cluster {} checked in", agent.name);
            self.check_in(&agent).await?;
        }

        Ok(RegisterAgentResponse {
            certificate,
            ca_certificate: signer.ca_cert_pem().to_string(),
        })
    }

    async fn check_in(&self, agent: &BootstrapAgent) -> Result<(), ControllerError> {
        let mut incoming = ClusterStatus::default();
        for kind in [
            ClusterConditionType::CheckIn,
            ClusterConditionType::Register,
            ClusterConditionType::Ready,
        ] {
            incoming.set_condition(new_condition(kind)(ConditionStatus::Success, CHECK_IN_REASON));
        }
        let key = ClusterKey::by_id(&agent.project, &agent.name);
        self.update_status(&key, &incoming).await
    }

    /// Make sure a bootstrap infra holds a usable CA.
    ///
    /// Returns true if the infra was updated.
    pub async fn ensure_bootstrap_ca(
        &self,
        infra_name: &str,
        relay_network_name: &str,
        provided: Option<&CaMaterial>,
    ) -> Result<bool, ControllerError> {
        let mut infra = self.bootstrap.get_bootstrap_infra(infra_name).await?;
        let existing = (!infra.ca_cert.is_empty() || !infra.ca_key.is_empty()).then(|| CaMaterial {
            cert_pem: infra.ca_cert.clone(),
            key_pem: infra.ca_key.clone(),
        });

        let subject = CaSubject::self_signed(relay_network_name, &CaIdentity::default());
        let source = match provided {
            Some(ca) => CaSource::Provided {
                cert_pem: &ca.cert_pem,
                key_pem: &ca.key_pem,
            },
            None => CaSource::SelfSigned,
        };

        let outcome = reconcile_ca(existing.as_ref(), &subject, source, self.ca_password())?;
        if outcome.changed {
            info!("Updating CA of bootstrap infra {}", infra_name);
            infra.ca_cert = outcome.material.cert_pem;
            infra.ca_key = outcome.material.key_pem;
            self.bootstrap.patch_bootstrap_infra(&infra).await?;
        }
        Ok(outcome.changed)
    }

    /// Self-signed CA for the infra of the core relay template, named after the template.
    pub async fn ensure_core_relay_ca(&self) -> Result<bool, ControllerError> {
        let template = self
            .bootstrap
            .get_bootstrap_agent_template(&self.settings.core_relay_template)
            .await?;
        self.ensure_bootstrap_ca(&template.infra_ref, &template.name, None)
            .await
    }
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod bootstrap_test;
