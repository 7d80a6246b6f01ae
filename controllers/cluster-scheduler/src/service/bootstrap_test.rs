//! Unit tests for bootstrap agents and agent registration

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::service::*;
    use crate::test_utils::*;
    use bootstrap_client::BootstrapClientTrait;
    use cluster_store::ClusterKey;
    use fleet_events::ResourceEventType;
    use fleet_credentials::{CaIdentity, CaMaterial, CaSubject, CredentialError, generate_ca};
    use fleet_types::*;
    use rcgen::{CertificateParams, DnType, DnValue, KeyPair};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn csr(common_name: &str) -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
        params.serialize_request(&key).unwrap().pem().unwrap()
    }

    fn infra_with_ca(name: &str) -> (BootstrapInfra, CaMaterial) {
        let ca = generate_ca(&CaSubject::self_signed("relay.fleet.local", &CaIdentity::default()), None).unwrap();
        let infra = BootstrapInfra {
            name: name.to_string(),
            ca_cert: ca.cert_pem.clone(),
            ca_key: ca.key_pem.clone(),
        };
        (infra, ca)
    }

    fn relays_of(cluster: &Cluster) -> Vec<Relay> {
        serde_json::from_str(cluster.annotation(RELAYS_ANNOTATION).unwrap()).unwrap()
    }

    #[test]
    fn test_signer_options_follow_template_type() {
        let client = signer_options(&create_test_relay_template("r", BootstrapTemplateType::Client), "tok");
        assert!(client.client && !client.server);
        assert_eq!(client.subject_validators.len(), 1, "Client agents must present the token as CN");
        assert!(client.alt_names.is_empty());

        let server = signer_options(&create_test_relay_template("r", BootstrapTemplateType::Server), "tok");
        assert!(server.server && !server.client);
        assert!(server.subject_validators.is_empty());
        assert_eq!(server.alt_names, vec!["relay.internal", "r.fleet.example.com"]);

        let mixed = signer_options(&create_test_relay_template("r", BootstrapTemplateType::Mixed), "tok");
        assert!(mixed.server && mixed.client);
        assert!(mixed.subject_validators.is_empty());
        assert_eq!(mixed.alt_names.len(), 2);
    }

    #[tokio::test]
    async fn test_create_bootstrap_agent_for_cluster() {
        let (service, _, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        let mut plain = create_test_relay_template("plain", BootstrapTemplateType::Server);
        plain.labels.clear();
        bootstrap.add_template(plain);

        let mut cluster = create_test_cluster("p1", "edge-1", "c-1");
        cluster.spec.shared_projects = vec!["p2".to_string()];
        service.create_bootstrap_agent_for_cluster(&mut cluster).await.unwrap();

        let agents = bootstrap.agents();
        assert_eq!(agents.len(), 1, "Only default relay templates get an agent");
        let agent = &agents[0];
        assert_eq!(agent.name, "c-1");
        assert_eq!(agent.display_name, "edge-1");
        assert_eq!(agent.template_ref, "relay-a");
        assert_eq!(agent.project, "p1");
        assert_eq!(agent.token_state, TokenState::Issued);
        assert!(!agent.token.is_empty());
        assert_eq!(agent.labels.get(CLUSTER_NAME_LABEL).map(String::as_str), Some("edge-1"));
        assert!(agent.labels.contains_key("project/p1"));
        assert!(agent.labels.contains_key("project/p2"));

        let relays = relays_of(&cluster);
        assert_eq!(
            relays,
            vec![Relay {
                token: agent.token.clone(),
                addr: "bootstrap.fleet.local:443".to_string(),
                endpoint: "relay-a.fleet.example.com:443".to_string(),
                name: "relay-a".to_string(),
                template_token: "relay-a-template-token".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_create_bootstrap_agent_reuses_existing_agent() {
        let (service, _, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));

        let mut first = create_test_cluster("p1", "edge-1", "c-1");
        service.create_bootstrap_agent_for_cluster(&mut first).await.unwrap();
        let mut second = create_test_cluster("p1", "edge-1", "c-1");
        service.create_bootstrap_agent_for_cluster(&mut second).await.unwrap();

        assert_eq!(bootstrap.agents().len(), 1);
        assert_eq!(bootstrap.call_count("create_bootstrap_agent"), 1);
        assert_eq!(relays_of(&first), relays_of(&second));
    }

    #[tokio::test]
    async fn test_create_bootstrap_agent_requires_external_host() {
        let (service, _, bootstrap) = create_test_service();
        let mut template = create_test_relay_template("relay-a", BootstrapTemplateType::Server);
        template.hosts.retain(|h| h.host_type == BootstrapTemplateHostType::Internal);
        bootstrap.add_template(template);

        let mut cluster = create_test_cluster("p1", "edge-1", "c-1");
        let err = service.create_bootstrap_agent_for_cluster(&mut cluster).await.unwrap_err();

        assert!(err.to_string().contains("no external endpoint for bootstrap template relay-a"));
        assert!(cluster.annotation(RELAYS_ANNOTATION).is_none());
    }

    #[tokio::test]
    async fn test_delete_bootstrap_agents_tolerates_missing_agents() {
        let (service, _, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        bootstrap.add_template(create_test_relay_template("relay-b", BootstrapTemplateType::Server));
        let mut cluster = create_test_cluster("p1", "edge-1", "c-1");
        service.create_bootstrap_agent_for_cluster(&mut cluster).await.unwrap();
        bootstrap.delete_bootstrap_agent("relay-b", "c-1").await.unwrap();

        service.delete_bootstrap_agents_for_cluster(&cluster).await.unwrap();
        assert!(bootstrap.agents().is_empty());
    }

    #[tokio::test]
    async fn test_register_agent_auto_registers_client() {
        let (service, _, bootstrap) = create_test_service();
        let mut template = create_test_relay_template("edge-agent", BootstrapTemplateType::Client);
        template.auto_register = true;
        let (infra, ca) = infra_with_ca(&template.infra_ref);
        bootstrap.add_template(template);
        bootstrap.add_infra(infra);

        let response = service
            .register_agent(&RegisterAgentRequest {
                template: "edge-agent".to_string(),
                token: "agent-token".to_string(),
                name: "agent-1".to_string(),
                csr: csr("agent-token"),
            })
            .await
            .unwrap();

        assert!(response.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(response.ca_certificate, ca.cert_pem);

        let agents = bootstrap.agents();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "agent-1");
        assert_eq!(agents[0].token_state, TokenState::Used);
    }

    #[tokio::test]
    async fn test_register_agent_rejects_wrong_common_name() {
        let (service, _, bootstrap) = create_test_service();
        let mut template = create_test_relay_template("edge-agent", BootstrapTemplateType::Client);
        template.auto_register = true;
        let (infra, _) = infra_with_ca(&template.infra_ref);
        bootstrap.add_template(template);
        bootstrap.add_infra(infra);

        let result = service
            .register_agent(&RegisterAgentRequest {
                template: "edge-agent".to_string(),
                token: "agent-token".to_string(),
                name: "agent-1".to_string(),
                csr: csr("bad"),
            })
            .await;

        assert!(matches!(
            result,
            Err(ControllerError::Credential(CredentialError::SubjectValidation(_)))
        ));
        assert!(bootstrap.agents().is_empty(), "No agent may be created for a rejected CSR");
    }

    #[tokio::test]
    async fn test_register_agent_rejects_template_mismatch() {
        let (service, _, bootstrap) = create_test_service();
        let template = create_test_relay_template("edge-agent", BootstrapTemplateType::Server);
        let (infra, _) = infra_with_ca(&template.infra_ref);
        bootstrap.add_template(template);
        bootstrap.add_infra(infra);
        bootstrap.add_agent(BootstrapAgent {
            name: "agent-1".to_string(),
            template_ref: "other-template".to_string(),
            token: "agent-token".to_string(),
            token_state: TokenState::Issued,
            ..Default::default()
        });

        let result = service
            .register_agent(&RegisterAgentRequest {
                template: "edge-agent".to_string(),
                token: "agent-token".to_string(),
                name: "agent-1".to_string(),
                csr: csr("anything"),
            })
            .await;

        match result {
            Err(ControllerError::TemplateMismatch(token, template)) => {
                assert_eq!(token, "agent-token");
                assert_eq!(template, "edge-agent");
            }
            other => panic!("expected template mismatch, got {:?}", other.map(|r| r.certificate)),
        }
        assert_eq!(bootstrap.call_count("register_bootstrap_agent"), 0);
    }

    #[tokio::test]
    async fn test_core_relay_registration_checks_cluster_in() {
        let (service, store, bootstrap) = create_test_service();
        let template = create_test_relay_template(TEST_CORE_RELAY_TEMPLATE, BootstrapTemplateType::Client);
        let (infra, _) = infra_with_ca(&template.infra_ref);
        bootstrap.add_template(template);
        bootstrap.add_infra(infra);
        store.insert_cluster(create_test_cluster("p1", "edge-1", "c-1"));

        let mut cluster = create_test_cluster("p1", "edge-1", "c-1");
        service.create_bootstrap_agent_for_cluster(&mut cluster).await.unwrap();
        let token = relays_of(&cluster)[0].token.clone();
        let recorder = Arc::new(RecordingHandler::default());
        service.add_event_handler(recorder.clone());
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let stop = CancellationToken::new();
        let listener = service.listen_clusters(tx, stop.clone());

        service
            .register_agent(&RegisterAgentRequest {
                template: TEST_CORE_RELAY_TEMPLATE.to_string(),
                token: token.clone(),
                name: "c-1".to_string(),
                csr: csr(&token),
            })
            .await
            .unwrap();

        let cluster = service.select(&ClusterKey::by_id("p1", "c-1")).await.unwrap();
        let status = cluster.status.as_ref().unwrap();
        for kind in [
            ClusterConditionType::CheckIn,
            ClusterConditionType::Register,
            ClusterConditionType::Ready,
        ] {
            assert!(status.is_condition(kind, ConditionStatus::Success), "{} must be Success", kind);
            assert_eq!(status.condition_reason(kind), Some("Relay agent established connection."));
        }
        assert!(status.is_condition(ClusterConditionType::Delete, ConditionStatus::NotSet));

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ResourceEventType::UpdateStatus);
        assert_eq!(events[0].id, "c-1");
        let notified = rx.recv().await.unwrap();
        assert_eq!(notified.id, "c-1");

        stop.cancel();
        listener.await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_bootstrap_ca_generates_then_reuses() {
        let (service, _, bootstrap) = create_test_service();
        bootstrap.add_infra(BootstrapInfra {
            name: "infra-a".to_string(),
            ..Default::default()
        });

        assert!(service.ensure_bootstrap_ca("infra-a", "relay.fleet.local", None).await.unwrap());
        let generated = bootstrap.infra("infra-a").unwrap();
        assert!(generated.ca_cert.contains("BEGIN CERTIFICATE"));
        assert!(!generated.ca_key.is_empty());

        assert!(!service.ensure_bootstrap_ca("infra-a", "relay.fleet.local", None).await.unwrap());
        assert_eq!(bootstrap.infra("infra-a").unwrap(), generated);
        assert_eq!(bootstrap.call_count("patch_bootstrap_infra"), 1);
    }

    #[tokio::test]
    async fn test_ensure_bootstrap_ca_replaces_foreign_ca() {
        let (service, _, bootstrap) = create_test_service();
        let (infra, foreign) = infra_with_ca("infra-a");
        bootstrap.add_infra(infra);

        assert!(service.ensure_bootstrap_ca("infra-a", "other.fleet.local", None).await.unwrap());
        assert_ne!(bootstrap.infra("infra-a").unwrap().ca_cert, foreign.cert_pem);
    }
}
