//! Integration tests for the bootstrap client
//!
//! These tests require a running bootstrap service.
//! Set BOOTSTRAP_URL and BOOTSTRAP_TOKEN environment variables to run.

use bootstrap_client::{BootstrapClient, BootstrapClientTrait};

fn client() -> BootstrapClient {
    let url = std::env::var("BOOTSTRAP_URL")
        .unwrap_or_else(|_| "http://localhost:11000".to_string());
    let token = std::env::var("BOOTSTRAP_TOKEN")
        .expect("BOOTSTRAP_TOKEN environment variable must be set");
    BootstrapClient::new(url, token).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running bootstrap service
async fn test_list_default_relay_templates() {
    let client = client();

    let templates = client
        .get_bootstrap_agent_templates("fleet.microscaler.io/defaultRelay=true")
        .await
        .expect("Failed to list templates");

    println!("Found {} default relay templates", templates.len());
}

#[tokio::test]
#[ignore]
async fn test_template_infra_resolves() {
    let client = client();

    let templates = client
        .get_bootstrap_agent_templates("")
        .await
        .expect("Failed to list templates");

    for template in templates {
        let infra = client
            .get_bootstrap_infra(&template.infra_ref)
            .await
            .expect("Failed to get infra");
        assert_eq!(infra.name, template.infra_ref);
    }
}

#[tokio::test]
#[ignore]
async fn test_unknown_agent_is_not_found() {
    let client = client();

    let err = client
        .get_bootstrap_agent_for_token("no-such-token")
        .await
        .expect_err("token should not resolve");
    assert!(err.is_not_found());
}
