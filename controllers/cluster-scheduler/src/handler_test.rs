//! Unit tests for the cluster event handler

#[cfg(test)]
mod tests {
    use crate::handler::*;
    use crate::service::ClusterService;
    use crate::test_utils::*;
    use bootstrap_client::{BootstrapClientTrait, BootstrapError};
    use cluster_store::{BroadcastNotifier, ClusterKey, InMemoryStore};
    use fleet_events::{DedupQueueConfig, Handler, Resource, ResourceEventType};
    use fleet_types::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Bootstrap service whose calls never answer
    #[derive(Default)]
    struct StalledBootstrapClient {
        calls: AtomicUsize,
        abandoned: Arc<AtomicUsize>,
    }

    struct Abandoned(Arc<AtomicUsize>);

    impl Drop for Abandoned {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl StalledBootstrapClient {
        async fn stall<T>(&self) -> Result<T, BootstrapError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _abandoned = Abandoned(Arc::clone(&self.abandoned));
            std::future::pending().await
        }
    }

    #[async_trait::async_trait]
    impl BootstrapClientTrait for StalledBootstrapClient {
        async fn get_bootstrap_agent_templates(&self, _: &str) -> Result<Vec<BootstrapAgentTemplate>, BootstrapError> {
            self.stall().await
        }
        async fn get_bootstrap_agent_template(&self, _: &str) -> Result<BootstrapAgentTemplate, BootstrapError> {
            self.stall().await
        }
        async fn get_bootstrap_agent(&self, _: &str, _: &str) -> Result<BootstrapAgent, BootstrapError> {
            self.stall().await
        }
        async fn get_bootstrap_agent_for_token(&self, _: &str) -> Result<BootstrapAgent, BootstrapError> {
            self.stall().await
        }
        async fn create_bootstrap_agent(&self, _: &BootstrapAgent) -> Result<BootstrapAgent, BootstrapError> {
            self.stall().await
        }
        async fn delete_bootstrap_agent(&self, _: &str, _: &str) -> Result<(), BootstrapError> {
            self.stall().await
        }
        async fn register_bootstrap_agent(&self, _: &str, _: &str) -> Result<(), BootstrapError> {
            self.stall().await
        }
        async fn get_bootstrap_infra(&self, _: &str) -> Result<BootstrapInfra, BootstrapError> {
            self.stall().await
        }
        async fn patch_bootstrap_infra(&self, _: &BootstrapInfra) -> Result<BootstrapInfra, BootstrapError> {
            self.stall().await
        }
    }

    fn config(cooldown: Duration) -> HandlerConfig {
        HandlerConfig {
            workers: 2,
            event_timeout: Duration::from_secs(5),
            cooldown,
            dedup: DedupQueueConfig::default(),
        }
    }

    fn event(project: &str, id: &str, event_type: ResourceEventType) -> Resource {
        Resource {
            project_id: project.to_string(),
            id: id.to_string(),
            event_type,
            ..Default::default()
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn condition_of(store: &cluster_store::InMemoryStore, kind: ClusterConditionType) -> Option<ConditionStatus> {
        store
            .clusters()
            .first()
            .and_then(|c| c.status.as_ref()?.condition(kind).map(|c| c.status))
    }

    #[test]
    fn test_lookup_key_prefers_id() {
        let by_id = lookup_key(&Resource {
            partner_id: "pa".to_string(),
            organization_id: "or".to_string(),
            project_id: "p1".to_string(),
            id: "c-1".to_string(),
            name: "edge-1".to_string(),
            ..Default::default()
        });
        assert_eq!(by_id, ClusterKey::by_id("p1", "c-1"));

        let by_name = lookup_key(&Resource {
            partner_id: "pa".to_string(),
            organization_id: "or".to_string(),
            project_id: "p1".to_string(),
            name: "edge-1".to_string(),
            ..Default::default()
        });
        assert_eq!(by_name, ClusterKey::by_name("p1", "edge-1").with_tenant("pa", "or"));
    }

    #[tokio::test]
    async fn test_cluster_event_runs_reconciler() {
        let (service, store, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        let stop = CancellationToken::new();
        let handler = ClusterEventHandler::new(service.clone(), config(Duration::from_secs(60)), stop.clone());
        service.add_event_handler(handler.cluster_hook());
        handler.handle();

        service
            .create(Cluster::new(
                "edge-1",
                ClusterSpec {
                    project: "p1".to_string(),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        wait_for(|| condition_of(&store, ClusterConditionType::BootstrapAgent) == Some(ConditionStatus::Success))
            .await;
        assert_eq!(bootstrap.agents().len(), 1);

        stop.cancel();
        handler.join().await;
    }

    #[tokio::test]
    async fn test_failed_event_is_requeued() {
        let (service, store, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        bootstrap.fail_operation("get_bootstrap_agent_templates", 2);
        store.insert_cluster(with_condition(
            create_test_cluster("p1", "edge-1", "c-1"),
            ClusterConditionType::BootstrapAgent,
            ConditionStatus::Pending,
            "created",
        ));

        let stop = CancellationToken::new();
        // zero cooldown: every requeue may retry the Retry condition
        let handler = ClusterEventHandler::new(service, config(Duration::ZERO), stop.clone());
        handler.handle();
        handler
            .cluster_hook()
            .on_change(event("p1", "c-1", ResourceEventType::Update))
            .await;

        wait_for(|| condition_of(&store, ClusterConditionType::BootstrapAgent) == Some(ConditionStatus::Success))
            .await;
        assert_eq!(bootstrap.call_count("get_bootstrap_agent_templates"), 3);

        stop.cancel();
        handler.join().await;
    }

    #[tokio::test]
    async fn test_workload_event_runs_condition_reconciler() {
        let (service, store, _) = create_test_service();
        store.insert_cluster(create_test_cluster("p1", "edge-1", "c-1"));
        store.insert_namespace(create_test_namespace(
            "p1",
            "c-1",
            "default",
            (ConditionStatus::Failed, "bad manifest"),
            (ConditionStatus::Failed, "not ready"),
        ));

        let stop = CancellationToken::new();
        let handler = ClusterEventHandler::new(service, config(Duration::from_secs(60)), stop.clone());
        handler.handle();
        handler
            .workload_hook()
            .on_change(event("p1", "c-1", ResourceEventType::UpdateStatus))
            .await;

        wait_for(|| condition_of(&store, ClusterConditionType::NamespaceSync) == Some(ConditionStatus::Failed))
            .await;
        let reason = store.clusters()[0]
            .status
            .as_ref()
            .and_then(|s| s.condition_reason(ClusterConditionType::NamespaceSync).map(str::to_string));
        assert_eq!(reason.as_deref(), Some("Namespace: default, failed reason bad manifest"));

        stop.cancel();
        handler.join().await;
    }

    #[tokio::test]
    async fn test_lookup_of_missing_cluster_is_not_an_error() {
        let (service, _, _) = create_test_service();
        let stop = CancellationToken::new();
        let handler = ClusterEventHandler::new(service, config(Duration::from_secs(60)), stop.clone());

        let found = handler
            .lookup(&event("p1", "gone", ResourceEventType::Update))
            .await
            .unwrap();
        assert!(found.is_none());

        stop.cancel();
        handler.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reconcile_is_abandoned_after_event_timeout() {
        let store = InMemoryStore::new();
        let bootstrap = Arc::new(StalledBootstrapClient::default());
        let service = Arc::new(ClusterService::new(
            Arc::new(store.clone()),
            bootstrap.clone(),
            Arc::new(BroadcastNotifier::default()),
            test_settings(),
        ));
        store.insert_cluster(with_condition(
            create_test_cluster("p1", "edge-1", "c-1"),
            ClusterConditionType::BootstrapAgent,
            ConditionStatus::Pending,
            "created",
        ));

        let stop = CancellationToken::new();
        let handler = ClusterEventHandler::new(
            service,
            HandlerConfig {
                workers: 1,
                event_timeout: Duration::from_secs(10),
                ..config(Duration::from_secs(60))
            },
            stop.clone(),
        );
        handler.handle();
        handler
            .cluster_hook()
            .on_change(event("p1", "c-1", ResourceEventType::Update))
            .await;

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(bootstrap.calls.load(Ordering::SeqCst), 2, "Timed out attempt must be requeued");
        assert_eq!(bootstrap.abandoned.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(
            bootstrap.calls.load(Ordering::SeqCst),
            1 + MAX_REQUEUES as usize,
            "Requeues stop after the limit"
        );
        assert_eq!(bootstrap.abandoned.load(Ordering::SeqCst), 1 + MAX_REQUEUES as usize);
        assert_eq!(condition_of(&store, ClusterConditionType::BootstrapAgent), Some(ConditionStatus::Pending));

        stop.cancel();
        handler.join().await;
    }
}
