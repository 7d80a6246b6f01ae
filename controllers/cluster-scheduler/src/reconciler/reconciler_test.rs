//! Unit tests for the cluster and cluster condition reconcilers

#[cfg(test)]
mod tests {
    use crate::reconciler::conditions::{ALL_NAMESPACES_SYNCED, namespace_sync};
    use crate::reconciler::*;
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use bootstrap_client::BootstrapError;
    use chrono::Utc;
    use cluster_store::ClusterKey;
    use fleet_types::*;
    use std::time::Duration;

    const COOLDOWN: Duration = Duration::from_secs(60);

    fn ago(secs: i64) -> chrono::DateTime<Utc> {
        Utc::now() - chrono::Duration::seconds(secs)
    }

    fn status_of(cluster: &Cluster, kind: ClusterConditionType) -> (ConditionStatus, String) {
        let condition = cluster.status.as_ref().unwrap().condition(kind).unwrap();
        (condition.status, condition.reason.clone())
    }

    #[test]
    fn test_next_action_decision_table() {
        let (service, _, _) = create_test_service();
        let reconciler = ClusterReconciler::new(service, COOLDOWN);
        let base = || create_test_cluster("p1", "edge-1", "c-1");
        use ClusterConditionType::{BootstrapAgent, Delete};
        use ConditionStatus::{Pending, Retry, Success};

        assert_eq!(reconciler.next_action(&base()), ClusterAction::None);

        let both_pending = with_condition(with_condition(base(), BootstrapAgent, Pending, "created"), Delete, Pending, "deleting");
        assert_eq!(reconciler.next_action(&both_pending), ClusterAction::Delete, "Delete wins over BootstrapAgent");

        let fresh_retry = with_condition_at(base(), Delete, Retry, "boom", ago(10));
        assert_eq!(reconciler.next_action(&fresh_retry), ClusterAction::None);

        let cooled_retry = with_condition_at(base(), Delete, Retry, "boom", ago(61));
        assert_eq!(reconciler.next_action(&cooled_retry), ClusterAction::Delete);

        let fresh_delete_retry_with_agent_pending =
            with_condition(fresh_retry.clone(), BootstrapAgent, Pending, "created");
        assert_eq!(
            reconciler.next_action(&fresh_delete_retry_with_agent_pending),
            ClusterAction::BootstrapAgent
        );

        let agent_cooled = with_condition_at(base(), BootstrapAgent, Retry, "boom", ago(61));
        assert_eq!(reconciler.next_action(&agent_cooled), ClusterAction::BootstrapAgent);

        let agent_done = with_condition(base(), BootstrapAgent, Success, "bootstrap agent created");
        assert_eq!(reconciler.next_action(&agent_done), ClusterAction::None);
    }

    #[tokio::test]
    async fn test_bootstrap_agent_success_leaves_delete_untouched() {
        let (service, store, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        let created = service
            .create(Cluster::new(
                "edge-1",
                ClusterSpec {
                    project: "p1".to_string(),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        assert!(created.status.as_ref().unwrap().conditions.iter().all(|c| {
            c.kind == ClusterConditionType::BootstrapAgent || c.status == ConditionStatus::NotSet
        }));

        let reconciler = ClusterReconciler::new(service.clone(), COOLDOWN);
        reconciler.reconcile(&created).await.unwrap();

        let cluster = &store.clusters()[0];
        assert_eq!(
            status_of(cluster, ClusterConditionType::BootstrapAgent),
            (ConditionStatus::Success, "bootstrap agent created".to_string())
        );
        assert_eq!(status_of(cluster, ClusterConditionType::Delete).0, ConditionStatus::NotSet);
        assert!(cluster.annotation(RELAYS_ANNOTATION).is_some(), "Relays must be persisted");
        assert_eq!(bootstrap.agents().len(), 1);

        // a second pass finds nothing to do
        reconciler.reconcile(cluster).await.unwrap();
        assert_eq!(bootstrap.call_count("get_bootstrap_agent_templates"), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_agent_failure_sets_retry() {
        let (service, store, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        bootstrap.fail_operation("create_bootstrap_agent", 1);
        let cluster = store.insert_cluster(with_condition(
            create_test_cluster("p1", "edge-1", "c-1"),
            ClusterConditionType::BootstrapAgent,
            ConditionStatus::Pending,
            "created",
        ));

        let reconciler = ClusterReconciler::new(service, COOLDOWN);
        assert!(reconciler.reconcile(&cluster).await.is_err());

        let (status, reason) = status_of(&store.clusters()[0], ClusterConditionType::BootstrapAgent);
        assert_eq!(status, ConditionStatus::Retry);
        assert!(reason.starts_with("unable to create cluster bootstrap agent: "), "{}", reason);
    }

    #[tokio::test]
    async fn test_action_error_survives_failed_retry_write() {
        let (service, store, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        bootstrap.fail_operation("create_bootstrap_agent", 1);
        let cluster = store.insert_cluster(with_condition(
            create_test_cluster("p1", "edge-1", "c-1"),
            ClusterConditionType::BootstrapAgent,
            ConditionStatus::Pending,
            "created",
        ));
        // every attempt of the Retry write conflicts
        store.inject_conflicts(10);

        let reconciler = ClusterReconciler::new(service, COOLDOWN);
        let err = reconciler.reconcile(&cluster).await.unwrap_err();

        assert!(
            matches!(err, ControllerError::Bootstrap(BootstrapError::Status { .. })),
            "Expected the agent creation error, got {}",
            err
        );
        assert_eq!(
            status_of(&store.clusters()[0], ClusterConditionType::BootstrapAgent).0,
            ConditionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_delete_retry_respects_cooldown() {
        let (service, store, bootstrap) = create_test_service();
        bootstrap.add_template(create_test_relay_template("relay-a", BootstrapTemplateType::Server));
        bootstrap.fail_operation("delete_bootstrap_agent", 1);
        let mut cluster = create_test_cluster("p1", "edge-1", "c-1");
        service.create_bootstrap_agent_for_cluster(&mut cluster).await.unwrap();
        let cluster = store.insert_cluster(with_condition(
            cluster,
            ClusterConditionType::Delete,
            ConditionStatus::Pending,
            "deleting",
        ));
        let reconciler = ClusterReconciler::new(service.clone(), COOLDOWN);

        // deregistration fails
        assert!(reconciler.reconcile(&cluster).await.is_err());
        let key = ClusterKey::by_id("p1", "c-1");
        let retried = service.select(&key).await.unwrap();
        let (status, reason) = status_of(&retried, ClusterConditionType::Delete);
        assert_eq!(status, ConditionStatus::Retry);
        assert!(reason.starts_with("unable to delete cluster: "), "{}", reason);

        // 10s later: still cooling down
        let ten_seconds = store.insert_cluster(with_condition_at(
            retried.clone(),
            ClusterConditionType::Delete,
            ConditionStatus::Retry,
            &reason,
            ago(10),
        ));
        reconciler.reconcile(&ten_seconds).await.unwrap();
        assert_eq!(bootstrap.call_count("delete_bootstrap_agent"), 1);
        assert_eq!(store.clusters().len(), 1);

        // 61s later: retried and deleted
        let cooled = store.insert_cluster(with_condition_at(
            retried,
            ClusterConditionType::Delete,
            ConditionStatus::Retry,
            &reason,
            ago(61),
        ));
        reconciler.reconcile(&cooled).await.unwrap();
        assert_eq!(bootstrap.call_count("delete_bootstrap_agent"), 2);
        assert!(bootstrap.agents().is_empty());
        assert!(store.clusters().is_empty(), "Delete success removes the cluster");
    }

    #[test]
    fn test_namespace_sync_aggregation() {
        use ConditionStatus::{Failed, InProgress, Success};
        let ready = |name: &str| create_test_namespace("p1", "c-1", name, (Success, "ok"), (Success, "ok"));

        assert_eq!(namespace_sync(&[]), None);
        assert_eq!(
            namespace_sync(&[ready("a"), ready("b")]),
            Some((Success, ALL_NAMESPACES_SYNCED.to_string()))
        );

        let syncing = create_test_namespace("p1", "c-1", "b", (InProgress, "syncing"), (InProgress, "syncing"));
        assert_eq!(namespace_sync(&[ready("a"), syncing]), None, "Not ready and not failed says nothing");

        let converge_failed = create_test_namespace("p1", "c-1", "b", (Failed, "bad manifest"), (Failed, "not ready"));
        assert_eq!(
            namespace_sync(&[ready("a"), converge_failed.clone()]),
            Some((Failed, "Namespace: b, failed reason bad manifest".to_string())),
            "Converged failure takes precedence over Ready failure"
        );

        let ready_failed = create_test_namespace("p1", "c-1", "c", (Success, "ok"), (Failed, "crashloop"));
        assert_eq!(
            namespace_sync(&[converge_failed, ready("a"), ready_failed]),
            Some((Failed, "Namespace: c, failed reason crashloop".to_string())),
            "The last failing namespace provides the reason"
        );
    }

    #[tokio::test]
    async fn test_condition_reconciler_writes_only_on_change() {
        let (service, store, _) = create_test_service();
        store.insert_cluster(create_test_cluster("p1", "edge-1", "c-1"));
        store.insert_namespace(create_test_namespace(
            "p1",
            "c-1",
            "default",
            (ConditionStatus::Success, "ok"),
            (ConditionStatus::Success, "ok"),
        ));
        let reconciler = ClusterConditionReconciler::new(service.clone());
        let key = ClusterKey::by_id("p1", "c-1");

        let cluster = service.select(&key).await.unwrap();
        reconciler.reconcile(&cluster).await.unwrap();
        let synced = service.select(&key).await.unwrap();
        assert_eq!(
            status_of(&synced, ClusterConditionType::NamespaceSync),
            (ConditionStatus::Success, ALL_NAMESPACES_SYNCED.to_string())
        );

        let writes = store.write_count();
        reconciler.reconcile(&synced).await.unwrap();
        assert_eq!(store.write_count(), writes, "Unchanged NamespaceSync must not be rewritten");
    }

    #[tokio::test]
    async fn test_condition_reconciler_ignores_cluster_without_namespaces() {
        let (service, store, _) = create_test_service();
        let cluster = store.insert_cluster(create_test_cluster("p1", "edge-1", "c-1"));
        let writes = store.write_count();

        ClusterConditionReconciler::new(service).reconcile(&cluster).await.unwrap();

        assert_eq!(store.write_count(), writes);
    }
}
