//! Kubernetes resource watchers.
//!
//! Watchers do not reconcile anything themselves: a changed Cluster becomes a
//! cluster-hook event and a changed ClusterNamespace a workload-hook event.
//! The event handler's workers do the rest. The exceptions are cluster objects
//! applied without a status, which are admitted first, and clusters removed
//! through the API server, whose deletion is requested on the service.

use crate::error::ControllerError;
use crate::service::{ClusterService, cluster_resource};
use cluster_store::ClusterKey;
use fleet_events::{Handler, Resource, ResourceEventType};
use fleet_types::{Cluster, ClusterConditionType, ClusterNamespace, ConditionStatus, HasConditions};
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

const NOTIFICATION_BUFFER: usize = 256;

/// Service and hooks the watchers forward changes to
pub struct WatchContext {
    pub service: Arc<ClusterService>,
    pub cluster_hook: Arc<dyn Handler>,
    pub workload_hook: Arc<dyn Handler>,
}

/// What a watched cluster change calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterChange {
    /// Applied without a status; needs id, finalizer, conditions and token
    Admit,
    /// Removed through the API server; the Delete condition is not set yet
    Delete,
    /// Regular change for the cluster reconciler
    Forward,
    Ignore,
}

pub fn classify(cluster: &Cluster) -> ClusterChange {
    if cluster.spec.project.is_empty() {
        return ClusterChange::Ignore;
    }
    if cluster.is_being_deleted() {
        if !cluster.has_finalizer() {
            return ClusterChange::Ignore;
        }
        let delete_set = cluster
            .status
            .as_ref()
            .and_then(|s| s.condition(ClusterConditionType::Delete))
            .is_some_and(|c| c.status != ConditionStatus::NotSet);
        return if delete_set { ClusterChange::Forward } else { ClusterChange::Delete };
    }
    if cluster.status.is_none() {
        return ClusterChange::Admit;
    }
    ClusterChange::Forward
}

async fn on_cluster(ctx: &WatchContext, cluster: &Cluster) -> Result<Action, ControllerError> {
    match classify(cluster) {
        ClusterChange::Admit => {
            ctx.service.admit(cluster).await?;
        }
        ClusterChange::Delete => {
            info!("Cluster {} removed through the API server, requesting deletion", cluster.cluster_name());
            ctx.service.request_delete(&ClusterKey::for_cluster(cluster)).await?;
        }
        ClusterChange::Forward => ctx.cluster_hook.on_change(cluster_event(cluster)).await,
        ClusterChange::Ignore => debug!("Ignoring cluster {}", cluster.cluster_name()),
    }
    Ok(Action::await_change())
}

/// Event for a changed cluster object
pub fn cluster_event(cluster: &Cluster) -> Resource {
    Resource {
        partner_id: cluster.spec.partner.clone(),
        organization_id: cluster.spec.organization.clone(),
        project_id: cluster.spec.project.clone(),
        id: cluster.id().unwrap_or_default().to_string(),
        name: cluster.cluster_name().to_string(),
        event_type: ResourceEventType::Update,
        ..Default::default()
    }
}

/// Event for the cluster owning a changed namespace
pub fn workload_event(namespace: &ClusterNamespace) -> Resource {
    Resource {
        project_id: namespace.spec.project.clone(),
        id: namespace.spec.cluster_id.clone(),
        event_type: ResourceEventType::UpdateStatus,
        ..Default::default()
    }
}

/// Runs a kube_runtime::Controller over `api` until the stream ends.
///
/// Debounce batches bursts of status writes into one event; the handler's
/// queues take care of retries, so errors here only requeue the object.
async fn watch_resource<K, F>(
    api: Api<K>,
    context: Arc<WatchContext>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<WatchContext>, Arc<K>) -> ReconcileFuture + Send + Sync + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, _ctx: Arc<WatchContext>| {
        error!("Forwarding {} {:?} failed: {}", resource_name, obj.meta().name, error);
        Action::requeue(Duration::from_secs(60))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<WatchContext>| reconcile_fn(ctx, obj);

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches clusters and cluster namespaces.
#[derive(Clone)]
pub struct Watcher {
    context: Arc<WatchContext>,
    cluster_api: Api<Cluster>,
    namespace_api: Api<ClusterNamespace>,
}

impl Watcher {
    /// Watches `watch_namespace`, or every namespace when `None`.
    pub fn new(client: &Client, watch_namespace: Option<&str>, context: WatchContext) -> Self {
        let (cluster_api, namespace_api) = match watch_namespace {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
        Self {
            context: Arc::new(context),
            cluster_api,
            namespace_api,
        }
    }

    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.cluster_api.clone(),
            Arc::clone(&self.context),
            |ctx: Arc<WatchContext>, cluster: Arc<Cluster>| -> ReconcileFuture {
                Box::pin(async move { on_cluster(&ctx, &cluster).await })
            },
            "Cluster",
        )
        .await
    }

    pub async fn watch_namespaces(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.namespace_api.clone(),
            Arc::clone(&self.context),
            |ctx: Arc<WatchContext>, namespace: Arc<ClusterNamespace>| -> ReconcileFuture {
                Box::pin(async move {
                    ctx.workload_hook.on_change(workload_event(&namespace)).await;
                    Ok(Action::await_change())
                })
            },
            "ClusterNamespace",
        )
        .await
    }
}

/// Feed every cluster to `hook` each `interval` until `stop` fires.
///
/// Catches clusters whose `Retry` cooldown expired without any new event.
pub async fn anti_entropy(
    service: Arc<ClusterService>,
    hook: Arc<dyn Handler>,
    interval: Duration,
    stop: CancellationToken,
) -> Result<(), ControllerError> {
    info!("Starting anti-entropy every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let clusters = match service.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!("Anti-entropy unable to list clusters: {}", e);
                continue;
            }
        };
        debug!("Anti-entropy resync of {} clusters", clusters.len());
        for cluster in &clusters {
            hook.on_change(cluster_event(cluster)).await;
        }
    }
    Ok(())
}

/// Feed cluster status notifications to `hook` until `stop` fires.
///
/// Namespace conditions are re-evaluated whenever a cluster's status changes.
pub async fn forward_cluster_notifications(
    service: Arc<ClusterService>,
    hook: Arc<dyn Handler>,
    stop: CancellationToken,
) -> Result<(), ControllerError> {
    let (tx, mut rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let listener = service.listen_clusters(tx, stop.clone());
    loop {
        let key = tokio::select! {
            () = stop.cancelled() => break,
            key = rx.recv() => match key {
                Some(key) => key,
                None => break,
            },
        };
        hook.on_change(cluster_resource(&key, ResourceEventType::UpdateStatus)).await;
    }
    if let Err(e) = listener.await {
        warn!("Cluster listener ended abnormally: {}", e);
    }
    Ok(())
}
