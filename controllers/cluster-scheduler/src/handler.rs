//! Cluster event handler.
//!
//! Cluster events go through the rate-limited queue, so a failed
//! reconciliation is retried with a growing delay. Namespace (workload)
//! events go through the deduplicating queue: a burst of namespace changes
//! collapses into one NamespaceSync evaluation per cluster.

use crate::error::ControllerError;
use crate::metrics;
use crate::reconciler::{ClusterConditionReconciler, ClusterReconciler};
use crate::service::ClusterService;
use cluster_store::{ClusterKey, StoreError};
use fleet_events::{
    DedupQueue, DedupQueueConfig, Handler, RateLimitedQueue, RateLimitedQueueConfig, Resource,
};
use fleet_types::Cluster;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Rate-limited re-deliveries of a failing cluster event before it is dropped
pub const MAX_REQUEUES: u32 = 5;

const CLUSTER_RECONCILER: &str = "cluster";
const CONDITION_RECONCILER: &str = "cluster_condition";

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub workers: usize,
    pub event_timeout: Duration,
    pub cooldown: Duration,
    pub dedup: DedupQueueConfig,
}

impl From<&crate::config::Config> for HandlerConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            workers: config.workers,
            event_timeout: config.event_timeout,
            cooldown: config.cooldown,
            dedup: DedupQueueConfig {
                drop_policy: config.dedup_drop_policy,
                ..Default::default()
            },
        }
    }
}

struct RateLimitedHook {
    queue: RateLimitedQueue,
    name: &'static str,
}

#[async_trait::async_trait]
impl Handler for RateLimitedHook {
    async fn on_change(&self, resource: Resource) {
        debug!("{} hook: {}", self.name, resource);
        if let Err(e) = self.queue.push(resource).await {
            warn!("{} hook unable to enqueue event: {}", self.name, e);
        }
    }
}

struct DedupHook {
    queue: DedupQueue,
}

#[async_trait::async_trait]
impl Handler for DedupHook {
    async fn on_change(&self, resource: Resource) {
        debug!("workload hook: {}", resource);
        if let Err(e) = self.queue.push(resource).await {
            warn!("workload hook unable to enqueue event: {}", e);
        }
    }
}

/// Feeds cluster and workload events to the reconcilers.
pub struct ClusterEventHandler {
    service: Arc<ClusterService>,
    cluster_reconciler: ClusterReconciler,
    condition_reconciler: ClusterConditionReconciler,
    cluster_queue: RateLimitedQueue,
    workload_queue: DedupQueue,
    config: HandlerConfig,
    workers: TaskTracker,
}

impl ClusterEventHandler {
    /// Starts both queues; they shut down when `stop` is cancelled.
    pub fn new(service: Arc<ClusterService>, config: HandlerConfig, stop: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cluster_reconciler: ClusterReconciler::new(Arc::clone(&service), config.cooldown),
            condition_reconciler: ClusterConditionReconciler::new(Arc::clone(&service)),
            cluster_queue: RateLimitedQueue::spawn(RateLimitedQueueConfig::default(), stop.clone()),
            workload_queue: DedupQueue::spawn(config.dedup, stop),
            service,
            config,
            workers: TaskTracker::new(),
        })
    }

    /// Handler for cluster create/update/delete/status events
    pub fn cluster_hook(&self) -> Arc<dyn Handler> {
        Arc::new(RateLimitedHook {
            queue: self.cluster_queue.clone(),
            name: "cluster",
        })
    }

    /// Handler for namespace changes of a cluster
    pub fn workload_hook(&self) -> Arc<dyn Handler> {
        Arc::new(DedupHook {
            queue: self.workload_queue.clone(),
        })
    }

    /// Handler for the periodic resync of every cluster
    pub fn anti_entropy_hook(&self) -> Arc<dyn Handler> {
        Arc::new(RateLimitedHook {
            queue: self.cluster_queue.clone(),
            name: "anti-entropy",
        })
    }

    pub fn dedup_dropped_total(&self) -> u64 {
        self.workload_queue.dropped_total()
    }

    /// Start the worker pools; workers exit once their queue is shut down.
    pub fn handle(self: &Arc<Self>) {
        info!("Starting {} workers per queue", self.config.workers);
        for _ in 0..self.config.workers {
            let handler = Arc::clone(self);
            self.workers.spawn(async move { handler.cluster_worker().await });
            let handler = Arc::clone(self);
            self.workers.spawn(async move { handler.workload_worker().await });
        }
    }

    /// Wait for the queues and every worker to stop.
    pub async fn join(&self) {
        self.cluster_queue.join().await;
        self.workload_queue.join().await;
        self.workers.close();
        self.workers.wait().await;
    }

    async fn cluster_worker(&self) {
        while let Some(resource) = self.cluster_queue.recv().await {
            let result = self.process(&resource, CLUSTER_RECONCILER).await;
            if let Err(e) = self.settle(&resource, result) {
                warn!("Unable to settle event {}: {}", resource, e);
            }
        }
        debug!("Cluster worker stopped");
    }

    async fn workload_worker(&self) {
        while let Some(resource) = self.workload_queue.recv().await {
            if let Err(e) = self.process(&resource, CONDITION_RECONCILER).await {
                info!("Unable to reconcile namespace conditions for {}: {}", resource, e);
            }
        }
        debug!("Workload worker stopped");
    }

    /// Forget a handled event, or put a failed one back through the rate limiter.
    fn settle(&self, resource: &Resource, result: Result<(), ControllerError>) -> Result<(), ControllerError> {
        let Err(e) = result else {
            self.cluster_queue.forget(resource)?;
            return Ok(());
        };

        let requeues = self.cluster_queue.num_requeues(resource)?;
        if requeues < MAX_REQUEUES {
            info!("Unable to reconcile {}, requeueing ({}): {}", resource, requeues + 1, e);
            metrics::increment_requeues();
            self.cluster_queue.requeue(resource)?;
        } else {
            warn!("Dropping {} after {} requeues: {}", resource, requeues, e);
            self.cluster_queue.forget(resource)?;
        }
        Ok(())
    }

    /// One attempt at an event; the lookup and the reconciler share one deadline.
    async fn process(&self, resource: &Resource, reconciler: &'static str) -> Result<(), ControllerError> {
        let result = tokio::time::timeout(self.config.event_timeout, self.attempt(resource, reconciler))
            .await
            .unwrap_or_else(|_| Err(ControllerError::Timeout(format!("handling of event {}", resource))));
        metrics::record_reconcile(reconciler, result.is_ok());
        result
    }

    async fn attempt(&self, resource: &Resource, reconciler: &'static str) -> Result<(), ControllerError> {
        let Some(cluster) = self.lookup(resource).await? else {
            debug!("Cluster of event {} no longer exists", resource);
            return Ok(());
        };
        match reconciler {
            CLUSTER_RECONCILER => self.cluster_reconciler.reconcile(&cluster).await,
            _ => self.condition_reconciler.reconcile(&cluster).await,
        }
    }

    /// Load the cluster an event points at; `None` if it is gone.
    async fn lookup(&self, resource: &Resource) -> Result<Option<Cluster>, ControllerError> {
        match self.service.select(&lookup_key(resource)).await {
            Ok(cluster) => Ok(Some(cluster)),
            Err(ControllerError::Store(StoreError::NotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Lookup by id within the project, else by name within the full tenant scope.
pub fn lookup_key(resource: &Resource) -> ClusterKey {
    if resource.id.is_empty() {
        ClusterKey::by_name(&resource.project_id, &resource.name)
            .with_tenant(&resource.partner_id, &resource.organization_id)
    } else {
        ClusterKey::by_id(&resource.project_id, &resource.id)
    }
}

#[cfg(test)]
#[path = "handler_test.rs"]
mod handler_test;
