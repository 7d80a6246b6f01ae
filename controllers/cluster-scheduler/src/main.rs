//! Cluster Scheduler
//!
//! Control-plane core of the fleet manager:
//! - ClusterReconciler: deletes clusters and creates their bootstrap relay agents
//! - ClusterConditionReconciler: rolls namespace conditions up into NamespaceSync
//! - Agent registration: signs bootstrap agent CSRs against the infra CA
//!
//! Cluster and namespace changes are dispatched through work queues to a
//! fixed pool of workers.

mod config;
mod controller;
mod error;
mod handler;
mod metrics;
mod reconciler;
mod server;
mod service;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Cluster Scheduler");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Bootstrap URL: {}", config.bootstrap_url);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers per queue: {}", config.workers);
    info!("  Retry cooldown: {:?}", config.cooldown);
    info!("  Event timeout: {:?}", config.event_timeout);
    info!("  Anti-entropy interval: {:?}", config.anti_entropy_interval);
    info!("  Dedup drop policy: {:?}", config.dedup_drop_policy);
    info!("  Core relay template: {}", config.core_relay_template);
    info!("  Metrics address: {}", config.metrics_addr);

    metrics::register_metrics()
        .map_err(|e| ControllerError::InvalidConfig(format!("unable to register metrics: {}", e)))?;

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
