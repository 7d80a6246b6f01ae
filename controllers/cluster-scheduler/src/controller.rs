//! Main controller implementation.
//!
//! Wires the Kubernetes store, the bootstrap client and the cluster service
//! to the event handler, then runs the watchers, the anti-entropy loop, the
//! notification forwarder and the HTTP server until one of them fails or the
//! process is interrupted.

use crate::config::Config;
use crate::error::ControllerError;
use crate::handler::{ClusterEventHandler, HandlerConfig};
use crate::server::{self, ProbeState};
use crate::service::{ClusterService, ServiceSettings};
use crate::watcher::{self, WatchContext, Watcher};
use bootstrap_client::BootstrapClient;
use cluster_store::{BroadcastNotifier, KubeStore};
use kube::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cluster scheduler process.
pub struct Controller {
    handler: Arc<ClusterEventHandler>,
    stop: CancellationToken,
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    namespace_watcher: JoinHandle<Result<(), ControllerError>>,
    anti_entropy: JoinHandle<Result<(), ControllerError>>,
    notifications: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing cluster scheduler");

        let kube_client = Client::try_default().await
            .map_err(|e| ControllerError::Kube(e.into()))?;

        let store = KubeStore::new(kube_client.clone(), config.watch_namespace.clone());
        let bootstrap = BootstrapClient::new(config.bootstrap_url.clone(), config.bootstrap_token.clone())?;
        let service = Arc::new(ClusterService::new(
            Arc::new(store),
            Arc::new(bootstrap),
            Arc::new(BroadcastNotifier::default()),
            ServiceSettings::from(&config),
        ));

        info!("Checking CA of core relay template {}", config.core_relay_template);
        match service.ensure_core_relay_ca().await {
            Ok(true) => info!("Core relay CA updated"),
            Ok(false) => info!("Core relay CA is current"),
            Err(e) => warn!("Unable to check core relay CA (will continue): {}", e),
        }

        let stop = CancellationToken::new();
        let handler = ClusterEventHandler::new(Arc::clone(&service), HandlerConfig::from(&config), stop.clone());
        service.add_event_handler(handler.cluster_hook());
        handler.handle();

        let watcher_instance = Arc::new(Watcher::new(
            &kube_client,
            config.watch_namespace.as_deref(),
            WatchContext {
                service: Arc::clone(&service),
                cluster_hook: handler.cluster_hook(),
                workload_hook: handler.workload_hook(),
            },
        ));

        let cluster_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_clusters().await })
        };
        let namespace_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_namespaces().await })
        };
        let anti_entropy = tokio::spawn(watcher::anti_entropy(
            Arc::clone(&service),
            handler.anti_entropy_hook(),
            config.anti_entropy_interval,
            stop.clone(),
        ));
        let notifications = tokio::spawn(watcher::forward_cluster_notifications(
            Arc::clone(&service),
            handler.workload_hook(),
            stop.clone(),
        ));

        let ready = Arc::new(AtomicBool::new(false));
        let probe_state = ProbeState {
            ready: Arc::clone(&ready),
            dedup_dropped: {
                let handler = Arc::clone(&handler);
                Arc::new(move || handler.dedup_dropped_total())
            },
        };
        let probe_server = tokio::spawn(server::serve(config.metrics_addr, probe_state, service, stop.clone()));
        ready.store(true, Ordering::Release);

        Ok(Self {
            handler,
            stop,
            cluster_watcher,
            namespace_watcher,
            anti_entropy,
            notifications,
            probe_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Cluster scheduler running");

        let result = tokio::select! {
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Cluster watcher panicked: {}", e)))
                    .and_then(|r| r.map_err(|e| ControllerError::Watch(format!("Cluster watcher error: {}", e))))
            }
            result = &mut self.namespace_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ClusterNamespace watcher panicked: {}", e)))
                    .and_then(|r| r.map_err(|e| ControllerError::Watch(format!("ClusterNamespace watcher error: {}", e))))
            }
            result = &mut self.anti_entropy => {
                result.map_err(|e| ControllerError::Watch(format!("Anti-entropy panicked: {}", e)))
                    .and_then(|r| r)
            }
            result = &mut self.notifications => {
                result.map_err(|e| ControllerError::Watch(format!("Notification forwarder panicked: {}", e)))
                    .and_then(|r| r)
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))
                    .and_then(|r| r)
            }
            signal = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                signal.map_err(ControllerError::from)
            }
        };

        self.stop.cancel();
        self.cluster_watcher.abort();
        self.namespace_watcher.abort();
        self.handler.join().await;
        info!("Cluster scheduler stopped");
        result
    }
}
