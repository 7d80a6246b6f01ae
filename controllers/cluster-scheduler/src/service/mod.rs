//! Cluster service.
//!
//! Owns every write to clusters, namespaces and tokens. Status writes go
//! through the merge engine under an optimistic read-merge-write loop, so
//! concurrent writers of different condition types never clobber each other.

mod bootstrap;

pub use bootstrap::{RegisterAgentRequest, RegisterAgentResponse, signer_options};

use crate::config::Config;
use crate::error::ControllerError;
use bootstrap_client::BootstrapClientTrait;
use cluster_store::{ClusterKey, Notifier, Store, StoreError};
use fleet_events::{Handler, Resource, ResourceEventType};
use fleet_types::{
    CLUSTER_FINALIZER, CLUSTER_ID_LABEL, Cluster, ClusterConditionType, ClusterNamespace, ClusterStatus, ClusterToken,
    ClusterTokenSpec, ClusterTokenStatus, ConditionStatus, HasConditions, StatusMerge, TokenState,
    new_condition,
};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Notify channel carrying cluster identities after status changes.
pub const CLUSTER_CHANNEL: &str = "cluster";

const MAX_NAME_LENGTH: usize = 63;
const MAX_UPDATE_ATTEMPTS: u32 = 5;
const CONFLICT_BASE_DELAY: Duration = Duration::from_millis(10);

/// Settings the service takes from [`Config`]
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub relay_bootstrap_addr: String,
    pub event_timeout: Duration,
    pub core_relay_template: String,
    pub ca_key_password: Option<String>,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            relay_bootstrap_addr: config.relay_bootstrap_addr.clone(),
            event_timeout: config.event_timeout,
            core_relay_template: config.core_relay_template.clone(),
            ca_key_password: config.ca_key_password.clone(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Lowercase alphanumerics and dashes, starting with a letter.
pub fn validate_cluster_name(name: &str) -> Result<(), ControllerError> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_start || !valid_rest {
        return Err(ControllerError::InvalidCluster(format!(
            "name {:?} must match ^[a-z][a-z0-9-]*$",
            name
        )));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ControllerError::InvalidCluster(format!(
            "name {:?} is longer than {} characters",
            name, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

/// Dispatch key of a cluster event
pub fn cluster_resource(key: &ClusterKey, event_type: ResourceEventType) -> Resource {
    Resource {
        partner_id: key.partner.clone(),
        organization_id: key.organization.clone(),
        project_id: key.project.clone(),
        id: key.id.clone(),
        name: key.name.clone(),
        event_type,
        ..Default::default()
    }
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Validate `cluster` and give it an id, the cleanup finalizer and the
/// initial conditions; returns the registration token written into its status.
fn prepare(cluster: &mut Cluster) -> Result<String, ControllerError> {
    if cluster.spec.project.is_empty() {
        return Err(ControllerError::InvalidCluster("project is required".to_string()));
    }
    validate_cluster_name(cluster.cluster_name())?;

    cluster.metadata.namespace = Some(cluster.spec.project.clone());
    cluster
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .entry(CLUSTER_ID_LABEL.to_string())
        .or_insert_with(|| uuid::Uuid::new_v4().to_string());
    let finalizers = cluster.metadata.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == CLUSTER_FINALIZER) {
        finalizers.push(CLUSTER_FINALIZER.to_string());
    }

    let token = new_token();
    let mut status = ClusterStatus::with_defaults();
    status.set_condition(new_condition(ClusterConditionType::BootstrapAgent)(
        ConditionStatus::Pending,
        "created",
    ));
    status.token = Some(token.clone());
    cluster.status = Some(status);
    Ok(token)
}

pub struct ClusterService {
    store: Arc<dyn Store>,
    bootstrap: Arc<dyn BootstrapClientTrait>,
    notifier: Arc<dyn Notifier>,
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
    settings: ServiceSettings,
}

impl ClusterService {
    pub fn new(
        store: Arc<dyn Store>,
        bootstrap: Arc<dyn BootstrapClientTrait>,
        notifier: Arc<dyn Notifier>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            bootstrap,
            notifier,
            handlers: RwLock::new(Vec::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Register a handler for every cluster event the service emits
    pub fn add_event_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    async fn emit(&self, resource: Resource) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler.on_change(resource.clone()).await;
        }
    }

    /// Validate and persist a new cluster, then issue its registration token.
    pub async fn create(&self, mut cluster: Cluster) -> Result<Cluster, ControllerError> {
        let token = prepare(&mut cluster)?;
        let created = self.store.create_cluster(&cluster).await?;
        info!("Created cluster {} in project {}", created.cluster_name(), created.spec.project);
        self.issue_token(&created, token).await
    }

    /// Take over a cluster object written straight to the API server.
    ///
    /// Same defaults as [`ClusterService::create`]; the object already exists,
    /// so labels and finalizer are patched onto it before the status. A
    /// cluster that already carries a status is returned untouched.
    pub async fn admit(&self, cluster: &Cluster) -> Result<Cluster, ControllerError> {
        if cluster.spec.project.is_empty() {
            return Err(ControllerError::InvalidCluster("project is required".to_string()));
        }
        let key = ClusterKey::by_name(&cluster.spec.project, cluster.cluster_name());
        let mut prepared = self.store.get_cluster(&key).await?;
        if prepared.status.is_some() {
            debug!("Cluster {} already admitted", key);
            return Ok(prepared);
        }
        let token = prepare(&mut prepared)?;

        let mut updated = self.store.update_cluster(&prepared).await?;
        updated.status = prepared.status;
        let admitted = self.store.update_cluster_status(&updated).await?;
        info!("Admitted cluster {} in project {}", admitted.cluster_name(), admitted.spec.project);
        self.issue_token(&admitted, token).await
    }

    async fn issue_token(&self, cluster: &Cluster, token: String) -> Result<Cluster, ControllerError> {
        let mut record = ClusterToken::new(
            &token,
            ClusterTokenSpec {
                cluster_id: cluster.id().unwrap_or_default().to_string(),
                cluster_name: cluster.cluster_name().to_string(),
                project: cluster.spec.project.clone(),
            },
        );
        record.status = Some(ClusterTokenStatus {
            state: TokenState::Issued,
        });
        self.store.create_token(&record).await?;

        let key = ClusterKey::for_cluster(cluster);
        self.emit(cluster_resource(&key, ResourceEventType::Create)).await;
        Ok(cluster.clone())
    }

    pub async fn select(&self, key: &ClusterKey) -> Result<Cluster, ControllerError> {
        Ok(self.store.get_cluster(key).await?)
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>, ControllerError> {
        Ok(self.store.list_clusters().await?)
    }

    pub async fn list_namespaces(&self, cluster: &Cluster) -> Result<Vec<ClusterNamespace>, ControllerError> {
        let id = cluster.id().unwrap_or_default();
        Ok(self.store.list_namespaces(&cluster.spec.project, id).await?)
    }

    /// Mark a cluster for deletion; the reconciler performs it.
    pub async fn request_delete(&self, key: &ClusterKey) -> Result<(), ControllerError> {
        let incoming =
            ClusterStatus::with_condition(ClusterConditionType::Delete, ConditionStatus::Pending, "deleting");
        let updated = self.update_cluster_condition_status(key, &incoming).await?;
        let key = updated.as_ref().map_or_else(|| key.clone(), ClusterKey::for_cluster);
        self.emit(cluster_resource(&key, ResourceEventType::Delete)).await;
        Ok(())
    }

    /// Merge `incoming` into the stored status.
    ///
    /// Conflicts re-read and retry the whole cycle. A merged status with
    /// `Delete = Success` removes the cluster and yields `None`.
    pub async fn update_cluster_condition_status(
        &self,
        key: &ClusterKey,
        incoming: &ClusterStatus,
    ) -> Result<Option<Cluster>, ControllerError> {
        let mut attempt = 0;
        loop {
            let mut cluster = self.store.get_cluster(key).await?;
            let mut status = cluster.status.clone().unwrap_or_else(ClusterStatus::with_defaults);
            status.merge_from(incoming)?;

            if status.is_condition(ClusterConditionType::Delete, ConditionStatus::Success) {
                self.store.delete_cluster(&ClusterKey::for_cluster(&cluster)).await?;
                info!("Deleted cluster {}", key);
                return Ok(None);
            }

            cluster.status = Some(status);
            match self.store.update_cluster_status(&cluster).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(StoreError::Conflict(reason)) if attempt + 1 < MAX_UPDATE_ATTEMPTS => {
                    debug!("Conflict updating status of {}, retrying: {}", key, reason);
                    tokio::time::sleep(CONFLICT_BASE_DELAY * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write a status update under a fresh deadline, then tell handlers and listeners.
    pub async fn update_status(&self, key: &ClusterKey, incoming: &ClusterStatus) -> Result<(), ControllerError> {
        let updated = tokio::time::timeout(
            self.settings.event_timeout,
            self.update_cluster_condition_status(key, incoming),
        )
        .await
        .map_err(|_| ControllerError::Timeout(format!("status update of cluster {}", key)))??;

        let key = updated.as_ref().map_or_else(|| key.clone(), ClusterKey::for_cluster);
        self.emit(cluster_resource(&key, ResourceEventType::UpdateStatus)).await;
        self.notifier.notify(CLUSTER_CHANNEL, &serde_json::to_string(&key)?);
        Ok(())
    }

    /// Persist annotations onto the stored cluster, retrying on conflict.
    pub async fn update_cluster_annotations(
        &self,
        key: &ClusterKey,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Cluster, ControllerError> {
        let mut attempt = 0;
        loop {
            let mut cluster = self.store.get_cluster(key).await?;
            cluster
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));

            match self.store.update_cluster(&cluster).await {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict(reason)) if attempt + 1 < MAX_UPDATE_ATTEMPTS => {
                    debug!("Conflict updating annotations of {}, retrying: {}", key, reason);
                    tokio::time::sleep(CONFLICT_BASE_DELAY * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Exchange a one-time registration token for the cluster it was issued for.
    pub async fn register(&self, token: &str) -> Result<Cluster, ControllerError> {
        let record = match self.store.get_token(token).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return Err(ControllerError::InvalidToken),
            Err(e) => return Err(e.into()),
        };
        match record.state() {
            TokenState::Issued => {}
            TokenState::Used => return Err(ControllerError::UsedToken),
            TokenState::NotSet | TokenState::Revoked => return Err(ControllerError::InvalidToken),
        }

        let mut used = record.clone();
        used.status = Some(ClusterTokenStatus { state: TokenState::Used });
        match self.store.update_token_status(&used).await {
            Ok(_) => {}
            // a concurrent registration won the race
            Err(StoreError::Conflict(_)) => return Err(ControllerError::UsedToken),
            Err(e) => return Err(e.into()),
        }

        let key = ClusterKey::by_id(&record.spec.project, &record.spec.cluster_id);
        let incoming =
            ClusterStatus::with_condition(ClusterConditionType::Register, ConditionStatus::Success, "registered");
        self.update_status(&key, &incoming).await?;
        info!("Registered cluster {}", record.spec.cluster_name);
        self.select(&key).await
    }

    /// Forward cluster notifications to `tx` until `stop` fires.
    ///
    /// Payloads that cannot be decoded are skipped; a full `tx` drops the
    /// notification rather than stalling the channel.
    pub fn listen_clusters(&self, tx: mpsc::Sender<ClusterKey>, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.notifier.listen(CLUSTER_CHANNEL);
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    () = stop.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(payload) => payload,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Cluster listener lagged, skipped {} notifications", skipped);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                match serde_json::from_str::<ClusterKey>(&payload) {
                    Ok(key) => {
                        if tx.try_send(key).is_err() {
                            debug!("Cluster listener busy, dropping notification");
                        }
                    }
                    Err(e) => warn!("Unable to decode cluster notification: {}", e),
                }
            }
        })
    }
}
