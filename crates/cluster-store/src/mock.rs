//! In-memory store for unit testing
//!
//! Mirrors the optimistic concurrency of the Kubernetes store: every write
//! bumps a resource version and updates carrying a stale version fail with
//! `StoreError::Conflict`. Conflicts can also be injected.

use crate::error::StoreError;
use crate::key::ClusterKey;
use crate::store_trait::{ClusterRepository, NamespaceRepository, TokenRepository};
use fleet_types::{Cluster, ClusterNamespace, ClusterToken};
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    // (project, name)
    clusters: BTreeMap<(String, String), Cluster>,
    namespaces: BTreeMap<(String, String), ClusterNamespace>,
    tokens: BTreeMap<String, ClusterToken>,
    version: u64,
    injected_conflicts: u32,
    writes: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Version check shared by every update
    fn admit<K: Resource>(&mut self, stored: &K, incoming: &K, what: &str) -> Result<(), StoreError> {
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            return Err(StoreError::Conflict(format!("{} (injected)", what)));
        }
        let expected = &stored.meta().resource_version;
        match &incoming.meta().resource_version {
            Some(version) if Some(version) != expected.as_ref() => {
                Err(StoreError::Conflict(format!("{}: stale resource version {}", what, version)))
            }
            _ => Ok(()),
        }
    }

    fn stamp<K: Resource>(&mut self, obj: &mut K) {
        obj.meta_mut().resource_version = Some(self.next_version());
        self.writes += 1;
    }
}

fn cluster_slot(cluster: &Cluster) -> (String, String) {
    let project = cluster
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| cluster.spec.project.clone());
    (project, cluster.cluster_name().to_string())
}

fn namespace_slot(ns: &ClusterNamespace) -> (String, String) {
    (
        ns.spec.project.clone(),
        ns.metadata.name.clone().unwrap_or_default(),
    )
}

/// Store holding every entity in memory
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a cluster as-is, replacing any previous one (for test setup)
    pub fn insert_cluster(&self, mut cluster: Cluster) -> Cluster {
        let mut state = self.state();
        state.stamp(&mut cluster);
        state.clusters.insert(cluster_slot(&cluster), cluster.clone());
        cluster
    }

    pub fn insert_namespace(&self, mut namespace: ClusterNamespace) -> ClusterNamespace {
        let mut state = self.state();
        state.stamp(&mut namespace);
        state.namespaces.insert(namespace_slot(&namespace), namespace.clone());
        namespace
    }

    pub fn insert_token(&self, mut token: ClusterToken) -> ClusterToken {
        let mut state = self.state();
        state.stamp(&mut token);
        state.tokens.insert(token.metadata.name.clone().unwrap_or_default(), token.clone());
        token
    }

    /// Fail the next `n` updates with `StoreError::Conflict`
    pub fn inject_conflicts(&self, n: u32) {
        self.state().injected_conflicts = n;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.state().writes
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.state().clusters.values().cloned().collect()
    }

    pub fn tokens(&self) -> Vec<ClusterToken> {
        self.state().tokens.values().cloned().collect()
    }

    fn find_cluster(state: &State, key: &ClusterKey) -> Option<(String, String)> {
        state
            .clusters
            .iter()
            .find(|(_, cluster)| key.matches(cluster))
            .map(|(slot, _)| slot.clone())
    }
}

#[async_trait::async_trait]
impl ClusterRepository for InMemoryStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Cluster, StoreError> {
        key.validate()?;
        let state = self.state();
        Self::find_cluster(&state, key)
            .and_then(|slot| state.clusters.get(&slot).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", key)))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        Ok(self.clusters())
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        let mut state = self.state();
        let slot = cluster_slot(cluster);
        if state.clusters.contains_key(&slot) {
            return Err(StoreError::AlreadyExists(format!("cluster {}/{}", slot.0, slot.1)));
        }
        let mut created = cluster.clone();
        created.metadata.namespace = Some(slot.0.clone());
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        state.stamp(&mut created);
        state.clusters.insert(slot, created.clone());
        Ok(created)
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        let mut state = self.state();
        let slot = cluster_slot(cluster);
        let stored = state
            .clusters
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}/{}", slot.0, slot.1)))?;
        state.admit(&stored, cluster, &slot.1)?;

        let mut updated = stored;
        updated.metadata.labels = cluster.metadata.labels.clone();
        updated.metadata.annotations = cluster.metadata.annotations.clone();
        updated.metadata.finalizers = cluster.metadata.finalizers.clone();
        state.stamp(&mut updated);
        state.clusters.insert(slot, updated.clone());
        Ok(updated)
    }

    async fn update_cluster_status(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        let mut state = self.state();
        let slot = cluster_slot(cluster);
        let stored = state
            .clusters
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}/{}", slot.0, slot.1)))?;
        state.admit(&stored, cluster, &slot.1)?;

        let mut updated = stored;
        updated.status = cluster.status.clone();
        state.stamp(&mut updated);
        state.clusters.insert(slot, updated.clone());
        Ok(updated)
    }

    async fn delete_cluster(&self, key: &ClusterKey) -> Result<(), StoreError> {
        key.validate()?;
        let mut state = self.state();
        let slot = Self::find_cluster(&state, key)
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", key)))?;
        state.clusters.remove(&slot);
        state.writes += 1;
        Ok(())
    }
}

#[async_trait::async_trait]
impl NamespaceRepository for InMemoryStore {
    async fn list_namespaces(
        &self,
        project: &str,
        cluster_id: &str,
    ) -> Result<Vec<ClusterNamespace>, StoreError> {
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| ns.spec.project == project && ns.spec.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    async fn update_namespace_status(
        &self,
        namespace: &ClusterNamespace,
    ) -> Result<ClusterNamespace, StoreError> {
        let mut state = self.state();
        let slot = namespace_slot(namespace);
        let stored = state
            .namespaces
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("namespace {}/{}", slot.0, slot.1)))?;
        state.admit(&stored, namespace, &slot.1)?;

        let mut updated = stored;
        updated.status = namespace.status.clone();
        state.stamp(&mut updated);
        state.namespaces.insert(slot, updated.clone());
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl TokenRepository for InMemoryStore {
    async fn get_token(&self, token: &str) -> Result<ClusterToken, StoreError> {
        self.state()
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("token".to_string()))
    }

    async fn create_token(&self, token: &ClusterToken) -> Result<ClusterToken, StoreError> {
        let mut state = self.state();
        let name = token.metadata.name.clone().unwrap_or_default();
        if state.tokens.contains_key(&name) {
            return Err(StoreError::AlreadyExists("token".to_string()));
        }
        let mut created = token.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        state.stamp(&mut created);
        state.tokens.insert(name, created.clone());
        Ok(created)
    }

    async fn update_token_status(&self, token: &ClusterToken) -> Result<ClusterToken, StoreError> {
        let mut state = self.state();
        let name = token.metadata.name.clone().unwrap_or_default();
        let stored = state
            .tokens
            .get(&name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("token".to_string()))?;
        state.admit(&stored, token, "token")?;

        let mut updated = stored;
        updated.status = token.status.clone();
        state.stamp(&mut updated);
        state.tokens.insert(name, updated.clone());
        Ok(updated)
    }
}
