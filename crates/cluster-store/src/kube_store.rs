//! Kubernetes backed store
//!
//! `Cluster` and `ClusterNamespace` live in the namespace named after their
//! project; `ClusterToken` is cluster scoped. Writes are merge patches that
//! carry `metadata.resourceVersion`, so the API server rejects stale writers
//! with 409.

use crate::error::StoreError;
use crate::key::ClusterKey;
use crate::store_trait::{ClusterRepository, NamespaceRepository, TokenRepository};
use fleet_types::{CLUSTER_FINALIZER, CLUSTER_ID_LABEL, Cluster, ClusterNamespace, ClusterToken};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Map API status codes onto store errors
fn map_kube_error(err: kube::Error, what: &str) -> StoreError {
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(what.to_string()),
        kube::Error::Api(api_err) if api_err.code == 409 => {
            if api_err.reason == "AlreadyExists" {
                StoreError::AlreadyExists(what.to_string())
            } else {
                StoreError::Conflict(format!("{}: {}", what, api_err.message))
            }
        }
        other => StoreError::Kube(other),
    }
}

/// Merge patch of `body` guarded by the object's resource version
fn versioned_patch<K: Resource>(obj: &K, body: serde_json::Value) -> serde_json::Value {
    let mut patch = body;
    if let Some(version) = obj.meta().resource_version.as_deref() {
        patch["metadata"]["resourceVersion"] = serde_json::Value::String(version.to_string());
    }
    patch
}

/// Store backed by the fleet custom resources
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    /// Limit listing to one project namespace
    scope: Option<String>,
}

impl KubeStore {
    pub fn new(client: Client, scope: Option<String>) -> Self {
        Self { client, scope }
    }

    fn all_clusters(&self) -> Api<Cluster> {
        match &self.scope {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn clusters(&self, project: &str) -> Api<Cluster> {
        Api::namespaced(self.client.clone(), project)
    }

    fn namespaces(&self, project: &str) -> Api<ClusterNamespace> {
        Api::namespaced(self.client.clone(), project)
    }

    fn tokens(&self) -> Api<ClusterToken> {
        Api::all(self.client.clone())
    }

    async fn patch<K>(
        &self,
        api: &Api<K>,
        obj: &K,
        body: serde_json::Value,
        status: bool,
    ) -> Result<K, StoreError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        let name = obj.name_any();
        let patch = versioned_patch(obj, body);
        let params = PatchParams::default();
        let result = if status {
            api.patch_status(&name, &params, &Patch::Merge(&patch)).await
        } else {
            api.patch(&name, &params, &Patch::Merge(&patch)).await
        };
        result.map_err(|e| map_kube_error(e, &name))
    }
}

#[async_trait::async_trait]
impl ClusterRepository for KubeStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Cluster, StoreError> {
        key.validate()?;
        let api = self.clusters(&key.project);

        let found = if key.id.is_empty() {
            match api.get(&key.name).await {
                Ok(cluster) => Some(cluster),
                Err(kube::Error::Api(api_err)) if api_err.code == 404 => None,
                Err(e) => return Err(StoreError::Kube(e)),
            }
        } else {
            let params = ListParams::default().labels(&format!("{}={}", CLUSTER_ID_LABEL, key.id));
            api.list(&params).await?.items.into_iter().next()
        };

        found
            .filter(|cluster| key.matches(cluster))
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", key)))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        let api = self.all_clusters();
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        let name = cluster.name_any();
        let api = self.clusters(&cluster.spec.project);
        debug!("Creating cluster {}/{}", cluster.spec.project, name);

        let created = api
            .create(&PostParams::default(), cluster)
            .await
            .map_err(|e| map_kube_error(e, &name))?;

        // status is a subresource and is dropped on create
        match &cluster.status {
            Some(status) => {
                let body = serde_json::json!({ "status": status });
                self.patch(&api, &created, body, true).await
            }
            None => Ok(created),
        }
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        let api = self.clusters(&cluster.spec.project);
        let body = serde_json::json!({
            "metadata": {
                "labels": cluster.metadata.labels,
                "annotations": cluster.metadata.annotations,
                "finalizers": cluster.metadata.finalizers,
            }
        });
        self.patch(&api, cluster, body, false).await
    }

    async fn update_cluster_status(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        let api = self.clusters(&cluster.spec.project);
        let body = serde_json::json!({ "status": cluster.status });
        self.patch(&api, cluster, body, true).await
    }

    /// Releases the cleanup finalizer, then deletes; an object already gone counts as deleted.
    async fn delete_cluster(&self, key: &ClusterKey) -> Result<(), StoreError> {
        let cluster = self.get_cluster(key).await?;
        let name = cluster.name_any();
        let api = self.clusters(&key.project);

        if cluster.has_finalizer() {
            let finalizers: Vec<&String> = cluster
                .finalizers()
                .iter()
                .filter(|f| f.as_str() != CLUSTER_FINALIZER)
                .collect();
            let body = serde_json::json!({ "metadata": { "finalizers": finalizers } });
            self.patch(&api, &cluster, body, false).await?;
        }

        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(map_kube_error(e, &name)),
        }
    }
}

#[async_trait::async_trait]
impl NamespaceRepository for KubeStore {
    async fn list_namespaces(
        &self,
        project: &str,
        cluster_id: &str,
    ) -> Result<Vec<ClusterNamespace>, StoreError> {
        let list = self.namespaces(project).list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|ns| ns.spec.cluster_id == cluster_id)
            .collect())
    }

    async fn update_namespace_status(
        &self,
        namespace: &ClusterNamespace,
    ) -> Result<ClusterNamespace, StoreError> {
        let api = self.namespaces(&namespace.spec.project);
        let body = serde_json::json!({ "status": namespace.status });
        self.patch(&api, namespace, body, true).await
    }
}

#[async_trait::async_trait]
impl TokenRepository for KubeStore {
    async fn get_token(&self, token: &str) -> Result<ClusterToken, StoreError> {
        self.tokens()
            .get(token)
            .await
            .map_err(|e| map_kube_error(e, "token"))
    }

    async fn create_token(&self, token: &ClusterToken) -> Result<ClusterToken, StoreError> {
        let api = self.tokens();
        let created = api
            .create(&PostParams::default(), token)
            .await
            .map_err(|e| map_kube_error(e, "token"))?;
        match &token.status {
            Some(status) => {
                let body = serde_json::json!({ "status": status });
                self.patch(&api, &created, body, true).await
            }
            None => Ok(created),
        }
    }

    async fn update_token_status(&self, token: &ClusterToken) -> Result<ClusterToken, StoreError> {
        let body = serde_json::json!({ "status": token.status });
        self.patch(&self.tokens(), token, body, true).await
    }
}
