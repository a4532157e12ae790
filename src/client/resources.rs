//! Narrow Kubernetes client used by the reconciler.
//!
//! Everything the operator does to Kubernetes goes through [`ResourceClient`]
//! so the reconciliation logic can be driven against an in-memory fake.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ConfigMap, Node, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::controller::error::{Error, Result};
use crate::crd::{AIStore, AIStoreStatus};
use crate::resources::certificate::Certificate;

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "ais-operator";

/// A Kubernetes kind the operator manages.
pub trait ManagedResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Typed API handle. Cluster-scoped kinds ignore `namespace`.
    fn api(client: Client, namespace: &str) -> Api<Self>;
}

macro_rules! namespaced {
    ($($kind:ty),* $(,)?) => {
        $(impl ManagedResource for $kind {
            fn api(client: Client, namespace: &str) -> Api<Self> {
                Api::namespaced(client, namespace)
            }
        })*
    };
}

macro_rules! cluster_scoped {
    ($($kind:ty),* $(,)?) => {
        $(impl ManagedResource for $kind {
            fn api(client: Client, _namespace: &str) -> Api<Self> {
                Api::all(client)
            }
        })*
    };
}

namespaced!(
    AIStore,
    ConfigMap,
    Secret,
    Service,
    StatefulSet,
    Deployment,
    ServiceAccount,
    Role,
    RoleBinding,
    PersistentVolumeClaim,
    Job,
    PodDisruptionBudget,
    Pod,
    EndpointSlice,
    Certificate,
);

cluster_scoped!(ClusterRole, ClusterRoleBinding, Node);

/// CRUD and patch operations over Kubernetes objects.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Create or update `obj`. Returns true when the stored object changed.
    async fn apply<K: ManagedResource>(&self, obj: &K) -> Result<bool>;

    /// Create `obj` unless it exists. Returns true when it was created.
    async fn create_if_not_exists<K: ManagedResource>(&self, obj: &K) -> Result<bool>;

    /// Create `obj`, typically one using `generateName`.
    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K>;

    /// Delete an object. Returns true when it existed, including objects
    /// that are still terminating from an earlier delete.
    async fn delete_if_exists<K: ManagedResource>(&self, namespace: &str, name: &str)
    -> Result<bool>;

    /// Delete an object immediately with a zero grace period.
    async fn force_delete<K: ManagedResource>(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn get<K: ManagedResource>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List objects matching a label selector (empty selects everything).
    async fn list<K: ManagedResource>(&self, namespace: &str, selector: &str) -> Result<Vec<K>>;

    /// JSON merge patch.
    async fn patch<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K>;

    /// Set `spec.replicas` on a StatefulSet. Returns true when it changed.
    async fn update_statefulset_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<bool>;

    /// Merge-patch the AIStore's metadata/spec, guarded by its resourceVersion.
    async fn patch_cluster(&self, cluster: &AIStore, patch: &serde_json::Value)
    -> Result<AIStore>;

    /// Write the AIStore status, guarded by its resourceVersion.
    async fn patch_cluster_status(
        &self,
        cluster: &AIStore,
        status: &AIStoreStatus,
    ) -> Result<AIStore>;

    /// Publish a Kubernetes event against the AIStore. Best effort.
    async fn publish_event(
        &self,
        cluster: &AIStore,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Merge a resourceVersion precondition into a patch body.
pub fn with_resource_version(cluster: &AIStore, mut patch: serde_json::Value) -> serde_json::Value {
    if let (Some(rv), Some(obj)) = (cluster.resource_version(), patch.as_object_mut()) {
        let metadata = obj.entry("metadata").or_insert_with(|| json!({}));
        if let Some(meta) = metadata.as_object_mut() {
            meta.insert("resourceVersion".to_string(), json!(rv));
        }
    }
    patch
}

/// [`ResourceClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    reporter: Reporter,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        let instance = std::env::var("POD_NAME")
            .ok()
            .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()));
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
        }
    }

    fn api<K: ManagedResource>(&self, namespace: &str) -> Api<K> {
        K::api(self.client.clone(), namespace)
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }
}

fn namespace_of<K: ManagedResource>(obj: &K) -> String {
    obj.namespace().unwrap_or_default()
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn apply<K: ManagedResource>(&self, obj: &K) -> Result<bool> {
        let api = self.api::<K>(&namespace_of(obj));
        let name = obj.name_any();
        let before = api.get_opt(&name).await?;
        let after = api
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(obj),
            )
            .await?;
        let changed = before.and_then(|b| b.resource_version()) != after.resource_version();
        if changed {
            debug!(kind = %K::kind(&()), name = %name, "applied object");
        }
        Ok(changed)
    }

    async fn create_if_not_exists<K: ManagedResource>(&self, obj: &K) -> Result<bool> {
        let api = self.api::<K>(&namespace_of(obj));
        match api.create(&PostParams::default(), obj).await {
            Ok(_) => {
                debug!(kind = %K::kind(&()), name = %obj.name_any(), "created object");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K> {
        let api = self.api::<K>(&namespace_of(obj));
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn delete_if_exists<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        let api = self.api::<K>(namespace);
        let Some(existing) = api.get_opt(name).await? else {
            return Ok(false);
        };
        if existing.meta().deletion_timestamp.is_some() {
            return Ok(true);
        }
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                debug!(kind = %K::kind(&()), name = %name, "deleted object");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn force_delete<K: ManagedResource>(&self, namespace: &str, name: &str) -> Result<bool> {
        let api = self.api::<K>(namespace);
        match api
            .delete(name, &DeleteParams::background().grace_period(0))
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get<K: ManagedResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: ManagedResource>(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn patch<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K> {
        Ok(self
            .api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn update_statefulset_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<bool> {
        let api = self.api::<StatefulSet>(namespace);
        let Some(sts) = api.get_opt(name).await? else {
            return Err(Error::MissingField(format!("statefulset {namespace}/{name}")));
        };
        if sts.spec.as_ref().and_then(|s| s.replicas) == Some(replicas) {
            return Ok(false);
        }
        api.patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(json!({"spec": {"replicas": replicas}})),
        )
        .await?;
        Ok(true)
    }

    async fn patch_cluster(
        &self,
        cluster: &AIStore,
        patch: &serde_json::Value,
    ) -> Result<AIStore> {
        let api = self.api::<AIStore>(&namespace_of(cluster));
        let body = with_resource_version(cluster, patch.clone());
        Ok(api
            .patch(&cluster.name_any(), &PatchParams::default(), &Patch::Merge(body))
            .await?)
    }

    async fn patch_cluster_status(
        &self,
        cluster: &AIStore,
        status: &AIStoreStatus,
    ) -> Result<AIStore> {
        let api = self.api::<AIStore>(&namespace_of(cluster));
        let body = with_resource_version(cluster, json!({ "status": status }));
        Ok(api
            .patch_status(
                &cluster.name_any(),
                &PatchParams::default(),
                &Patch::Merge(body),
            )
            .await?)
    }

    async fn publish_event(
        &self,
        cluster: &AIStore,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let object_ref = cluster.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
