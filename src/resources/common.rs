//! Common resource generation utilities.
//!
//! Names, labels and owner references shared by every object the operator
//! creates for an AIStore.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::crd::AIStore;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const MANAGED_BY: &str = "ais-operator";

/// The two daemon roles of an AIS cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DaemonRole {
    Proxy,
    Target,
}

impl DaemonRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonRole::Proxy => "proxy",
            DaemonRole::Target => "target",
        }
    }
}

impl std::fmt::Display for DaemonRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// StatefulSet (and headless Service) name for a role, e.g. `ais-proxy`.
pub fn statefulset_name(cluster: &AIStore, role: DaemonRole) -> String {
    format!("{}-{}", cluster.name_any(), role)
}

/// Name of the pod with the given ordinal.
pub fn pod_name(cluster: &AIStore, role: DaemonRole, ordinal: i32) -> String {
    format!("{}-{}", statefulset_name(cluster, role), ordinal)
}

/// Ordinal suffix of a StatefulSet pod name.
pub fn pod_ordinal(pod_name: &str) -> Option<i32> {
    pod_name.rsplit_once('-')?.1.parse().ok()
}

pub fn headless_service_name(cluster: &AIStore, role: DaemonRole) -> String {
    statefulset_name(cluster, role)
}

/// Shared LoadBalancer service for proxies.
pub fn proxy_lb_service_name(cluster: &AIStore) -> String {
    format!("{}-lb", statefulset_name(cluster, DaemonRole::Proxy))
}

/// Per-pod LoadBalancer service for a target.
pub fn target_lb_service_name(cluster: &AIStore, ordinal: i32) -> String {
    pod_name(cluster, DaemonRole::Target, ordinal)
}

pub fn global_configmap_name(cluster: &AIStore) -> String {
    format!("{}-config", cluster.name_any())
}

pub fn statsd_configmap_name(cluster: &AIStore) -> String {
    format!("{}-statsd", cluster.name_any())
}

/// Name shared by the ServiceAccount, Role and RoleBinding.
pub fn rbac_name(cluster: &AIStore) -> String {
    format!("{}-sa", cluster.name_any())
}

/// ClusterRole/ClusterRoleBinding are cluster-scoped; include the namespace.
pub fn cluster_rbac_name(cluster: &AIStore) -> String {
    format!("{}-{}-cr", cluster.namespace_or_default(), cluster.name_any())
}

pub fn admin_client_name(cluster: &AIStore) -> String {
    format!("{}-client", cluster.name_any())
}

pub fn pdb_name(cluster: &AIStore) -> String {
    statefulset_name(cluster, DaemonRole::Target)
}

pub fn certificate_name(cluster: &AIStore) -> String {
    format!("{}-tls", cluster.name_any())
}

/// Labels shared by all objects of a cluster.
pub fn standard_labels(cluster: &AIStore) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.to_string(), cluster.name_any());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels
}

/// Labels selecting one role's pods.
pub fn role_labels(cluster: &AIStore, role: DaemonRole) -> BTreeMap<String, String> {
    let mut labels = standard_labels(cluster);
    labels.insert(LABEL_COMPONENT.to_string(), role.to_string());
    labels
}

/// Render labels as an equality label selector.
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Label selector for one role's pods.
pub fn role_selector(cluster: &AIStore, role: DaemonRole) -> String {
    selector(&role_labels(cluster, role))
}

/// Create owner reference for an AIStore
pub fn owner_reference(cluster: &AIStore) -> OwnerReference {
    OwnerReference {
        api_version: "ais.nvidia.com/v1beta1".to_string(),
        kind: "AIStore".to_string(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for an owned, namespaced object.
pub fn owned_meta(
    cluster: &AIStore,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(labels),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    }
}
