//! RBAC objects for AIS daemon pods.
//!
//! Daemons read their own pods, services and config from the API server,
//! and look up nodes for host-network details. The cluster-scoped pieces are
//! named with the namespace to avoid collisions between clusters.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::AIStore;
use crate::resources::common::{cluster_rbac_name, owned_meta, rbac_name, standard_labels};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(strings(api_groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

fn service_account_subject(cluster: &AIStore) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: rbac_name(cluster),
        namespace: Some(cluster.namespace_or_default()),
        ..Default::default()
    }
}

/// Cluster-scoped objects cannot carry a namespaced owner, so they only get labels.
fn cluster_scoped_meta(cluster: &AIStore) -> ObjectMeta {
    ObjectMeta {
        name: Some(cluster_rbac_name(cluster)),
        labels: Some(standard_labels(cluster)),
        ..Default::default()
    }
}

pub fn generate_service_account(cluster: &AIStore) -> ServiceAccount {
    ServiceAccount {
        metadata: owned_meta(cluster, rbac_name(cluster), standard_labels(cluster)),
        ..Default::default()
    }
}

pub fn generate_role(cluster: &AIStore) -> Role {
    Role {
        metadata: owned_meta(cluster, rbac_name(cluster), standard_labels(cluster)),
        rules: Some(vec![
            rule(
                &[""],
                &["pods", "services", "configmaps", "secrets"],
                &["get", "list", "watch"],
            ),
            rule(&["apps"], &["statefulsets"], &["get", "list", "watch"]),
        ]),
    }
}

pub fn generate_role_binding(cluster: &AIStore) -> RoleBinding {
    RoleBinding {
        metadata: owned_meta(cluster, rbac_name(cluster), standard_labels(cluster)),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: rbac_name(cluster),
        },
        subjects: Some(vec![service_account_subject(cluster)]),
    }
}

pub fn generate_cluster_role(cluster: &AIStore) -> ClusterRole {
    ClusterRole {
        metadata: cluster_scoped_meta(cluster),
        rules: Some(vec![rule(&[""], &["nodes"], &["get", "list", "watch"])]),
        ..Default::default()
    }
}

pub fn generate_cluster_role_binding(cluster: &AIStore) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: cluster_scoped_meta(cluster),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_rbac_name(cluster),
        },
        subjects: Some(vec![service_account_subject(cluster)]),
    }
}
