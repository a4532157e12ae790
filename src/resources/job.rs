//! Host cleanup Job generation.
//!
//! One Job per node wipes the operator's marker files under the host path
//! prefix after a cluster with hostpath state storage has been deleted.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, HostPathVolumeSource, NodeAffinity, NodeSelector,
    NodeSelectorRequirement, NodeSelectorTerm, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use sha2::{Digest, Sha256};

use crate::crd::AIStore;
use crate::resources::common::{LABEL_COMPONENT, owner_reference, selector, standard_labels};

const CLEANUP_IMAGE: &str = "aistorage/ais-operator-helper:latest";
const CLEANUP_COMPONENT: &str = "host-cleanup";
const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

fn cleanup_labels(cluster: &AIStore) -> BTreeMap<String, String> {
    let mut labels = standard_labels(cluster);
    labels.insert(LABEL_COMPONENT.to_string(), CLEANUP_COMPONENT.to_string());
    labels
}

/// Label selector matching the cluster's cleanup Jobs.
pub fn cleanup_job_selector(cluster: &AIStore) -> String {
    selector(&cleanup_labels(cluster))
}

/// Longest generateName prefix that still leaves room for the API server's
/// 5-character suffix within a 63-character name.
const MAX_JOB_PREFIX: usize = 58;
const NODE_HASH_LEN: usize = 4;

/// generateName prefix of the cleanup Job for a node.
///
/// Long node names are cut and tagged with a short digest of the full name
/// so distinct nodes keep distinct prefixes.
pub fn cleanup_job_prefix(node: &str) -> String {
    let node = node.replace('.', "-");
    let prefix = format!("cleanup-{node}-");
    if prefix.len() <= MAX_JOB_PREFIX {
        return prefix;
    }
    let digest: Vec<u8> = Sha256::digest(node.as_bytes())
        .into_iter()
        .take(NODE_HASH_LEN)
        .collect();
    let tag = hex::encode(digest);
    let keep = MAX_JOB_PREFIX - "cleanup-".len() - tag.len() - 2;
    let head: String = node.chars().take(keep).collect();
    format!("cleanup-{}-{tag}-", head.trim_end_matches('-'))
}

/// Generate the cleanup Job pinned to `node`.
///
/// The Job is named by the API server from a per-node prefix and is removed
/// as soon as it finishes.
pub fn generate_cleanup_job(cluster: &AIStore, node: &str) -> Job {
    let prefix = cluster.spec.hostpath_prefix.clone();
    Job {
        metadata: ObjectMeta {
            generate_name: Some(cleanup_job_prefix(node)),
            namespace: cluster.namespace(),
            labels: Some(cleanup_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: Some(0),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(cleanup_labels(cluster)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    affinity: Some(node_affinity(node)),
                    containers: vec![Container {
                        name: "cleanup".to_string(),
                        image: Some(CLEANUP_IMAGE.to_string()),
                        command: Some(vec![
                            "/cleanup-helper".to_string(),
                            format!("-dir={prefix}"),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "hostpath".to_string(),
                            mount_path: prefix.clone(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "hostpath".to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: prefix,
                            type_: Some("Directory".to_string()),
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn node_affinity(node: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether the Job's pod completed successfully.
pub fn job_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.succeeded)
        .is_some_and(|n| n > 0)
}
