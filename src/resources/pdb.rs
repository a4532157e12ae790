//! PodDisruptionBudget generation for AIS targets.
//!
//! Limits how many targets voluntary disruptions (node drains, upgrades)
//! may take down at once, so data stays reachable.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::AIStore;
use crate::resources::common::{DaemonRole, owned_meta, pdb_name, role_labels};

const DEFAULT_MAX_UNAVAILABLE: i32 = 1;

/// Generate the target PDB, or `None` when it is not enabled.
pub fn generate_pod_disruption_budget(cluster: &AIStore) -> Option<PodDisruptionBudget> {
    let spec = cluster.spec.pdb.as_ref().filter(|p| p.enabled)?;
    let labels = role_labels(cluster, DaemonRole::Target);

    Some(PodDisruptionBudget {
        metadata: owned_meta(cluster, pdb_name(cluster), labels.clone()),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(
                spec.max_unavailable.unwrap_or(DEFAULT_MAX_UNAVAILABLE),
            )),
            selector: Some(LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
