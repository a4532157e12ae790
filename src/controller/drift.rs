//! Pod template drift detection.
//!
//! Decides whether a StatefulSet's stored pod template lags the template the
//! operator would generate now. Only fields the operator owns are compared,
//! so values the API server defaults do not trigger rollouts.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, PodTemplateSpec};

use crate::crd::RESTART_HASH_ANNOTATION;

/// Reason the current template must be replaced, or `None` when in sync.
pub fn template_drift(desired: &PodTemplateSpec, current: &PodTemplateSpec) -> Option<String> {
    let (Some(want), Some(have)) = (desired.spec.as_ref(), current.spec.as_ref()) else {
        return Some("pod spec missing".to_string());
    };

    if want.containers.len() != have.containers.len() {
        return Some("updating desired containers".to_string());
    }

    let init_pairs = want
        .init_containers
        .iter()
        .flatten()
        .zip(have.init_containers.iter().flatten())
        .take(1);
    let main_pairs = want.containers.iter().zip(have.containers.iter()).take(1);
    for (d, c) in init_pairs.chain(main_pairs) {
        if let Some(reason) = container_drift(d, c) {
            return Some(reason);
        }
    }

    let empty = BTreeMap::new();
    let want_meta = desired.metadata.as_ref();
    let have_meta = current.metadata.as_ref();
    if annotations_drift(
        want_meta.and_then(|m| m.annotations.as_ref()).unwrap_or(&empty),
        have_meta.and_then(|m| m.annotations.as_ref()).unwrap_or(&empty),
    ) {
        return Some("updating annotations".to_string());
    }

    if want_meta.and_then(|m| m.labels.as_ref()).unwrap_or(&empty)
        != have_meta.and_then(|m| m.labels.as_ref()).unwrap_or(&empty)
    {
        return Some("updating labels".to_string());
    }

    let want_sc = want.containers.first().and_then(|c| c.security_context.as_ref());
    let have_sc = have.containers.first().and_then(|c| c.security_context.as_ref());
    if want_sc != have_sc || want.security_context != have.security_context {
        return Some("updating security context".to_string());
    }

    if want.priority_class_name != have.priority_class_name {
        return Some("updating priority class".to_string());
    }

    // Container counts match, so a second container is the sidecar on both sides.
    if let (Some(d), Some(c)) = (want.containers.get(1), have.containers.get(1)) {
        if d.image != c.image {
            return Some(format!("updating image for {:?} container", d.name));
        }
    }

    None
}

fn container_drift(desired: &Container, current: &Container) -> Option<String> {
    if desired.image != current.image {
        return Some(format!("updating image for {:?} container", desired.name));
    }
    if normalized_env(desired.env.as_deref()) != normalized_env(current.env.as_deref()) {
        return Some(format!("updating env variables for {:?} container", desired.name));
    }
    if desired.resources.clone().unwrap_or_default() != current.resources.clone().unwrap_or_default()
    {
        return Some(format!(
            "updating resource requests/limits for {:?} container",
            desired.name
        ));
    }
    None
}

/// (name, literal value, downward API field) triples; other defaulted
/// sub-fields are ignored.
fn normalized_env(env: Option<&[EnvVar]>) -> Vec<(&str, Option<&str>, Option<&str>)> {
    env.unwrap_or_default()
        .iter()
        .map(|e| {
            (
                e.name.as_str(),
                e.value.as_deref(),
                e.value_from
                    .as_ref()
                    .and_then(|v| v.field_ref.as_ref())
                    .map(|f| f.field_path.as_str()),
            )
        })
        .collect()
}

/// Desired annotations must all be present in the current template.
///
/// Extra annotations on the current template (added by other tools) are
/// tolerated, except a stale restart hash.
fn annotations_drift(desired: &BTreeMap<String, String>, current: &BTreeMap<String, String>) -> bool {
    if desired.iter().any(|(k, v)| current.get(k) != Some(v)) {
        return true;
    }
    !desired.contains_key(RESTART_HASH_ANNOTATION) && current.contains_key(RESTART_HASH_ANNOTATION)
}
