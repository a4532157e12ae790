//! Rolling updates: proxy primary failover, target rollouts, drift repair.

use ais_operator::crd::ClusterState;
use serde_json::json;

use crate::harness::{Harness, NS, PROXY_STS, TARGET_STS, base_spec};

const NEW_IMAGE: &str = "aistorage/aisnode:v3.29";

fn pod_image(h: &Harness, pod: &str) -> Option<String> {
    h.resources
        .get_value("Pod", NS, pod)
        .and_then(|p| p["spec"]["containers"][0]["image"].as_str().map(str::to_string))
}

/// Reconcile until Ready, recording the proxy partition after every pass.
async fn roll(h: &Harness, max_passes: usize) -> Vec<i64> {
    let mut partitions = Vec::new();
    for _ in 0..max_passes {
        let _ = h.reconcile().await;
        h.settle();
        partitions.push(h.partition(PROXY_STS));
        if h.state() == Some(ClusterState::Ready) {
            break;
        }
    }
    partitions
}

/// The primary is fenced at ordinal 0 while the others roll, then moves to
/// the highest ordinal before ordinal 0 restarts.
#[tokio::test]
async fn test_proxy_rollout_moves_primary_off_ordinal_zero() {
    let h = Harness::ready(base_spec()).await;
    h.clear_journal();

    h.update_spec(json!({"nodeImage": NEW_IMAGE}));
    let partitions = roll(&h, 20).await;

    assert_eq!(h.state(), Some(ClusterState::Ready));
    assert_eq!(partitions.first(), Some(&1));
    assert_eq!(partitions.last(), Some(&0));
    assert_eq!(h.api.primary().as_deref(), Some("p2"));

    let fence = h.position("set-config rebalance=false").unwrap();
    let handoff = h.position("set-primary p2 force=false").unwrap();
    assert!(fence < handoff);
    assert!(h.states().ends_with(&["Upgrading".to_string(), "Ready".to_string()]));

    for pod in h.pod_names(PROXY_STS).iter().chain(h.pod_names(TARGET_STS).iter()) {
        assert_eq!(pod_image(&h, pod).as_deref(), Some(NEW_IMAGE), "{pod}");
    }
}

/// Targets roll only after proxies finished.
#[tokio::test]
async fn test_targets_roll_after_proxies() {
    let h = Harness::ready(base_spec()).await;
    h.clear_journal();

    h.update_spec(json!({"nodeImage": NEW_IMAGE}));
    roll(&h, 20).await;

    let journal = h.journal();
    let last_proxy_patch = journal
        .iter()
        .rposition(|e| e == "patch StatefulSet ais-proxy")
        .unwrap();
    let target_patch = h.position("patch StatefulSet ais-target").unwrap();
    assert!(last_proxy_patch < target_patch);
}

/// A single proxy has nobody to fail over to and rolls directly.
#[tokio::test]
async fn test_single_proxy_rollout_skips_partition() {
    let mut spec = base_spec();
    spec["size"] = json!(1);
    let h = Harness::ready(spec).await;
    h.clear_journal();

    h.update_spec(json!({"nodeImage": NEW_IMAGE}));
    let partitions = roll(&h, 20).await;

    assert_eq!(h.state(), Some(ClusterState::Ready));
    assert!(partitions.iter().all(|p| *p == 0));
    assert!(!h.journal().iter().any(|e| e.starts_with("set-primary")));
    assert_eq!(pod_image(&h, "ais-proxy-0").as_deref(), Some(NEW_IMAGE));
}

/// A rejected handoff holds the rollout at the partition and backs off.
#[tokio::test]
async fn test_primary_handoff_failure_backs_off() {
    let h = Harness::ready(base_spec()).await;
    h.api.set_fail_set_primary(true);

    h.update_spec(json!({"nodeImage": NEW_IMAGE}));
    for _ in 0..5 {
        let _ = h.reconcile().await;
        h.settle();
    }
    assert_eq!(h.state(), Some(ClusterState::Upgrading));
    assert_eq!(h.partition(PROXY_STS), 1);
    assert!(h.has_event("Warning", "BackOff"));
    assert_eq!(pod_image(&h, "ais-proxy-0").as_deref(), Some("aistorage/aisnode:v3.28"));

    h.api.set_fail_set_primary(false);
    roll(&h, 20).await;
    assert_eq!(h.state(), Some(ClusterState::Ready));
    assert_eq!(h.api.primary().as_deref(), Some("p2"));
    assert_eq!(h.partition(PROXY_STS), 0);
}

/// A second rollout pins the primary back to ordinal 0 first.
#[tokio::test]
async fn test_second_rollout_pins_primary_to_ordinal_zero() {
    let h = Harness::ready(base_spec()).await;
    h.update_spec(json!({"nodeImage": NEW_IMAGE}));
    roll(&h, 20).await;
    assert_eq!(h.api.primary().as_deref(), Some("p2"));
    h.clear_journal();

    h.update_spec(json!({"nodeImage": "aistorage/aisnode:v3.30"}));
    roll(&h, 20).await;

    let pin = h.position("set-primary p0 force=false").unwrap();
    let handoff = h.position("set-primary p2 force=false").unwrap();
    assert!(pin < handoff);
    assert_eq!(h.state(), Some(ClusterState::Ready));
}

/// Labels dropped from the spec disappear from the pod template.
#[tokio::test]
async fn test_removed_template_label_is_dropped() {
    let h = Harness::ready(base_spec()).await;

    h.update_spec(json!({"targetSpec": {"labels": {"team": "storage"}}}));
    roll(&h, 20).await;
    let sts = h.statefulset(TARGET_STS).unwrap();
    assert_eq!(sts["spec"]["template"]["metadata"]["labels"]["team"], json!("storage"));

    h.update_spec(json!({"targetSpec": {"labels": null}}));
    roll(&h, 20).await;
    let sts = h.statefulset(TARGET_STS).unwrap();
    assert!(sts["spec"]["template"]["metadata"]["labels"]["team"].is_null());
    assert_eq!(h.state(), Some(ClusterState::Ready));
}

/// A deleted StatefulSet is recreated at the desired size.
#[tokio::test]
async fn test_deleted_statefulset_is_recreated() {
    let h = Harness::ready(base_spec()).await;
    h.resources.remove_value("StatefulSet", NS, TARGET_STS);
    h.settle();
    h.clear_journal();

    roll(&h, 10).await;

    assert!(h.position("create StatefulSet ais-target").is_some());
    assert_eq!(h.replicas(TARGET_STS), Some(3));
    assert_eq!(h.pod_names(TARGET_STS).len(), 3);
    assert_eq!(h.state(), Some(ClusterState::Ready));
}

/// A user edit to the template is reverted.
#[tokio::test]
async fn test_template_drift_is_reverted() {
    let h = Harness::ready(base_spec()).await;
    h.resources.mutate("StatefulSet", NS, TARGET_STS, |sts| {
        sts["spec"]["template"]["spec"]["containers"][0]["image"] = json!("someone/else:latest");
    });
    h.settle();
    h.clear_journal();

    roll(&h, 10).await;

    assert!(h.position("patch StatefulSet ais-target").is_some());
    assert_eq!(pod_image(&h, "ais-target-0").as_deref(), Some("aistorage/aisnode:v3.28"));
    assert_eq!(h.state(), Some(ClusterState::Ready));
}
