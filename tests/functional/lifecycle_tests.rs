//! Creation, steady state, graceful shutdown and LoadBalancer bootstrap.

use std::sync::atomic::Ordering;

use ais_operator::controller::common::FINALIZER;
use ais_operator::controller::step::RESYNC_INTERVAL;
use ais_operator::crd::{CONFIG_HASH_ANNOTATION, ClusterState, ConditionType};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use serde_json::json;

use crate::harness::{Harness, PROXY_STS, TARGET_STS, base_spec};

// ============================================================================
// Creation
// ============================================================================

/// A new AIStore goes Initialized -> Created -> Ready.
#[tokio::test]
async fn test_create_reaches_ready() {
    let h = Harness::ready(base_spec()).await;

    assert_eq!(h.states(), vec!["Initialized", "Created", "Ready"]);
    assert_eq!(h.replicas(PROXY_STS), Some(3));
    assert_eq!(h.replicas(TARGET_STS), Some(3));

    let cluster = h.cluster().unwrap();
    assert!(cluster.finalizers().iter().any(|f| f == FINALIZER));
    assert!(cluster.is_condition_true(ConditionType::Created));
    assert!(cluster.is_condition_true(ConditionType::Ready));
    assert!(cluster.annotations().contains_key(CONFIG_HASH_ANNOTATION));

    let status = cluster.status.unwrap();
    assert_eq!(status.cluster_id.as_deref(), Some("Xa3bd1Ztp"));
    assert_eq!(
        status.intra_cluster_url.as_deref(),
        Some("http://ais-proxy.ais.svc.cluster.local:51080")
    );
}

/// The first proxy comes up alone, then the rest, then targets.
#[tokio::test]
async fn test_bootstrap_order() {
    let h = Harness::ready(base_spec()).await;

    let create_proxy = h.position("create StatefulSet ais-proxy").unwrap();
    let scale_proxy = h.position("scale ais-proxy 3").unwrap();
    let create_target = h.position("create StatefulSet ais-target").unwrap();
    assert!(create_proxy < scale_proxy);
    assert!(scale_proxy < create_target);

    let prerequisites = [
        "create ServiceAccount ais-sa",
        "create Role ais-sa",
        "create RoleBinding ais-sa",
        "create ClusterRole ais-ais-cr",
        "create ClusterRoleBinding ais-ais-cr",
        "create ConfigMap ais-statsd",
        "create ConfigMap ais-config",
        "create Service ais-proxy",
        "create Service ais-target",
    ];
    for entry in prerequisites {
        let pos = h
            .position(entry)
            .unwrap_or_else(|| panic!("missing {entry}: {:?}", h.journal()));
        assert!(pos < create_proxy, "{entry} after proxy StatefulSet");
    }
}

/// Config is pushed once with rebalance on, after the daemons are up.
#[tokio::test]
async fn test_config_pushed_when_ready() {
    let h = Harness::ready(base_spec()).await;

    let pushes: Vec<String> = h
        .journal()
        .into_iter()
        .filter(|e| e.starts_with("set-config"))
        .collect();
    assert_eq!(pushes, vec!["set-config rebalance=true"]);
    assert!(h.position("set-config rebalance=true") > h.position("create StatefulSet ais-target"));
}

/// A Ready cluster with nothing to change writes nothing.
#[tokio::test]
async fn test_reconcile_is_idempotent_when_ready() {
    let h = Harness::ready(base_spec()).await;
    h.clear_journal();

    for _ in 0..3 {
        let action = h.reconcile().await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
        h.settle();
    }

    assert!(h.journal().is_empty(), "unexpected writes: {:?}", h.journal());
    assert_eq!(h.state(), Some(ClusterState::Ready));
}

/// Changing rebalance in the spec re-pushes config without a rollout.
#[tokio::test]
async fn test_config_change_is_pushed() {
    let h = Harness::ready(base_spec()).await;
    h.clear_journal();

    h.update_spec(json!({"configToUpdate": {"rebalance": {"enabled": false}}}));
    h.run_until_state(ClusterState::Ready, 5).await;
    h.reconcile().await.unwrap();

    assert!(h.journal().contains(&"set-config rebalance=false".to_string()));
    assert!(!h.journal().iter().any(|e| e.starts_with("patch StatefulSet")));
    assert_eq!(h.state(), Some(ClusterState::Ready));
}

// ============================================================================
// Shutdown
// ============================================================================

/// Shutdown fences rebalance, stops proxies, then targets.
#[tokio::test]
async fn test_shutdown_and_resume() {
    let h = Harness::ready(base_spec()).await;

    h.update_spec(json!({"shutdownCluster": true}));
    assert!(h.run_until_state(ClusterState::Shutdown, 20).await);

    let fence = h.position("set-config rebalance=false").unwrap();
    let stop = h.position("shutdown-cluster").unwrap();
    let proxies = h.position("scale ais-proxy 0").unwrap();
    let targets = h.position("scale ais-target 0").unwrap();
    assert!(fence < stop);
    assert!(stop < proxies);
    assert!(proxies < targets);

    assert!(h.pod_names(PROXY_STS).is_empty());
    assert!(h.pod_names(TARGET_STS).is_empty());
    assert!(h.states().ends_with(&["ShuttingDown".to_string(), "Shutdown".to_string()]));

    // Shutdown is stable.
    h.clear_journal();
    h.reconcile().await.unwrap();
    assert!(h.journal().is_empty());

    h.update_spec(json!({"shutdownCluster": false}));
    assert!(h.run_until_state(ClusterState::Ready, 20).await);
    assert_eq!(h.replicas(PROXY_STS), Some(3));
    assert_eq!(h.replicas(TARGET_STS), Some(3));
    assert!(h.states().ends_with(&[
        "Initialized".to_string(),
        "Created".to_string(),
        "Ready".to_string()
    ]));
    assert!(h.position("set-config rebalance=true").is_some());
}

// ============================================================================
// External LoadBalancers
// ============================================================================

fn lb_spec() -> serde_json::Value {
    let mut spec = base_spec();
    spec["enableExternalLB"] = json!(true);
    spec
}

/// Without IPs the cluster parks in the LoadBalancer states.
#[tokio::test]
async fn test_lb_bootstrap_waits_for_ips() {
    let h = Harness::new(lb_spec());
    h.assign_lb_ips.store(false, Ordering::SeqCst);

    assert!(
        h.run_until_state(ClusterState::PendingLoadBalancerService, 5)
            .await
    );
    for _ in 0..3 {
        h.reconcile().await.unwrap();
        h.settle();
    }
    assert_eq!(h.state(), Some(ClusterState::PendingLoadBalancerService));
    assert_eq!(
        h.states(),
        vec![
            "Initialized",
            "InitializingLoadBalancerService",
            "PendingLoadBalancerService"
        ]
    );
    assert!(h.has_event("Normal", "Waiting"));
    assert!(h.statefulset(PROXY_STS).is_none());
    assert!(h.position("create Service ais-proxy-lb").is_some());
    for ordinal in 0..3 {
        assert!(h.position(&format!("create Service ais-target-{ordinal}")).is_some());
    }

    h.assign_lb_ips.store(true, Ordering::SeqCst);
    assert!(h.run_until_state(ClusterState::Ready, 20).await);
    assert!(h.states().ends_with(&["Created".to_string(), "Ready".to_string()]));
}

/// A new target gets its LoadBalancer and IP before the pod is added.
#[tokio::test]
async fn test_lb_target_scale_up_waits_for_service_ip() {
    let h = Harness::ready(lb_spec()).await;
    h.assign_lb_ips.store(false, Ordering::SeqCst);

    h.update_spec(json!({"targetSpec": {"size": 4}}));
    for _ in 0..3 {
        h.reconcile().await.unwrap();
        h.settle();
    }
    assert!(h.position("create Service ais-target-3").is_some());
    assert!(h.position("scale ais-target 4").is_none());
    assert_eq!(h.state(), Some(ClusterState::Scaling));

    h.assign_lb_ips.store(true, Ordering::SeqCst);
    assert!(
        h.run_until(10, |h| h.state() == Some(ClusterState::Ready)
            && h.replicas(TARGET_STS) == Some(4))
            .await
    );
    assert!(h.position("create Service ais-target-3") < h.position("scale ais-target 4"));
}

/// Turning on external LBs while adding proxies holds the new proxies back
/// until the shared proxy LoadBalancer has an IP.
#[tokio::test]
async fn test_lb_proxy_scale_up_waits_for_service_ip() {
    let h = Harness::ready(base_spec()).await;
    h.assign_lb_ips.store(false, Ordering::SeqCst);
    h.clear_journal();

    h.update_spec(json!({"enableExternalLB": true, "proxySpec": {"size": 4}}));
    for _ in 0..4 {
        let _ = h.reconcile().await;
        h.settle();
    }
    assert!(h.position("create Service ais-proxy-lb").is_some());
    assert!(h.position("scale ais-proxy 4").is_none(), "{:?}", h.journal());
    assert_eq!(h.replicas(PROXY_STS), Some(3));

    h.assign_lb_ips.store(true, Ordering::SeqCst);
    assert!(
        h.run_until(60, |h| h.state() == Some(ClusterState::Ready)
            && h.replicas(PROXY_STS) == Some(4))
            .await
    );
    assert!(h.position("create Service ais-proxy-lb") < h.position("scale ais-proxy 4"));
}

/// Scaling down with LoadBalancers removes the per-target services.
#[tokio::test]
async fn test_lb_target_scale_down_removes_service() {
    let h = Harness::ready(lb_spec()).await;

    h.update_spec(json!({"targetSpec": {"size": 2}}));
    assert!(
        h.run_until(10, |h| h.state() == Some(ClusterState::Ready)
            && h.replicas(TARGET_STS) == Some(2))
            .await
    );
    assert!(h.position("scale ais-target 2") < h.position("delete Service ais-target-2"));
    assert!(h.resources.get_value("Service", "ais", "ais-target-1").is_some());
}

// ============================================================================
// Optional objects
// ============================================================================

/// Admin client and PDB follow the spec both ways.
#[tokio::test]
async fn test_optional_objects_follow_spec() {
    let mut spec = base_spec();
    spec["adminClient"] = json!({});
    spec["pdb"] = json!({"enabled": true});
    let h = Harness::ready(spec).await;

    assert!(h.resources.get_value("Deployment", "ais", "ais-client").is_some());
    assert!(
        h.resources
            .get_value("PodDisruptionBudget", "ais", "ais-target")
            .is_some()
    );

    h.update_spec(json!({"adminClient": null, "pdb": null}));
    h.reconcile().await.unwrap();
    assert!(h.resources.get_value("Deployment", "ais", "ais-client").is_none());
    assert!(
        h.resources
            .get_value("PodDisruptionBudget", "ais", "ais-target")
            .is_none()
    );
}

/// Reconcile metrics and the per-cluster state gauge are recorded.
#[tokio::test]
async fn test_metrics_recorded() {
    let h = Harness::ready(base_spec()).await;

    let text = h.health.metrics.encode();
    assert!(text.contains("aisoperator_reconciliations"));
    assert!(text.contains("aisoperator_cluster_replicas_desired"));
    assert!(text.contains("aisoperator_clusters_total"));
}
