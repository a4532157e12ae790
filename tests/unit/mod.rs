//! Unit tests for ais-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use ais_operator::crd::AIStore;

fn cluster(spec: serde_json::Value) -> AIStore {
    let mut obj = serde_json::json!({
        "apiVersion": "ais.nvidia.com/v1beta1",
        "kind": "AIStore",
        "metadata": {"name": "ais", "namespace": "ais", "uid": "uid-1"},
        "spec": {"nodeImage": "aistorage/aisnode:v3.28", "initImage": "aistorage/ais-init:v3.28"}
    });
    if let (Some(dst), Some(src)) = (obj["spec"].as_object_mut(), spec.as_object()) {
        dst.extend(src.clone());
    }
    serde_json::from_value(obj).unwrap()
}

mod crd_tests {
    use super::cluster;
    use ais_operator::crd::{
        AUTOSCALE_SIZE, ClusterState, Condition, ConditionType, DEFAULT_PROXY_PORT,
        DEFAULT_TARGET_PORT,
    };
    use serde_json::json;

    #[test]
    fn test_state_display() {
        assert_eq!(ClusterState::Uninitialized.to_string(), "");
        assert_eq!(ClusterState::Ready.to_string(), "Ready");
        assert_eq!(
            ClusterState::PendingLoadBalancerService.to_string(),
            "PendingLoadBalancerService"
        );
        assert_eq!(ClusterState::HostCleanup.to_string(), "HostCleanup");
    }

    #[test]
    fn test_state_serializes_like_display() {
        for state in ClusterState::ALL {
            assert_eq!(serde_json::to_value(state).unwrap(), json!(state.to_string()));
        }
    }

    #[test]
    fn test_state_default() {
        assert_eq!(ClusterState::default(), ClusterState::Uninitialized);
        assert_eq!(cluster(json!({})).state(), ClusterState::Uninitialized);
    }

    #[test]
    fn test_state_groups_are_disjoint() {
        for state in ClusterState::ALL {
            let groups = [state.is_teardown(), state.is_pre_created(), state.is_steady()];
            assert!(groups.iter().filter(|g| **g).count() <= 1, "{state:?}");
        }
        assert!(!ClusterState::Shutdown.is_steady());
        assert!(!ClusterState::ShuttingDown.is_teardown());
    }

    #[test]
    fn test_role_sizes_fall_back_to_size() {
        let c = cluster(json!({"size": 3, "targetSpec": {"size": 5}}));
        assert_eq!(c.proxy_size(), 3);
        assert_eq!(c.target_size(), 5);

        let c = cluster(json!({}));
        assert_eq!(c.proxy_size(), 1);
        assert_eq!(c.target_size(), 1);

        let c = cluster(json!({"size": AUTOSCALE_SIZE}));
        assert_eq!(c.proxy_size(), AUTOSCALE_SIZE);
    }

    #[test]
    fn test_defaults() {
        let c = cluster(json!({}));
        assert_eq!(c.proxy_port(), DEFAULT_PROXY_PORT);
        assert_eq!(c.target_port(), DEFAULT_TARGET_PORT);
        assert_eq!(c.cluster_domain(), "cluster.local");
        assert_eq!(c.spec.hostpath_prefix, "/etc/ais");
        assert!(c.uses_hostpath_state());
        assert!(!c.should_cleanup_metadata());
        assert!(!c.should_cleanup_data());
        assert!(!c.use_https());
        assert!(!c.spec.enable_external_lb);
    }

    #[test]
    fn test_external_lb_field_name() {
        let c = cluster(json!({"enableExternalLB": true}));
        assert!(c.spec.enable_external_lb);
    }

    #[test]
    fn test_public_api_mode() {
        assert!(cluster(json!({"apiMode": "public"})).uses_public_api());
        assert!(!cluster(json!({"apiMode": "internal"})).uses_public_api());
    }

    #[test]
    fn test_condition_new() {
        let condition = Condition::new(ConditionType::Ready, true, "Ready", "Cluster ready", Some(2));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert!(condition.is_true());
        assert_eq!(condition.observed_generation, Some(2));

        let condition = Condition::new(ConditionType::ReadyRebalance, false, "Scaling", "", None);
        assert_eq!(condition.r#type, "ReadyRebalance");
        assert!(!condition.is_true());
    }
}

mod state_machine_tests {
    use ais_operator::controller::cluster_state_machine::{
        ClusterEvent, ClusterStateMachine, TransitionContext, TransitionResult, determine_event,
    };
    use ais_operator::crd::ClusterState;

    #[test]
    fn test_creation_path() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new().with_pass_complete(true);
        let path = [
            (ClusterEvent::Initialize, ClusterState::Initialized),
            (ClusterEvent::Bootstrapped, ClusterState::Created),
            (ClusterEvent::PassCompleted, ClusterState::Ready),
        ];
        let mut state = ClusterState::Uninitialized;
        for (event, expected) in path {
            match sm.transition(&state, event, &ctx) {
                TransitionResult::Success { to, .. } => state = to,
                other => panic!("{event} from {state:?}: {other:?}"),
            }
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_ready_needs_complete_pass() {
        let sm = ClusterStateMachine::new();
        let result = sm.transition(
            &ClusterState::Upgrading,
            ClusterEvent::PassCompleted,
            &TransitionContext::new(),
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_shutdown_waits_for_replicas() {
        let sm = ClusterStateMachine::new();
        let busy = TransitionContext::new().with_remaining_replicas(2);
        assert!(matches!(
            sm.transition(&ClusterState::ShuttingDown, ClusterEvent::ShutdownComplete, &busy),
            TransitionResult::GuardFailed { .. }
        ));
        let idle = TransitionContext::new();
        assert!(matches!(
            sm.transition(&ClusterState::ShuttingDown, ClusterEvent::ShutdownComplete, &idle),
            TransitionResult::Success { to: ClusterState::Shutdown, .. }
        ));
    }

    #[test]
    fn test_resume_restarts_bootstrap() {
        let sm = ClusterStateMachine::new();
        assert_eq!(
            sm.target(&ClusterState::Shutdown, &ClusterEvent::Resumed),
            Some(ClusterState::Initialized)
        );
        assert_eq!(
            sm.target(&ClusterState::ShuttingDown, &ClusterEvent::Resumed),
            Some(ClusterState::Initialized)
        );
    }

    #[test]
    fn test_host_cleanup_guard() {
        let sm = ClusterStateMachine::new();
        let from = ClusterState::CleaningResources;
        let event = ClusterEvent::HostCleanupRequired;

        let no_wipe = TransitionContext::new().with_recorded_nodes(3);
        assert!(matches!(
            sm.transition(&from, event, &no_wipe),
            TransitionResult::GuardFailed { .. }
        ));
        let no_nodes = TransitionContext::new().with_wipe_host_state(true);
        assert!(matches!(
            sm.transition(&from, event, &no_nodes),
            TransitionResult::GuardFailed { .. }
        ));
        let ctx = TransitionContext::new()
            .with_wipe_host_state(true)
            .with_recorded_nodes(3);
        assert!(ctx.needs_host_cleanup());
        assert!(matches!(
            sm.transition(&from, event, &ctx),
            TransitionResult::Success { to: ClusterState::HostCleanup, .. }
        ));
    }

    #[test]
    fn test_deletion_from_any_live_state() {
        let sm = ClusterStateMachine::new();
        for state in ClusterState::ALL {
            let expected = (!state.is_teardown()).then_some(ClusterState::Decommissioning);
            assert_eq!(
                sm.target(&state, &ClusterEvent::DeletionRequested),
                expected,
                "{state:?}"
            );
        }
    }

    #[test]
    fn test_determine_event() {
        let ctx = TransitionContext::new();
        assert_eq!(
            determine_event(&ClusterState::Ready, &ctx, true),
            Some(ClusterEvent::DeletionRequested)
        );
        assert_eq!(determine_event(&ClusterState::HostCleanup, &ctx, true), None);
        assert_eq!(
            determine_event(&ClusterState::Uninitialized, &ctx, false),
            Some(ClusterEvent::Initialize)
        );
        let shutdown = TransitionContext::new().with_shutdown_requested(true);
        assert_eq!(
            determine_event(&ClusterState::Ready, &shutdown, false),
            Some(ClusterEvent::ShutdownRequested)
        );
        assert_eq!(
            determine_event(&ClusterState::Shutdown, &ctx, false),
            Some(ClusterEvent::Resumed)
        );
    }
}

mod resource_tests {
    use super::cluster;
    use ais_operator::resources::DaemonRole;
    use ais_operator::resources::common::{
        pod_name, pod_ordinal, proxy_lb_service_name, role_labels, target_lb_service_name,
    };
    use ais_operator::resources::config::{proxy_service_url, spec_rebalance_enabled};
    use ais_operator::resources::job::{cleanup_job_prefix, generate_cleanup_job};
    use ais_operator::resources::statefulset::{generate_statefulset, mount_volume_name};
    use serde_json::json;

    #[test]
    fn test_names() {
        let c = cluster(json!({}));
        assert_eq!(pod_name(&c, DaemonRole::Target, 4), "ais-target-4");
        assert_eq!(proxy_lb_service_name(&c), "ais-proxy-lb");
        assert_eq!(target_lb_service_name(&c, 2), "ais-target-2");
        assert_eq!(pod_ordinal("ais-target-12"), Some(12));
        assert_eq!(pod_ordinal("ais-target"), None);
        assert_eq!(mount_volume_name("/ais/disk1"), "ais-disk1");
    }

    #[test]
    fn test_proxy_service_url() {
        assert_eq!(
            proxy_service_url(&cluster(json!({}))),
            "http://ais-proxy.ais.svc.cluster.local:51080"
        );
        assert_eq!(
            proxy_service_url(&cluster(json!({"clusterDomain": "k8s.example"}))),
            "http://ais-proxy.ais.svc.k8s.example:51080"
        );
    }

    #[test]
    fn test_rebalance_defaults_on() {
        assert!(spec_rebalance_enabled(&cluster(json!({}))));
        assert!(!spec_rebalance_enabled(&cluster(
            json!({"configToUpdate": {"rebalance": {"enabled": false}}})
        )));
    }

    #[test]
    fn test_statefulset_invariants() {
        let c = cluster(json!({}));
        for role in [DaemonRole::Proxy, DaemonRole::Target] {
            let sts = generate_statefulset(&c, role, 3);
            let spec = sts.spec.unwrap();
            assert_eq!(spec.replicas, Some(3));
            assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));
            let labels = spec.template.metadata.unwrap().labels.unwrap();
            for (k, v) in role_labels(&c, role) {
                assert_eq!(labels.get(&k), Some(&v));
            }
            let owners = sts.metadata.owner_references.unwrap();
            assert_eq!(owners[0].uid, "uid-1");
        }
    }

    #[test]
    fn test_cleanup_job_per_node() {
        let c = cluster(json!({}));
        let job = generate_cleanup_job(&c, "worker-1");
        assert_eq!(job.metadata.generate_name.as_deref(), Some("cleanup-worker-1-"));
        assert_eq!(cleanup_job_prefix("worker-1"), "cleanup-worker-1-");
        assert!(job.metadata.name.is_none());
        assert_eq!(job.metadata.namespace.as_deref(), Some("ais"));
    }

    #[test]
    fn test_cleanup_job_prefix_fits_long_node_names() {
        let base = "ip-10-0-112-34.us-west-2.compute.internal.example-cluster-pool";
        let a = cleanup_job_prefix(&format!("{base}-a"));
        let b = cleanup_job_prefix(&format!("{base}-b"));
        for prefix in [&a, &b] {
            assert!(prefix.len() + 5 <= 63, "{prefix}");
            assert!(prefix.starts_with("cleanup-ip-10-0-112-34-us-west-2-"));
            assert!(prefix.ends_with('-') && !prefix.ends_with("--"));
            assert!(!prefix.contains('.'));
        }
        assert_ne!(a, b);
        assert_eq!(cleanup_job_prefix(&format!("{base}-a")), a);
    }
}

mod cluster_map_tests {
    use std::collections::BTreeMap;

    use ais_operator::client::Snode;
    use ais_operator::client::cluster_api::{FLAG_DECOMMISSION, NetInfo, find_node_by_pod};

    fn node(id: &str, host: &str) -> (String, Snode) {
        let net = NetInfo {
            node_ip_addr: host.to_string(),
            daemon_port: "51081".to_string(),
            direct_url: format!("http://{host}:51081"),
        };
        (
            id.to_string(),
            Snode {
                daemon_id: id.to_string(),
                daemon_type: "target".to_string(),
                public_net: net.clone(),
                intra_control_net: net,
                flags: 0,
            },
        )
    }

    #[test]
    fn test_find_node_by_pod_exact_prefix() {
        let nodes: BTreeMap<String, Snode> = [
            node("t1", "ais-target-1.ais-target.ais.svc.cluster.local"),
            node("t10", "ais-target-10.ais-target.ais.svc.cluster.local"),
        ]
        .into_iter()
        .collect();

        assert_eq!(find_node_by_pod(&nodes, "ais-target-1").unwrap().daemon_id, "t1");
        assert_eq!(find_node_by_pod(&nodes, "ais-target-10").unwrap().daemon_id, "t10");
        assert!(find_node_by_pod(&nodes, "ais-target-2").is_none());
    }

    #[test]
    fn test_decommission_flag() {
        let (_, mut n) = node("t1", "ais-target-1");
        assert!(n.is_active());
        n.flags |= FLAG_DECOMMISSION;
        assert!(n.is_decommissioning());
        assert!(!n.is_active());
    }
}
