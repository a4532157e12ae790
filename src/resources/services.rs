//! Service generation for AIS clusters.
//!
//! Creates:
//! - **Headless Services**: one per role, for stable pod DNS
//! - **Proxy LoadBalancer**: shared external entry point when external LB is enabled
//! - **Target LoadBalancers**: one per target pod, so clients can reach each target directly

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::AIStore;
use crate::resources::common::{
    DaemonRole, headless_service_name, owned_meta, pod_name, proxy_lb_service_name, role_labels,
    target_lb_service_name,
};
use crate::resources::statefulset::role_port;

/// Label the StatefulSet controller puts on every pod.
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

fn http_port(port: i32) -> ServicePort {
    ServicePort {
        name: Some("http".to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the headless Service for a role.
///
/// `publishNotReadyAddresses` lets daemons resolve each other while the
/// cluster is still forming.
pub fn generate_headless_service(cluster: &AIStore, role: DaemonRole) -> Service {
    let labels = role_labels(cluster, role);
    Service {
        metadata: owned_meta(cluster, headless_service_name(cluster, role), labels.clone()),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(labels),
            ports: Some(vec![http_port(role_port(cluster, role))]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the LoadBalancer Service in front of all proxies.
pub fn generate_proxy_lb_service(cluster: &AIStore) -> Service {
    let labels = role_labels(cluster, DaemonRole::Proxy);
    Service {
        metadata: owned_meta(cluster, proxy_lb_service_name(cluster), labels.clone()),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            selector: Some(labels),
            ports: Some(vec![http_port(cluster.proxy_port())]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the LoadBalancer Service for one target pod.
pub fn generate_target_lb_service(cluster: &AIStore, ordinal: i32) -> Service {
    let labels = role_labels(cluster, DaemonRole::Target);
    let mut selector = labels.clone();
    selector.insert(
        POD_NAME_LABEL.to_string(),
        pod_name(cluster, DaemonRole::Target, ordinal),
    );
    Service {
        metadata: owned_meta(cluster, target_lb_service_name(cluster, ordinal), labels),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            selector: Some(selector),
            ports: Some(vec![http_port(cluster.target_port())]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// All LoadBalancer Services for the given target count.
pub fn generate_target_lb_services(cluster: &AIStore, targets: i32) -> Vec<Service> {
    (0..targets)
        .map(|ordinal| generate_target_lb_service(cluster, ordinal))
        .collect()
}
