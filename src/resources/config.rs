//! Runtime configuration documents.
//!
//! The cluster-wide config is the user's `configToUpdate` overlay merged with
//! values the operator derives from the rest of the spec. The same document
//! seeds the global ConfigMap at bootstrap and is pushed to the live cluster
//! by the config synchronizer.

use serde_json::{Map, Value, json};

use crate::controller::error::Result;
use crate::crd::AIStore;
use crate::resources::common::{DaemonRole, statefulset_name};
use crate::resources::statefulset::{CERTS_DIR, STATE_DIR, role_port};

/// Spec value for `rebalance.enabled` (AIS defaults to enabled).
pub fn spec_rebalance_enabled(cluster: &AIStore) -> bool {
    cluster
        .spec
        .config_to_update
        .as_ref()
        .and_then(|c| c.rebalance.as_ref())
        .and_then(|r| r.enabled)
        .unwrap_or(true)
}

/// URL of the proxy service as seen from inside the cluster.
pub fn proxy_service_url(cluster: &AIStore) -> String {
    let scheme = if cluster.use_https() { "https" } else { "http" };
    format!(
        "{scheme}://{}.{}.svc.{}:{}",
        statefulset_name(cluster, DaemonRole::Proxy),
        cluster.namespace_or_default(),
        cluster.cluster_domain(),
        cluster.proxy_port()
    )
}

/// Recursively merge `overlay` into `base`; overlay scalars win.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                merge(base.entry(k).or_insert(Value::Null), v);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Build the cluster config to set.
///
/// `rebalance_enabled` is the effective flag. Callers gate the spec value on
/// the ReadyRebalance condition.
pub fn generate_cluster_config(cluster: &AIStore, rebalance_enabled: bool) -> Result<Value> {
    let mut config = json!({});

    if !cluster.spec.cloud_secrets.is_empty() {
        let backends: Map<String, Value> = cluster
            .spec
            .cloud_secrets
            .keys()
            .map(|provider| (provider.clone(), json!({})))
            .collect();
        config["backend"] = Value::Object(backends);
    }

    let mut http = json!({"use_https": cluster.use_https()});
    if cluster.use_https() {
        http["server_crt"] = json!(format!("{CERTS_DIR}/tls.crt"));
        http["server_key"] = json!(format!("{CERTS_DIR}/tls.key"));
        http["skip_verify"] = json!(false);
    }
    config["net"] = json!({"http": http});

    let proxy_url = proxy_service_url(cluster);
    config["proxy"] = json!({
        "primary_url": proxy_url,
        "original_url": proxy_url,
        "discovery_url": proxy_url,
    });

    if let Some(auth) = &cluster.spec.auth {
        let mut auth_conf = json!({"enabled": true});
        if let Some(oidc) = &auth.oidc {
            auth_conf["oidc"] = json!({
                "issuer_url": oidc.issuer_url,
                "audiences": oidc.audiences,
            });
        }
        config["auth"] = auth_conf;
    }

    if let Some(overlay) = &cluster.spec.config_to_update {
        merge(&mut config, serde_json::to_value(overlay)?);
    }

    config["rebalance"]["enabled"] = json!(rebalance_enabled);
    Ok(config)
}

/// Local config template rendered by the init container.
///
/// Hostnames are placeholders filled in from the pod environment.
pub fn generate_local_config(cluster: &AIStore, role: DaemonRole) -> Value {
    let mut local = json!({
        "confdir": STATE_DIR,
        "log_dir": "/var/log/ais",
        "host_net": {
            "hostname": "${AIS_PUBLIC_HOSTNAME}",
            "hostname_intra_control": "${AIS_INTRA_HOSTNAME}",
            "hostname_intra_data": "${AIS_DATA_HOSTNAME}",
            "port": role_port(cluster, role).to_string(),
        },
    });
    if role == DaemonRole::Target {
        let paths: Map<String, Value> = cluster
            .spec
            .target_spec
            .mounts
            .iter()
            .map(|m| (m.path.clone(), json!("")))
            .collect();
        local["fspaths"] = Value::Object(paths);
    }
    local
}
