//! ConfigMap generation for AIS clusters.
//!
//! Two ConfigMaps are shared by both roles:
//! - **Global config**: the initial cluster config and per-role local config templates
//! - **StatsD config**: metrics exporter settings

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use crate::controller::error::Result;
use crate::crd::AIStore;
use crate::resources::common::{
    DaemonRole, global_configmap_name, owned_meta, standard_labels, statsd_configmap_name,
};
use crate::resources::config::{generate_cluster_config, generate_local_config, spec_rebalance_enabled};

const STATSD_CONFIG: &str = r#"{"graphiteHost": "", "graphitePort": 2003}"#;

/// Generate the global config ConfigMap.
pub fn generate_global_configmap(cluster: &AIStore) -> Result<ConfigMap> {
    let config = generate_cluster_config(cluster, spec_rebalance_enabled(cluster))?;
    let mut data = BTreeMap::new();
    data.insert("ais.json".to_string(), serde_json::to_string(&config)?);
    for role in [DaemonRole::Proxy, DaemonRole::Target] {
        data.insert(
            format!("ais_local_{role}.json"),
            serde_json::to_string(&generate_local_config(cluster, role))?,
        );
    }

    Ok(ConfigMap {
        metadata: owned_meta(cluster, global_configmap_name(cluster), standard_labels(cluster)),
        data: Some(data),
        ..Default::default()
    })
}

/// Generate the StatsD ConfigMap.
pub fn generate_statsd_configmap(cluster: &AIStore) -> ConfigMap {
    ConfigMap {
        metadata: owned_meta(cluster, statsd_configmap_name(cluster), standard_labels(cluster)),
        data: Some(BTreeMap::from([(
            "statsd.json".to_string(),
            STATSD_CONFIG.to_string(),
        )])),
        ..Default::default()
    }
}
