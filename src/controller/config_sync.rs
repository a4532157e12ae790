//! Runtime config synchronization.
//!
//! The desired config is hashed and the hash stored in an annotation on the
//! AIStore; pushes happen only when the hash moves (or when forced). The
//! annotation is written after a successful push, so an interrupted pass
//! repeats a harmless push next time.

use kube::ResourceExt;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::client::{ClusterApi, ClusterApiProvider, ResourceClient};
use crate::controller::error::Result;
use crate::controller::reconciler::{Pass, Reconciler};
use crate::crd::{CONFIG_HASH_ANNOTATION, ConditionType};
use crate::resources::config::{generate_cluster_config, spec_rebalance_enabled};

/// Hex SHA-256 of the config's JSON encoding.
pub fn config_hash(config: &Value) -> Result<String> {
    let encoded = serde_json::to_vec(config)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

impl<R, P> Reconciler<R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    /// Push the desired runtime config if it changed. Returns true on push.
    pub(crate) async fn sync_config(
        &self,
        pass: &mut Pass,
        api: &dyn ClusterApi,
        force: bool,
    ) -> Result<bool> {
        let rebalance = pass.condition_true(ConditionType::ReadyRebalance)
            && spec_rebalance_enabled(&pass.cluster);
        let config = generate_cluster_config(&pass.cluster, rebalance)?;
        let hash = config_hash(&config)?;

        if !force && pass.cluster.config_hash() == Some(hash.as_str()) {
            debug!(name = %pass.cluster.name_any(), "Cluster config up to date");
            return Ok(false);
        }

        info!(name = %pass.cluster.name_any(), rebalance, force, "Pushing cluster config");
        api.set_cluster_config(&config, false).await?;

        let patch = json!({
            "metadata": {
                "annotations": { CONFIG_HASH_ANNOTATION: hash }
            }
        });
        pass.cluster = self.resources.patch_cluster(&pass.cluster, &patch).await?;
        Ok(true)
    }

    /// Turn rebalance off in the live cluster before disruptive work.
    pub(crate) async fn disable_rebalance(
        &self,
        pass: &mut Pass,
        api: &dyn ClusterApi,
    ) -> Result<()> {
        pass.set_condition(
            ConditionType::ReadyRebalance,
            false,
            "RebalanceDisabled",
            "Rebalance disabled for a disruptive operation",
        );
        self.sync_config(pass, api, true).await?;
        Ok(())
    }
}
