//! Shared controller helpers.

use kube::ResourceExt;

use crate::client::ResourceClient;
use crate::controller::error::Error;
use crate::crd::AIStore;

/// Finalizer guarding AIStore deletion until teardown finished.
pub const FINALIZER: &str = "finalize.ais";

pub fn has_finalizer(cluster: &AIStore) -> bool {
    cluster.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer. Returns the updated resource.
pub async fn add_finalizer<R: ResourceClient>(
    client: &R,
    cluster: &AIStore,
) -> Result<AIStore, Error> {
    if has_finalizer(cluster) {
        return Ok(cluster.clone());
    }
    let mut finalizers = cluster.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    client.patch_cluster(cluster, &patch).await
}

/// Remove the finalizer. A resource already gone counts as done.
pub async fn remove_finalizer<R: ResourceClient>(
    client: &R,
    cluster: &AIStore,
) -> Result<(), Error> {
    if !has_finalizer(cluster) {
        return Ok(());
    }
    let finalizers: Vec<String> = cluster
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    match client.patch_cluster(cluster, &patch).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
