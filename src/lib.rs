//! ais-operator library crate
//!
//! This module exports the controller, CRD definitions, clients and resource
//! generators of the AIStore operator.

pub mod client;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use client::authn::AuthNConfig;
use client::{ClientRegistry, KubeResourceClient};
use controller::{context::Context, reconciler::reconcile};
use crd::AIStore;

/// Environment variable disabling AuthN logins for clusters with `spec.auth`.
pub const SKIP_AUTHN_VAR: &str = "OPERATOR_SKIP_AUTHN";

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type.
///
/// The stream is reflector-backed, retries with backoff, yields applied
/// objects and drops status-only updates via the generation predicate.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// AuthN settings unless disabled through [`SKIP_AUTHN_VAR`].
fn authn_config() -> Option<AuthNConfig> {
    let skip = std::env::var(SKIP_AUTHN_VAR)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);
    if skip {
        info!("AuthN logins disabled");
        return None;
    }
    Some(AuthNConfig::from_env())
}

/// Run the AIStore controller until its stream ends.
///
/// With `namespace` set only that namespace is watched; otherwise the
/// operator manages AIStores cluster-wide.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    info!(scope = namespace.unwrap_or("cluster-wide"), "Starting AIStore controller");

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let resources = Arc::new(KubeResourceClient::new(client.clone()));
    let registry = Arc::new(ClientRegistry::new(resources.clone(), authn_config()));
    let ctx = Arc::new(Context::new(resources, registry, health_state));

    let clusters: Api<AIStore> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);
    let jobs: Api<Job> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();
    let (reader, cluster_stream) = create_filtered_stream(clusters, watcher_config.clone());

    // StatefulSet status (ready/updated replicas, revisions) drives the
    // rollout steps, so it gets a full watcher; the rest only need to wake
    // the owner up.
    Controller::for_stream(cluster_stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(jobs, watcher_config).touched_objects())
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events for owned objects can outlive their AIStore.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    error!("Controller stream ended unexpectedly");
}
