//! Per-cluster cache of cluster API clients.
//!
//! Building a client may involve an AuthN login and a Kubernetes lookup for
//! the endpoint, so clients are cached per AIStore and rebuilt only when the
//! connection parameters drift or the token is about to expire.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::ResourceExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::client::authn::{AuthNClient, AuthNConfig, TokenInfo};
use crate::client::cluster_api::{ClusterApi, ClusterApiConfig, HttpClusterApi};
use crate::client::resources::ResourceClient;
use crate::controller::error::{Error, Result};
use crate::crd::AIStore;
use crate::resources::common::{DaemonRole, proxy_lb_service_name, role_selector, statefulset_name};

/// Hands out a cluster API client for an AIStore.
#[async_trait]
pub trait ClusterApiProvider: Send + Sync {
    /// Cached or freshly built client for `cluster`.
    async fn client_for(&self, cluster: &AIStore) -> Result<Arc<dyn ClusterApi>>;

    /// Drop the cached client, e.g. once the cluster is gone.
    async fn invalidate(&self, cluster: &AIStore);
}

/// Parameters a cached client was built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    pub api_mode: Option<String>,
    pub url: String,
    pub auth: bool,
}

struct Cached {
    params: ConnectionParams,
    token: Option<TokenInfo>,
    client: Arc<dyn ClusterApi>,
}

impl Cached {
    fn is_valid(&self, cluster: &AIStore, url: &str, now: i64) -> bool {
        self.params.api_mode == cluster.spec.api_mode
            && self.params.url == url
            && self.params.auth == cluster.auth_enabled()
            && !self.token.as_ref().is_some_and(|t| t.is_expiring(now))
    }
}

/// Default [`ClusterApiProvider`] building [`HttpClusterApi`] clients.
pub struct ClientRegistry<R> {
    resources: Arc<R>,
    authn: Option<AuthNConfig>,
    cache: RwLock<HashMap<String, Cached>>,
}

fn cache_key(cluster: &AIStore) -> String {
    format!("{}/{}", cluster.namespace_or_default(), cluster.name_any())
}

impl<R: ResourceClient> ClientRegistry<R> {
    /// `authn` is `None` when AuthN logins are disabled for the operator.
    pub fn new(resources: Arc<R>, authn: Option<AuthNConfig>) -> Self {
        Self {
            resources,
            authn,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// API URL for the cluster according to its API mode.
    pub async fn endpoint(&self, cluster: &AIStore) -> Result<String> {
        let namespace = cluster.namespace_or_default();
        let scheme = if cluster.use_https() { "https" } else { "http" };
        let port = cluster.proxy_port();

        let host = if cluster.uses_public_api() {
            let pods: Vec<Pod> = self
                .resources
                .list(&namespace, &role_selector(cluster, DaemonRole::Proxy))
                .await?;
            pods.iter()
                .filter(|p| crate::controller::daemon::is_pod_ready(p))
                .find_map(|p| p.status.as_ref().and_then(|s| s.host_ip.clone()))
                .ok_or_else(|| Error::Transient("no ready proxy pod with a host IP".to_string()))?
        } else if cluster.spec.enable_external_lb {
            let name = proxy_lb_service_name(cluster);
            let svc: Option<Service> = self.resources.get(&namespace, &name).await?;
            svc.as_ref()
                .and_then(crate::controller::daemon::ingress_ip)
                .ok_or_else(|| {
                    Error::Transient(format!("proxy load balancer {name} has no ingress IP"))
                })?
        } else {
            format!(
                "{}.{}.svc.{}",
                statefulset_name(cluster, DaemonRole::Proxy),
                namespace,
                cluster.cluster_domain()
            )
        };
        Ok(format!("{scheme}://{host}:{port}"))
    }

    async fn ca_pem(&self, cluster: &AIStore) -> Result<Option<Vec<u8>>> {
        let Some(secret_name) = cluster.spec.tls.as_ref().and_then(|t| t.secret_name.as_ref())
        else {
            return Ok(None);
        };
        let secret: Option<Secret> = self
            .resources
            .get(&cluster.namespace_or_default(), secret_name)
            .await?;
        Ok(secret
            .and_then(|s| s.data)
            .and_then(|mut d| d.remove("ca.crt"))
            .map(|b| b.0))
    }

    async fn login(&self, cluster: &AIStore) -> Result<Option<TokenInfo>> {
        if !cluster.auth_enabled() {
            return Ok(None);
        }
        let Some(config) = &self.authn else {
            return Ok(None);
        };
        let client = AuthNClient::new(config.clone())?;
        Ok(Some(client.login().await?))
    }
}

#[async_trait]
impl<R: ResourceClient + 'static> ClusterApiProvider for ClientRegistry<R> {
    async fn client_for(&self, cluster: &AIStore) -> Result<Arc<dyn ClusterApi>> {
        let key = cache_key(cluster);
        let url = self.endpoint(cluster).await?;
        let now = jiff::Timestamp::now().as_second();

        if let Some(cached) = self.cache.read().await.get(&key) {
            if cached.is_valid(cluster, &url, now) {
                return Ok(cached.client.clone());
            }
            debug!(cluster = %key, "cached cluster client is stale");
        }

        let token = self.login(cluster).await?;
        let client = HttpClusterApi::new(ClusterApiConfig {
            url: url.clone(),
            token: token.as_ref().map(|t| t.token.clone()),
            ca_pem: self.ca_pem(cluster).await?,
        })?;
        info!(cluster = %key, url = %url, authn = token.is_some(), "created cluster API client");

        let client: Arc<dyn ClusterApi> = Arc::new(client);
        self.cache.write().await.insert(
            key,
            Cached {
                params: ConnectionParams {
                    api_mode: cluster.spec.api_mode.clone(),
                    url,
                    auth: cluster.auth_enabled(),
                },
                token,
                client: client.clone(),
            },
        );
        Ok(client)
    }

    async fn invalidate(&self, cluster: &AIStore) {
        self.cache.write().await.remove(&cache_key(cluster));
    }
}
