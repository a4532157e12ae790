//! HTTP client for the managed AIS cluster.
//!
//! The operator only talks to a running cluster through the narrow
//! [`ClusterApi`] trait. [`HttpClusterApi`] implements it over the AIS REST
//! API; tests substitute a recording fake.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

/// User agent sent with every request.
pub const USER_AGENT: &str = "ais-operator";

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Node flag: node is in maintenance.
pub const FLAG_MAINTENANCE: u64 = 1 << 2;

/// Node flag: node is being decommissioned.
pub const FLAG_DECOMMISSION: u64 = 1 << 3;

/// Errors returned by the cluster API.
#[derive(Error, Debug)]
pub enum ClusterApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cluster returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("AuthN error: {0}")]
    AuthN(String),
}

impl ClusterApiError {
    /// Connection-level failure (as opposed to an error answered by the cluster).
    pub fn is_unreachable(&self) -> bool {
        match self {
            ClusterApiError::Unreachable(_) => true,
            ClusterApiError::Http(e) => e.is_connect() || e.is_timeout(),
            ClusterApiError::Status { code, .. } => *code == 503,
            ClusterApiError::AuthN(_) => false,
        }
    }
}

/// Network endpoint of a daemon.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NetInfo {
    #[serde(default)]
    pub node_ip_addr: String,
    #[serde(default)]
    pub daemon_port: String,
    #[serde(default)]
    pub direct_url: String,
}

/// A proxy or target as seen in the cluster map.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Snode {
    pub daemon_id: String,
    #[serde(default)]
    pub daemon_type: String,
    #[serde(default)]
    pub public_net: NetInfo,
    #[serde(default)]
    pub intra_control_net: NetInfo,
    #[serde(default)]
    pub flags: u64,
}

impl Snode {
    pub fn in_maintenance(&self) -> bool {
        self.flags & FLAG_MAINTENANCE != 0
    }

    pub fn is_decommissioning(&self) -> bool {
        self.flags & FLAG_DECOMMISSION != 0
    }

    /// Neither in maintenance nor being decommissioned.
    pub fn is_active(&self) -> bool {
        !self.in_maintenance() && !self.is_decommissioning()
    }

    /// Control-plane hostname; for pods this is the pod's DNS name.
    pub fn hostname(&self) -> &str {
        &self.intra_control_net.node_ip_addr
    }

    /// True when this node runs in the given pod.
    pub fn matches_pod(&self, pod_name: &str) -> bool {
        !pod_name.is_empty() && self.hostname().starts_with(pod_name)
    }
}

/// Cluster membership snapshot.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClusterMap {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default, rename = "proxy_si")]
    pub primary: Option<Snode>,
    #[serde(default, rename = "pmap")]
    pub proxies: BTreeMap<String, Snode>,
    #[serde(default, rename = "tmap")]
    pub targets: BTreeMap<String, Snode>,
}

impl ClusterMap {
    pub fn primary_id(&self) -> Option<&str> {
        self.primary.as_ref().map(|p| p.daemon_id.as_str())
    }

    /// Proxy running in the given pod.
    pub fn proxy_for_pod(&self, pod_name: &str) -> Option<&Snode> {
        find_node_by_pod(&self.proxies, pod_name)
    }

    /// Target running in the given pod.
    pub fn target_for_pod(&self, pod_name: &str) -> Option<&Snode> {
        find_node_by_pod(&self.targets, pod_name)
    }

    /// Targets not in maintenance or decommission.
    pub fn active_targets(&self) -> impl Iterator<Item = &Snode> {
        self.targets.values().filter(|n| n.is_active())
    }
}

/// Resolve a pod name to its node via hostname-prefix match.
///
/// `ais-target-1` is a prefix of `ais-target-10`, so the hostname must
/// continue with a `.` (or end) after the pod name.
pub fn find_node_by_pod<'a>(
    nodes: &'a BTreeMap<String, Snode>,
    pod_name: &str,
) -> Option<&'a Snode> {
    nodes.values().find(|n| {
        n.matches_pod(pod_name)
            && matches!(
                n.hostname().as_bytes().get(pod_name.len()),
                None | Some(b'.')
            )
    })
}

/// Contract for the managed cluster's control API.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch the current cluster map from the primary.
    async fn get_cluster_map(&self) -> Result<ClusterMap, ClusterApiError>;

    /// Health check; with `ready_to_rebalance` also requires rebalance readiness.
    async fn health(&self, ready_to_rebalance: bool) -> Result<(), ClusterApiError>;

    /// Designate a new primary proxy.
    async fn set_primary_proxy(
        &self,
        node_id: &str,
        url: &str,
        force: bool,
    ) -> Result<(), ClusterApiError>;

    /// Permanently remove a node, optionally wiping its user data.
    async fn decommission_node(
        &self,
        node_id: &str,
        wipe_user_data: bool,
    ) -> Result<(), ClusterApiError>;

    /// Decommission the whole cluster, optionally wiping user data.
    async fn decommission_cluster(&self, wipe_user_data: bool) -> Result<(), ClusterApiError>;

    /// Gracefully stop every daemon, keeping metadata.
    async fn shutdown_cluster(&self) -> Result<(), ClusterApiError>;

    /// Push a (partial) runtime config.
    async fn set_cluster_config(
        &self,
        config: &serde_json::Value,
        transient: bool,
    ) -> Result<(), ClusterApiError>;
}

/// Action message accepted by `PUT /v1/cluster`.
#[derive(Debug, Serialize)]
struct ActionMsg<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    value: serde_json::Value,
}

/// Connection settings for [`HttpClusterApi`].
#[derive(Clone, Debug, Default)]
pub struct ClusterApiConfig {
    /// Base URL, e.g. `http://ais-proxy.ais.svc.cluster.local:51080`.
    pub url: String,
    /// Bearer token when authentication is enabled.
    pub token: Option<String>,
    /// Extra PEM-encoded CA to trust.
    pub ca_pem: Option<Vec<u8>>,
}

/// [`ClusterApi`] over the AIS REST API.
#[derive(Clone, Debug)]
pub struct HttpClusterApi {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpClusterApi {
    /// Build a client for the given endpoint.
    pub fn new(config: ClusterApiConfig) -> Result<Self, ClusterApiError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(Self {
            http: builder.build()?,
            base: config.url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ClusterApiError> {
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() {
                ClusterApiError::Unreachable(e.to_string())
            } else {
                ClusterApiError::Http(e)
            }
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ClusterApiError::Status {
            code: status.as_u16(),
            body,
        })
    }

    async fn cluster_action(
        &self,
        action: &str,
        value: serde_json::Value,
    ) -> Result<(), ClusterApiError> {
        let msg = ActionMsg { action, value };
        self.send(self.request(reqwest::Method::PUT, "/v1/cluster").json(&msg))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    #[instrument(skip(self), fields(url = %self.base))]
    async fn get_cluster_map(&self) -> Result<ClusterMap, ClusterApiError> {
        let resp = self
            .send(
                self.request(reqwest::Method::GET, "/v1/daemon")
                    .query(&[("what", "smap")]),
            )
            .await?;
        Ok(resp.json::<ClusterMap>().await?)
    }

    async fn health(&self, ready_to_rebalance: bool) -> Result<(), ClusterApiError> {
        let mut req = self.request(reqwest::Method::GET, "/v1/health");
        if ready_to_rebalance {
            req = req.query(&[("prr", "true")]);
        }
        self.send(req).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(url = %self.base))]
    async fn set_primary_proxy(
        &self,
        node_id: &str,
        url: &str,
        force: bool,
    ) -> Result<(), ClusterApiError> {
        let mut query = vec![("primary_url", url.to_string())];
        if force {
            query.push(("force", "true".to_string()));
        }
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/v1/cluster/proxy/{node_id}"),
            )
            .query(&query),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(url = %self.base))]
    async fn decommission_node(
        &self,
        node_id: &str,
        wipe_user_data: bool,
    ) -> Result<(), ClusterApiError> {
        self.cluster_action(
            "decommission-node",
            json!({"sid": node_id, "rm_user_data": wipe_user_data}),
        )
        .await
    }

    async fn decommission_cluster(&self, wipe_user_data: bool) -> Result<(), ClusterApiError> {
        self.cluster_action("decommission", json!({"rm_user_data": wipe_user_data}))
            .await
    }

    async fn shutdown_cluster(&self) -> Result<(), ClusterApiError> {
        self.cluster_action("shutdown", serde_json::Value::Null)
            .await
    }

    async fn set_cluster_config(
        &self,
        config: &serde_json::Value,
        transient: bool,
    ) -> Result<(), ClusterApiError> {
        debug!(transient, "pushing cluster config");
        let msg = ActionMsg {
            action: "set-config",
            value: config.clone(),
        };
        let mut req = self.request(reqwest::Method::PUT, "/v1/cluster").json(&msg);
        if transient {
            req = req.query(&[("transient", "true")]);
        }
        self.send(req).await?;
        Ok(())
    }
}
