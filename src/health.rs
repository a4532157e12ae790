//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::crd::ClusterState;
use crate::resources::DaemonRole;

/// Labels for reconciliation metrics (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-role replica metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReplicaLabels {
    pub namespace: String,
    pub name: String,
    pub role: String,
}

impl EncodeLabelSet for ReplicaLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("role", self.role.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for state-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StateLabels {
    pub state: String,
}

impl EncodeLabelSet for StateLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("state", self.state.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// AIStore clusters by lifecycle state
    pub clusters_total: Family<StateLabels, Gauge>,
    /// Desired replicas per cluster and role
    pub cluster_replicas_desired: Family<ReplicaLabels, Gauge>,
    /// Ready replicas per cluster and role
    pub cluster_replicas_ready: Family<ReplicaLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "aisoperator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "aisoperator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "aisoperator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let clusters_total = Family::<StateLabels, Gauge>::default();
        registry.register(
            "aisoperator_clusters_total",
            "Total number of AIStore clusters by state",
            clusters_total.clone(),
        );

        let cluster_replicas_desired = Family::<ReplicaLabels, Gauge>::default();
        registry.register(
            "aisoperator_cluster_replicas_desired",
            "Desired number of daemons per cluster and role",
            cluster_replicas_desired.clone(),
        );

        let cluster_replicas_ready = Family::<ReplicaLabels, Gauge>::default();
        registry.register(
            "aisoperator_cluster_replicas_ready",
            "Number of ready daemons per cluster and role",
            cluster_replicas_ready.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            clusters_total,
            cluster_replicas_desired,
            cluster_replicas_ready,
            registry,
        }
    }

    /// Record a reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Update cluster count by state
    pub fn set_clusters_by_state(&self, state: &str, count: i64) {
        let labels = StateLabels {
            state: state.to_string(),
        };
        self.clusters_total.get_or_create(&labels).set(count);
    }

    /// Update replica metrics for one role of a cluster
    pub fn set_cluster_replicas(
        &self,
        namespace: &str,
        name: &str,
        role: &str,
        desired: i64,
        ready: i64,
    ) {
        let labels = ReplicaLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            role: role.to_string(),
        };
        self.cluster_replicas_desired
            .get_or_create(&labels)
            .set(desired);
        self.cluster_replicas_ready
            .get_or_create(&labels)
            .set(ready);
    }

    /// Drop the replica series of a deleted cluster
    pub fn remove_cluster_replicas(&self, namespace: &str, name: &str) {
        for role in [DaemonRole::Proxy, DaemonRole::Target] {
            let labels = ReplicaLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                role: role.to_string(),
            };
            self.cluster_replicas_desired.remove(&labels);
            self.cluster_replicas_ready.remove(&labels);
        }
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (controller running, not shutting down)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
    /// Last observed state per `namespace/name`, feeding the state gauges
    cluster_states: Mutex<HashMap<String, ClusterState>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
            cluster_states: Mutex::new(HashMap::new()),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Record the state a cluster ended a reconcile in.
    pub fn record_cluster_state(&self, namespace: &str, name: &str, state: ClusterState) {
        self.touch();
        let Ok(mut states) = self.cluster_states.lock() else {
            return;
        };
        states.insert(format!("{namespace}/{name}"), state);
        self.publish_states(&states);
    }

    /// Forget a cluster whose finalizer was released.
    pub fn forget_cluster(&self, namespace: &str, name: &str) {
        self.touch();
        self.metrics.remove_cluster_replicas(namespace, name);
        let Ok(mut states) = self.cluster_states.lock() else {
            return;
        };
        states.remove(&format!("{namespace}/{name}"));
        self.publish_states(&states);
    }

    fn touch(&self) {
        let now = u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or_default();
        self.last_reconcile.store(now, Ordering::Relaxed);
    }

    fn publish_states(&self, states: &HashMap<String, ClusterState>) {
        for state in ClusterState::ALL {
            let count = states.values().filter(|s| **s == state).count();
            self.metrics.set_clusters_by_state(
                &state_label(state),
                i64::try_from(count).unwrap_or(i64::MAX),
            );
        }
    }
}

/// Metric label for a state; the initial empty state reads "Uninitialized".
fn state_label(state: ClusterState) -> String {
    match state {
        ClusterState::Uninitialized => "Uninitialized".to_string(),
        other => other.to_string(),
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 503 until the controller starts and again once shutdown begins.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve probes and metrics on 0.0.0.0:8080.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(port = 8080, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
