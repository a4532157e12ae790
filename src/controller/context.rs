//! Shared context for the controller.
//!
//! Holds the reconciler (with its Kubernetes and cluster API clients) and
//! the optional health state, shared by every reconcile invocation.

use std::sync::Arc;

use crate::client::{ClientRegistry, KubeResourceClient};
use crate::controller::reconciler::Reconciler;
use crate::health::HealthState;

/// Reconciler wired to the live Kubernetes and cluster API clients.
pub type KubeReconciler = Reconciler<KubeResourceClient, ClientRegistry<KubeResourceClient>>;

/// Shared context for the controller
pub struct Context {
    pub reconciler: KubeReconciler,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        resources: Arc<KubeResourceClient>,
        registry: Arc<ClientRegistry<KubeResourceClient>>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(resources, registry)
                .with_health_state(health_state.clone()),
            health_state,
        }
    }
}
