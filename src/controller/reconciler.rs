//! Reconciliation loop for AIStore.
//!
//! [`Reconciler::reconcile`] is the single entry point. It keeps no memory
//! between invocations: every pass starts from the resource as stored,
//! re-derives what is missing from live lookups and writes back at most one
//! status per state change plus one final flush.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::client::{ClusterApiProvider, ResourceClient};
use crate::controller::cluster_state_machine::{
    ClusterEvent, ClusterStateMachine, TransitionContext, TransitionResult, determine_event,
};
use crate::controller::common::{add_finalizer, has_finalizer};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::proxy::ProxyGroup;
use crate::controller::status::{ConditionBuilder, is_condition_true};
use crate::controller::step::{SHORT_RETRY, StepResult};
use crate::controller::target::TargetGroup;
use crate::crd::{AIStore, AIStoreStatus, ClusterState, ConditionType};
use crate::health::HealthState;
use crate::resources::DaemonRole;
use crate::resources::common::statefulset_name;
use crate::resources::config::proxy_service_url;

/// Working copy of one reconcile pass.
///
/// `cluster` tracks the latest stored object (every patch response replaces
/// it, keeping the resourceVersion precondition fresh). `status` is the
/// status the pass is building; it is written when the state changes and
/// once more at the end if anything else moved.
pub struct Pass {
    pub cluster: AIStore,
    pub status: AIStoreStatus,
    persisted: AIStoreStatus,
    /// A daemon group changed its replica count during this pass.
    pub scaling: bool,
    /// The resource released its finalizer; nothing may be written anymore.
    finished: bool,
}

impl Pass {
    pub fn new(cluster: AIStore) -> Self {
        let status = cluster.status.clone().unwrap_or_default();
        Self {
            cluster,
            persisted: status.clone(),
            status,
            scaling: false,
            finished: false,
        }
    }

    pub fn state(&self) -> ClusterState {
        self.status.state
    }

    pub fn generation(&self) -> Option<i64> {
        self.cluster.meta().generation
    }

    pub fn condition_true(&self, condition_type: ConditionType) -> bool {
        is_condition_true(&self.status.conditions, condition_type)
    }

    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
    ) {
        let generation = self.generation();
        let mut builder = ConditionBuilder::from_existing(&self.status.conditions);
        builder.condition(condition_type, status, reason, message, generation);
        self.status.conditions = builder.build();
    }

    /// Status differs from what is stored.
    pub fn is_dirty(&self) -> bool {
        self.status != self.persisted
    }
}

/// Drives AIStore resources toward their spec.
pub struct Reconciler<R, P> {
    pub(crate) resources: Arc<R>,
    pub(crate) provider: Arc<P>,
    state_machine: ClusterStateMachine,
    health_state: Option<Arc<HealthState>>,
}

impl<R, P> Reconciler<R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    pub fn new(resources: Arc<R>, provider: Arc<P>) -> Self {
        Self {
            resources,
            provider,
            state_machine: ClusterStateMachine::new(),
            health_state: None,
        }
    }

    pub fn with_health_state(mut self, health_state: Option<Arc<HealthState>>) -> Self {
        self.health_state = health_state;
        self
    }

    pub(crate) fn health_state(&self) -> Option<&HealthState> {
        self.health_state.as_deref()
    }

    /// Reconcile one AIStore.
    pub async fn reconcile(&self, cluster: &AIStore) -> Result<Action> {
        let start_time = Instant::now();
        let name = cluster.name_any();
        let namespace = cluster.namespace_or_default();
        debug!(name = %name, namespace = %namespace, state = %cluster.state(), "Reconciling AIStore");

        let mut pass = Pass::new(cluster.clone());
        let step = StepResult::from_result(self.run(&mut pass).await);

        let step = match step {
            StepResult::Failed(err) => {
                warn!(name = %name, namespace = %namespace, error = %err, "Reconcile step failed");
                self.resources
                    .publish_event(
                        &pass.cluster,
                        EventType::Warning,
                        "Failed",
                        "Reconciling",
                        Some(err.to_string()),
                    )
                    .await;
                if let Err(flush_err) = self.flush(&mut pass).await {
                    debug!(name = %name, error = %flush_err, "Status flush after failure failed");
                }
                StepResult::Failed(err)
            }
            other => match self.flush(&mut pass).await {
                Ok(()) => other,
                Err(err) => StepResult::Failed(err),
            },
        };

        if let Some(health_state) = self.health_state() {
            health_state.metrics.record_reconcile(
                &namespace,
                &name,
                start_time.elapsed().as_secs_f64(),
            );
            if pass.finished {
                health_state.forget_cluster(&namespace, &name);
            } else {
                health_state.record_cluster_state(&namespace, &name, pass.state());
            }
        }

        step.into_action()
    }

    async fn run(&self, pass: &mut Pass) -> Result<StepResult> {
        if pass.cluster.meta().deletion_timestamp.is_some() {
            if !has_finalizer(&pass.cluster) {
                return Ok(StepResult::Done);
            }
            let ctx = TransitionContext::new();
            if let Some(event) = determine_event(&pass.state(), &ctx, true) {
                self.transition(pass, event, &ctx).await?;
            }
            return self.reconcile_teardown(pass).await;
        }

        match pass.state() {
            ClusterState::Uninitialized => self.initialize(pass).await,
            state if state.is_pre_created() => self.reconcile_bootstrap(pass).await,
            state if state.is_steady() => self.reconcile_steady(pass).await,
            ClusterState::ShuttingDown | ClusterState::Shutdown => {
                self.reconcile_shutdown(pass).await
            }
            state => {
                warn!(name = %pass.cluster.name_any(), state = %state, "Teardown state without deletion timestamp");
                Ok(StepResult::Done)
            }
        }
    }

    /// Attach the finalizer and take ownership.
    async fn initialize(&self, pass: &mut Pass) -> Result<StepResult> {
        pass.cluster = add_finalizer(self.resources.as_ref(), &pass.cluster).await?;
        pass.set_condition(
            ConditionType::Initialized,
            true,
            "Initialized",
            "Operator took ownership of the cluster",
        );
        self.transition(pass, ClusterEvent::Initialize, &TransitionContext::new())
            .await?;
        Ok(StepResult::immediately())
    }

    /// Created/Ready loop: proxies, targets, health, rebalance, config.
    async fn reconcile_steady(&self, pass: &mut Pass) -> Result<StepResult> {
        if pass.state() == ClusterState::Ready && pass.cluster.spec.shutdown_cluster {
            return self.start_shutdown(pass).await;
        }

        self.ensure_prerequisites(&pass.cluster).await?;
        if pass.cluster.spec.enable_external_lb {
            self.ensure_proxy_lb_service(&pass.cluster).await?;
        }

        let proxy = self.reconcile_group(&ProxyGroup::new(self), pass).await?;
        if !proxy.is_done() {
            return self.mark_progressing(pass, proxy).await;
        }
        let target = self.reconcile_group(&TargetGroup::new(self), pass).await?;
        if !target.is_done() {
            return self.mark_progressing(pass, target).await;
        }

        let api = self.provider.client_for(&pass.cluster).await?;
        if let Err(e) = api.health(false).await {
            info!(name = %pass.cluster.name_any(), error = %e, "Cluster not healthy yet");
            return self
                .mark_progressing(pass, StepResult::RetryAfter(SHORT_RETRY))
                .await;
        }

        if !pass.condition_true(ConditionType::ReadyRebalance) {
            pass.set_condition(
                ConditionType::ReadyRebalance,
                true,
                "Stable",
                "Rebalance follows the configured value",
            );
        }
        self.sync_config(pass, api.as_ref(), false).await?;

        let smap = api.get_cluster_map().await?;
        if !smap.uuid.is_empty() {
            pass.status.cluster_id = Some(smap.uuid);
        }
        pass.status.intra_cluster_url = Some(proxy_service_url(&pass.cluster));

        pass.set_condition(
            ConditionType::Ready,
            true,
            "Ready",
            "Cluster matches spec and is healthy",
        );
        let ctx = TransitionContext::new().with_pass_complete(true);
        if let Some(event) = determine_event(&pass.state(), &ctx, false) {
            self.transition(pass, event, &ctx).await?;
        }
        Ok(StepResult::Done)
    }

    /// A steady-state step is still working: record why and stop the pass.
    async fn mark_progressing(&self, pass: &mut Pass, step: StepResult) -> Result<StepResult> {
        let (event, reason, message) = if pass.scaling {
            (
                ClusterEvent::ScaleStarted,
                "Scaling",
                "Waiting for daemons to scale",
            )
        } else {
            (
                ClusterEvent::UpgradeStarted,
                "Upgrading",
                "Waiting for cluster to upgrade",
            )
        };
        pass.set_condition(ConditionType::Ready, false, reason, message);
        if pass.state() != ClusterState::Created {
            self.transition(pass, event, &TransitionContext::new())
                .await?;
        }
        Ok(step)
    }

    /// Ready with `shutdownCluster`: fence rebalance, then start scaling down.
    async fn start_shutdown(&self, pass: &mut Pass) -> Result<StepResult> {
        let api = self.provider.client_for(&pass.cluster).await?;
        self.disable_rebalance(pass, api.as_ref()).await?;

        pass.set_condition(
            ConditionType::Ready,
            false,
            "ShuttingDown",
            "Cluster shutdown requested",
        );
        let ctx = TransitionContext::new().with_shutdown_requested(true);
        self.transition(pass, ClusterEvent::ShutdownRequested, &ctx)
            .await?;
        Ok(StepResult::immediately())
    }

    /// ShuttingDown/Shutdown: proxies to zero, then targets, then Shutdown.
    async fn reconcile_shutdown(&self, pass: &mut Pass) -> Result<StepResult> {
        let requested = pass.cluster.spec.shutdown_cluster;
        if !requested {
            let ctx = TransitionContext::new();
            if let Some(event) = determine_event(&pass.state(), &ctx, false) {
                self.transition(pass, event, &ctx).await?;
            }
            return Ok(StepResult::immediately());
        }
        if pass.state() == ClusterState::Shutdown {
            return Ok(StepResult::Done);
        }

        let namespace = pass.cluster.namespace_or_default();
        let proxy_name = statefulset_name(&pass.cluster, DaemonRole::Proxy);
        let target_name = statefulset_name(&pass.cluster, DaemonRole::Target);
        let proxy: Option<StatefulSet> = self.resources.get(&namespace, &proxy_name).await?;
        let target: Option<StatefulSet> = self.resources.get(&namespace, &target_name).await?;

        if spec_replicas(proxy.as_ref()) > 0 {
            match self.provider.client_for(&pass.cluster).await {
                Ok(api) => {
                    if let Err(e) = api.shutdown_cluster().await {
                        warn!(name = %pass.cluster.name_any(), error = %e, "Cluster shutdown call failed");
                    }
                }
                Err(e) => {
                    debug!(name = %pass.cluster.name_any(), error = %e, "No cluster client for shutdown");
                }
            }
            info!(name = %pass.cluster.name_any(), "Scaling proxies to zero");
            self.resources
                .update_statefulset_replicas(&namespace, &proxy_name, 0)
                .await?;
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        if status_replicas(proxy.as_ref()) > 0 {
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        if spec_replicas(target.as_ref()) > 0 {
            info!(name = %pass.cluster.name_any(), "Scaling targets to zero");
            self.resources
                .update_statefulset_replicas(&namespace, &target_name, 0)
                .await?;
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        let ctx = TransitionContext::new()
            .with_shutdown_requested(true)
            .with_remaining_replicas(
                status_replicas(proxy.as_ref()) + status_replicas(target.as_ref()),
            );
        match determine_event(&pass.state(), &ctx, false) {
            Some(event) if self.transition(pass, event, &ctx).await? => Ok(StepResult::Done),
            _ => Ok(StepResult::RetryAfter(SHORT_RETRY)),
        }
    }

    /// Apply an event through the state machine and persist the new state.
    ///
    /// Returns false when the event does not apply to the current state or a
    /// guard rejected it; the state is left untouched.
    pub(crate) async fn transition(
        &self,
        pass: &mut Pass,
        event: ClusterEvent,
        ctx: &TransitionContext,
    ) -> Result<bool> {
        let name = pass.cluster.name_any();
        match self.state_machine.transition(&pass.state(), event, ctx) {
            TransitionResult::Success {
                from,
                to,
                description,
                ..
            } => {
                info!(name = %name, from = %from, to = %to, event = %event, "{description}");
                pass.status.state = to;
                self.flush(pass).await?;
                let reason = match to {
                    ClusterState::InitializingLoadBalancerService
                    | ClusterState::PendingLoadBalancerService => "Waiting".to_string(),
                    other => other.to_string(),
                };
                self.resources
                    .publish_event(
                        &pass.cluster,
                        EventType::Normal,
                        &reason,
                        &event.to_string(),
                        Some(description.to_string()),
                    )
                    .await;
                Ok(true)
            }
            TransitionResult::GuardFailed {
                from, to, reason, ..
            } => {
                debug!(name = %name, from = %from, to = %to, event = %event, reason = %reason, "Transition guard failed");
                Ok(false)
            }
            TransitionResult::InvalidTransition { current, .. } => {
                debug!(name = %name, state = %current, event = %event, "Event does not apply");
                Ok(false)
            }
        }
    }

    /// Write the status if it changed.
    pub(crate) async fn flush(&self, pass: &mut Pass) -> Result<()> {
        if pass.finished || !pass.is_dirty() {
            return Ok(());
        }
        pass.cluster = self
            .resources
            .patch_cluster_status(&pass.cluster, &pass.status)
            .await?;
        pass.persisted = pass.status.clone();
        Ok(())
    }

    /// Mark the pass as done writing; used once the finalizer is gone.
    pub(crate) fn finish(&self, pass: &mut Pass) {
        pass.finished = true;
    }
}

pub(crate) fn spec_replicas(sts: Option<&StatefulSet>) -> i32 {
    sts.and_then(|s| s.spec.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or(0)
}

pub(crate) fn status_replicas(sts: Option<&StatefulSet>) -> i32 {
    sts.and_then(|s| s.status.as_ref())
        .map(|s| s.replicas)
        .unwrap_or(0)
}

pub(crate) fn ready_replicas(sts: Option<&StatefulSet>) -> i32 {
    sts.and_then(|s| s.status.as_ref())
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// Reconcile an AIStore
///
/// Entry point for the kube-runtime controller.
pub async fn reconcile(obj: Arc<AIStore>, ctx: Arc<Context>) -> Result<Action> {
    ctx.reconciler.reconcile(&obj).await
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<AIStore>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace_or_default();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
