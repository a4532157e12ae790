//! Target group: per-pod LoadBalancers and graceful decommission.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service};
use kube::ResourceExt;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use crate::client::{ClusterApiProvider, ResourceClient};
use crate::controller::daemon::{DaemonGroup, ingress_ip};
use crate::controller::error::Result;
use crate::controller::reconciler::{Pass, Reconciler};
use crate::controller::step::{SHORT_RETRY, StepResult};
use crate::resources::DaemonRole;
use crate::resources::common::{pod_name, target_lb_service_name};
use crate::resources::services::generate_target_lb_service;

pub struct TargetGroup<'a, R, P> {
    rec: &'a Reconciler<R, P>,
}

impl<'a, R, P> TargetGroup<'a, R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    pub fn new(rec: &'a Reconciler<R, P>) -> Self {
        Self { rec }
    }
}

#[async_trait]
impl<R, P> DaemonGroup for TargetGroup<'_, R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    fn role(&self) -> DaemonRole {
        DaemonRole::Target
    }

    /// With external LBs, every new ordinal needs its Service and an
    /// ingress IP before the pod may start.
    async fn prepare_scale_up(
        &self,
        pass: &mut Pass,
        current: i32,
        desired: i32,
    ) -> Result<StepResult> {
        if !pass.cluster.spec.enable_external_lb {
            return Ok(StepResult::Done);
        }
        let namespace = pass.cluster.namespace_or_default();
        let mut pending = 0;
        for ordinal in current..desired {
            self.rec
                .resources
                .create_if_not_exists(&generate_target_lb_service(&pass.cluster, ordinal))
                .await?;
            let name = target_lb_service_name(&pass.cluster, ordinal);
            let svc: Option<Service> = self.rec.resources.get(&namespace, &name).await?;
            if svc.as_ref().and_then(ingress_ip).is_none() {
                pending += 1;
            }
        }
        if pending > 0 {
            debug!(name = %pass.cluster.name_any(), pending, "Waiting for target LoadBalancer IPs");
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        Ok(StepResult::Done)
    }

    async fn scale_down(
        &self,
        pass: &mut Pass,
        current: i32,
        desired: i32,
    ) -> Result<StepResult> {
        let api = self.rec.provider.client_for(&pass.cluster).await?;
        let smap = api.get_cluster_map().await?;
        let wipe = pass.cluster.should_cleanup_data();

        for ordinal in (desired..current).rev() {
            let pod = pod_name(&pass.cluster, DaemonRole::Target, ordinal);
            let Some(node) = smap.target_for_pod(&pod) else {
                debug!(pod = %pod, "Target not in cluster map, nothing to decommission");
                continue;
            };
            if node.is_decommissioning() {
                continue;
            }
            info!(name = %pass.cluster.name_any(), node = %node.daemon_id, wipe, "Decommissioning target");
            if let Err(e) = api.decommission_node(&node.daemon_id, wipe).await {
                warn!(name = %pass.cluster.name_any(), node = %node.daemon_id, error = %e, "Target decommission failed");
                self.rec
                    .resources
                    .publish_event(
                        &pass.cluster,
                        EventType::Warning,
                        "Failed",
                        "Decommission",
                        Some(format!("Failed to decommission target {}: {e}", node.daemon_id)),
                    )
                    .await;
            }
        }
        Ok(StepResult::Done)
    }

    async fn after_scale_down(&self, pass: &mut Pass, current: i32, desired: i32) -> Result<()> {
        if !pass.cluster.spec.enable_external_lb {
            return Ok(());
        }
        let namespace = pass.cluster.namespace_or_default();
        for ordinal in desired..current {
            self.rec
                .resources
                .delete_if_exists::<Service>(&namespace, &target_lb_service_name(&pass.cluster, ordinal))
                .await?;
        }
        Ok(())
    }

    async fn rollout(
        &self,
        pass: &mut Pass,
        sts: &StatefulSet,
        template: &PodTemplateSpec,
    ) -> Result<StepResult> {
        info!(name = %pass.cluster.name_any(), "Rolling out target template");
        self.rec.patch_template(&pass.cluster, sts, template).await?;
        Ok(StepResult::RetryAfter(SHORT_RETRY))
    }
}
