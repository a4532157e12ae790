//! Proxy group: rollout with primary failover and primary-safe scale-down.
//!
//! StatefulSet rolling updates restart the highest ordinal first, so the
//! primary is pinned to ordinal 0 and fenced with `partition = 1` while the
//! other proxies roll. Once only ordinal 0 runs the old revision, the
//! primary moves to the highest (already rolled) ordinal and the partition
//! is released.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, Service};
use kube::ResourceExt;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use crate::client::{ClusterApi, ClusterApiProvider, ClusterMap, ResourceClient, Snode};
use crate::controller::daemon::{
    DaemonGroup, current_partition, ingress_ip, is_pod_ready, partition_patch,
};
use crate::controller::error::Result;
use crate::controller::reconciler::{Pass, Reconciler, ready_replicas, spec_replicas};
use crate::controller::step::{SHORT_RETRY, StepResult};
use crate::resources::DaemonRole;
use crate::resources::common::{pod_name, proxy_lb_service_name, role_selector};

pub struct ProxyGroup<'a, R, P> {
    rec: &'a Reconciler<R, P>,
}

impl<'a, R, P> ProxyGroup<'a, R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    pub fn new(rec: &'a Reconciler<R, P>) -> Self {
        Self { rec }
    }

    /// Make the proxy in pod `ordinal` primary unless it already is.
    async fn ensure_primary(
        &self,
        pass: &Pass,
        api: &dyn ClusterApi,
        smap: &ClusterMap,
        ordinal: i32,
        force: bool,
    ) -> Result<StepResult> {
        let pod = pod_name(&pass.cluster, DaemonRole::Proxy, ordinal);
        let Some(node) = smap.proxy_for_pod(&pod) else {
            debug!(pod = %pod, "Proxy not in cluster map yet");
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        };
        if smap.primary_id() == Some(node.daemon_id.as_str()) {
            return Ok(StepResult::Done);
        }
        self.set_primary(pass, api, node, force).await
    }

    async fn set_primary(
        &self,
        pass: &Pass,
        api: &dyn ClusterApi,
        node: &Snode,
        force: bool,
    ) -> Result<StepResult> {
        info!(name = %pass.cluster.name_any(), node = %node.daemon_id, "Moving primary proxy");
        if let Err(e) = api
            .set_primary_proxy(&node.daemon_id, &node.public_net.direct_url, force)
            .await
        {
            warn!(name = %pass.cluster.name_any(), node = %node.daemon_id, error = %e, "Primary handoff failed");
            self.rec
                .resources
                .publish_event(
                    &pass.cluster,
                    EventType::Warning,
                    "BackOff",
                    "SetPrimary",
                    Some(format!("Failed to set primary to {}: {e}", node.daemon_id)),
                )
                .await;
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        Ok(StepResult::Done)
    }

    async fn set_partition(&self, pass: &Pass, sts: &StatefulSet, partition: i32) -> Result<()> {
        debug!(name = %pass.cluster.name_any(), partition, "Setting proxy rollout partition");
        self.rec
            .resources
            .patch::<StatefulSet>(
                &pass.cluster.namespace_or_default(),
                &sts.name_any(),
                &partition_patch(partition),
            )
            .await?;
        Ok(())
    }

    /// Names of proxy pods reporting Ready.
    async fn ready_pods(&self, pass: &Pass) -> Result<Vec<String>> {
        let pods: Vec<Pod> = self
            .rec
            .resources
            .list(
                &pass.cluster.namespace_or_default(),
                &role_selector(&pass.cluster, DaemonRole::Proxy),
            )
            .await?;
        Ok(pods
            .iter()
            .filter(|p| is_pod_ready(p))
            .map(ResourceExt::name_any)
            .collect())
    }
}

#[async_trait]
impl<R, P> DaemonGroup for ProxyGroup<'_, R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    fn role(&self) -> DaemonRole {
        DaemonRole::Proxy
    }

    /// New proxies are reached through the shared LoadBalancer, which must
    /// have an external IP first.
    async fn prepare_scale_up(
        &self,
        pass: &mut Pass,
        _current: i32,
        _desired: i32,
    ) -> Result<StepResult> {
        if !pass.cluster.spec.enable_external_lb {
            return Ok(StepResult::Done);
        }
        self.rec.ensure_proxy_lb_service(&pass.cluster).await?;
        let name = proxy_lb_service_name(&pass.cluster);
        let svc: Option<Service> = self
            .rec
            .resources
            .get(&pass.cluster.namespace_or_default(), &name)
            .await?;
        if svc.as_ref().and_then(ingress_ip).is_none() {
            debug!(name = %pass.cluster.name_any(), service = %name, "Waiting for proxy LoadBalancer IP");
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

        let primary_removed = (desired..current).any(|ordinal| {
            let pod = pod_name(&pass.cluster, DaemonRole::Proxy, ordinal);
            smap.proxy_for_pod(&pod)
                .is_some_and(|n| smap.primary_id() == Some(n.daemon_id.as_str()))
        });
        if primary_removed {
            self.rec.disable_rebalance(pass, api.as_ref()).await?;
            let ready = self.ready_pods(pass).await?;
            let successor = (0..desired).find_map(|ordinal| {
                let pod = pod_name(&pass.cluster, DaemonRole::Proxy, ordinal);
                if !ready.contains(&pod) {
                    return None;
                }
                smap.proxy_for_pod(&pod).filter(|n| n.is_active())
            });
            let Some(successor) = successor else {
                warn!(name = %pass.cluster.name_any(), "No ready proxy to take over as primary");
                return Ok(StepResult::RetryAfter(SHORT_RETRY));
            };
            let handoff = self.set_primary(pass, api.as_ref(), successor, true).await?;
            if !handoff.is_done() {
                return Ok(handoff);
            }
        }

        for ordinal in (desired..current).rev() {
            let pod = pod_name(&pass.cluster, DaemonRole::Proxy, ordinal);
            let Some(node) = smap.proxy_for_pod(&pod) else {
                debug!(pod = %pod, "Proxy not in cluster map, nothing to decommission");
                continue;
            };
            if node.is_decommissioning() {
                continue;
            }
            info!(name = %pass.cluster.name_any(), node = %node.daemon_id, "Decommissioning proxy");
            if let Err(e) = api.decommission_node(&node.daemon_id, false).await {
                warn!(name = %pass.cluster.name_any(), node = %node.daemon_id, error = %e, "Proxy decommission failed");
                self.rec
                    .resources
                    .publish_event(
                        &pass.cluster,
                        EventType::Warning,
                        "Failed",
                        "Decommission",
                        Some(format!("Failed to decommission proxy {}: {e}", node.daemon_id)),
                    )
                    .await;
            }
        }
        Ok(StepResult::Done)
    }

    async fn rollout(
        &self,
        pass: &mut Pass,
        sts: &StatefulSet,
        template: &PodTemplateSpec,
    ) -> Result<StepResult> {
        let replicas = spec_replicas(Some(sts));
        if ready_replicas(Some(sts)) > 0 && replicas > 1 {
            let api = self.rec.provider.client_for(&pass.cluster).await?;
            self.rec.disable_rebalance(pass, api.as_ref()).await?;
            let smap = api.get_cluster_map().await?;
            let pinned = self
                .ensure_primary(pass, api.as_ref(), &smap, 0, false)
                .await?;
            if !pinned.is_done() {
                return Ok(pinned);
            }
            self.set_partition(pass, sts, 1).await?;
        }
        info!(name = %pass.cluster.name_any(), "Rolling out proxy template");
        self.rec.patch_template(&pass.cluster, sts, template).await?;
        Ok(StepResult::RetryAfter(SHORT_RETRY))
    }

    async fn continue_rollout(&self, pass: &mut Pass, sts: &StatefulSet) -> Result<StepResult> {
        let Some(status) = sts.status.as_ref() else {
            return Ok(StepResult::Done);
        };
        let partition = current_partition(sts);
        let rolling = status.update_revision.is_some()
            && status.update_revision != status.current_revision;

        if !rolling {
            if partition != 0 {
                self.set_partition(pass, sts, 0).await?;
            }
            return Ok(StepResult::Done);
        }

        let replicas = spec_replicas(Some(sts));
        if partition > 0
            && status.current_replicas == Some(1)
            && ready_replicas(Some(sts)) == replicas
        {
            let api = self.rec.provider.client_for(&pass.cluster).await?;
            let smap = api.get_cluster_map().await?;
            let moved = self
                .ensure_primary(pass, api.as_ref(), &smap, replicas - 1, false)
                .await?;
            if !moved.is_done() {
                return Ok(moved);
            }
            self.set_partition(pass, sts, 0).await?;
        }
        Ok(StepResult::RetryAfter(SHORT_RETRY))
    }
}
