//! Prerequisites and first-time cluster bootstrap.

use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::client::{ClusterApiProvider, ResourceClient};
use crate::controller::cluster_state_machine::{ClusterEvent, TransitionContext};
use crate::controller::daemon::ingress_ip;
use crate::controller::error::Result;
use crate::controller::reconciler::{Pass, Reconciler, ready_replicas, spec_replicas};
use crate::controller::step::{SHORT_RETRY, StepResult};
use crate::crd::{AIStore, ClusterState, ConditionType};
use crate::resources::DaemonRole;
use crate::resources::admin_client::generate_admin_client;
use crate::resources::certificate::generate_certificate;
use crate::resources::common::{
    admin_client_name, headless_service_name, pdb_name, proxy_lb_service_name, statefulset_name,
};
use crate::resources::configmap::{generate_global_configmap, generate_statsd_configmap};
use crate::resources::pdb::generate_pod_disruption_budget;
use crate::resources::rbac::{
    generate_cluster_role, generate_cluster_role_binding, generate_role, generate_role_binding,
    generate_service_account,
};
use crate::resources::services::{
    generate_headless_service, generate_proxy_lb_service, generate_target_lb_services,
};
use crate::resources::statefulset::generate_statefulset;

/// Requeue while LoadBalancer IPs are being assigned.
const LB_RETRY: Duration = Duration::from_secs(10);

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

impl<R, P> Reconciler<R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    /// Objects the daemons need before they can start. Safe to run every pass.
    pub(crate) async fn ensure_prerequisites(&self, cluster: &AIStore) -> Result<()> {
        let namespace = cluster.namespace_or_default();

        self.resources
            .create_if_not_exists(&generate_service_account(cluster))
            .await?;
        self.resources.create_if_not_exists(&generate_role(cluster)).await?;
        self.resources
            .create_if_not_exists(&generate_role_binding(cluster))
            .await?;
        self.resources
            .create_if_not_exists(&generate_cluster_role(cluster))
            .await?;
        self.resources
            .create_if_not_exists(&generate_cluster_role_binding(cluster))
            .await?;

        self.resources
            .create_if_not_exists(&generate_statsd_configmap(cluster))
            .await?;
        self.resources.apply(&generate_global_configmap(cluster)?).await?;

        if let Some(certificate) = generate_certificate(cluster) {
            self.resources.create_if_not_exists(&certificate).await?;
        }

        for role in [DaemonRole::Proxy, DaemonRole::Target] {
            self.resources
                .create_if_not_exists(&generate_headless_service(cluster, role))
                .await?;
        }

        match generate_admin_client(cluster) {
            Some(deployment) => {
                self.resources.apply(&deployment).await?;
            }
            None => {
                self.resources
                    .delete_if_exists::<Deployment>(&namespace, &admin_client_name(cluster))
                    .await?;
            }
        }
        match generate_pod_disruption_budget(cluster) {
            Some(pdb) => {
                self.resources.apply(&pdb).await?;
            }
            None => {
                self.resources
                    .delete_if_exists::<PodDisruptionBudget>(&namespace, &pdb_name(cluster))
                    .await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn ensure_proxy_lb_service(&self, cluster: &AIStore) -> Result<()> {
        self.resources
            .create_if_not_exists(&generate_proxy_lb_service(cluster))
            .await?;
        Ok(())
    }

    /// Create every LoadBalancer Service. Returns true once all have an IP.
    async fn ensure_lb_services(&self, pass: &mut Pass) -> Result<bool> {
        let targets = self.desired_size(pass, DaemonRole::Target).await?;
        let cluster = &pass.cluster;
        let namespace = cluster.namespace_or_default();

        self.ensure_proxy_lb_service(cluster).await?;
        let mut names = vec![proxy_lb_service_name(cluster)];
        for svc in generate_target_lb_services(cluster, targets) {
            self.resources.create_if_not_exists(&svc).await?;
            names.push(svc.name_any());
        }

        for name in names {
            let svc: Option<Service> = self.resources.get(&namespace, &name).await?;
            if svc.as_ref().and_then(ingress_ip).is_none() {
                debug!(service = %name, "LoadBalancer IP not assigned yet");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Initialized and LoadBalancer states: prerequisites, LB IPs, daemons.
    pub(crate) async fn reconcile_bootstrap(&self, pass: &mut Pass) -> Result<StepResult> {
        self.ensure_prerequisites(&pass.cluster).await?;

        if pass.cluster.spec.enable_external_lb && !self.ensure_lb_services(pass).await? {
            let event = match pass.state() {
                ClusterState::Initialized => Some(ClusterEvent::LoadBalancerRequested),
                ClusterState::InitializingLoadBalancerService => {
                    Some(ClusterEvent::LoadBalancerPending)
                }
                _ => None,
            };
            if let Some(event) = event {
                self.transition(pass, event, &TransitionContext::new())
                    .await?;
            }
            return Ok(StepResult::RetryAfter(LB_RETRY));
        }

        if !pass.condition_true(ConditionType::Created) {
            let step = self.bootstrap_daemons(pass).await?;
            if !step.is_done() {
                return Ok(step);
            }
            pass.set_condition(
                ConditionType::Created,
                true,
                "Created",
                "Proxies and targets created",
            );
        }

        self.transition(pass, ClusterEvent::Bootstrapped, &TransitionContext::new())
            .await?;
        Ok(StepResult::immediately())
    }

    /// Bring up a single proxy first so it becomes primary, then the rest,
    /// then targets once the proxy service resolves.
    async fn bootstrap_daemons(&self, pass: &mut Pass) -> Result<StepResult> {
        let proxies = self.desired_size(pass, DaemonRole::Proxy).await?;
        let targets = self.desired_size(pass, DaemonRole::Target).await?;
        let cluster = &pass.cluster;
        let namespace = cluster.namespace_or_default();
        let proxy_name = statefulset_name(cluster, DaemonRole::Proxy);

        let proxy: Option<StatefulSet> = self.resources.get(&namespace, &proxy_name).await?;
        let Some(proxy) = proxy else {
            info!(name = %cluster.name_any(), "Creating primary proxy");
            self.resources
                .create_if_not_exists(&generate_statefulset(cluster, DaemonRole::Proxy, 1))
                .await?;
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        };
        if ready_replicas(Some(&proxy)) < 1 {
            debug!(name = %cluster.name_any(), "Waiting for the primary proxy");
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        if spec_replicas(Some(&proxy)) < proxies {
            info!(name = %cluster.name_any(), proxies, "Scaling proxies");
            self.resources
                .update_statefulset_replicas(&namespace, &proxy_name, proxies)
                .await?;
        }

        if !self.proxy_endpoints_ready(cluster).await? {
            debug!(name = %cluster.name_any(), "Waiting for proxy service endpoints");
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        if self
            .resources
            .create_if_not_exists(&generate_statefulset(cluster, DaemonRole::Target, targets))
            .await?
        {
            info!(name = %cluster.name_any(), targets, "Created targets");
        }
        Ok(StepResult::Done)
    }

    async fn proxy_endpoints_ready(&self, cluster: &AIStore) -> Result<bool> {
        let selector = format!(
            "{SERVICE_NAME_LABEL}={}",
            headless_service_name(cluster, DaemonRole::Proxy)
        );
        let slices: Vec<EndpointSlice> = self
            .resources
            .list(&cluster.namespace_or_default(), &selector)
            .await?;
        Ok(slices.iter().any(|s| {
            s.endpoints.iter().any(|e| {
                e.conditions
                    .as_ref()
                    .and_then(|c| c.ready)
                    .unwrap_or(true)
            })
        }))
    }
}
