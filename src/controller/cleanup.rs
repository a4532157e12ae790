//! Ordered teardown of a deleted AIStore.
//!
//! Decommissioning asks the live cluster to wind itself down; once its API
//! stops answering, owned objects are removed in a fixed order, one group
//! per pass, followed by optional per-node host cleanup Jobs. The finalizer
//! is released last.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, Pod, Service, ServiceAccount,
};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::ResourceExt;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use crate::client::{ClusterApi, ClusterApiProvider, ResourceClient};
use crate::controller::cluster_state_machine::{
    ClusterEvent, TransitionContext, determine_event,
};
use crate::controller::common::remove_finalizer;
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::{Pass, Reconciler, ready_replicas, spec_replicas};
use crate::controller::step::{DECOMMISSION_RETRY, SHORT_RETRY, StepResult};
use crate::crd::{AIStore, ClusterState};
use crate::resources::DaemonRole;
use crate::resources::certificate::{Certificate, generate_certificate};
use crate::resources::common::{
    admin_client_name, certificate_name, cluster_rbac_name, global_configmap_name, pdb_name,
    pod_name, rbac_name, role_selector, statefulset_name, statsd_configmap_name,
};
use crate::resources::job::{
    cleanup_job_prefix, cleanup_job_selector, generate_cleanup_job, job_succeeded,
};

/// Cleanup Jobs older than this are force-deleted.
pub const STUCK_JOB_THRESHOLD: Duration = Duration::from_secs(120);

fn job_failed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.failed)
        .is_some_and(|n| n > 0)
}

fn job_age_secs(job: &Job, now: i64) -> Option<i64> {
    job.metadata
        .creation_timestamp
        .as_ref()
        .map(|t| now - t.0.timestamp())
}

impl<R, P> Reconciler<R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    /// Teardown states, entered once the resource carries a deletion timestamp.
    pub(crate) async fn reconcile_teardown(&self, pass: &mut Pass) -> Result<StepResult> {
        match pass.state() {
            ClusterState::Decommissioning => self.decommission(pass).await,
            ClusterState::CleaningResources => self.clean_resources(pass).await,
            ClusterState::HostCleanup => self.host_cleanup(pass).await,
            ClusterState::Finalized => self.finalize(pass).await,
            state => {
                debug!(name = %pass.cluster.name_any(), state = %state, "Deletion not yet recorded");
                Ok(StepResult::immediately())
            }
        }
    }

    /// Cluster API client if the cluster still answers health checks.
    async fn reachable_api(&self, cluster: &AIStore) -> Result<Option<Arc<dyn ClusterApi>>> {
        let namespace = cluster.namespace_or_default();
        let proxy: Option<StatefulSet> = self
            .resources
            .get(&namespace, &statefulset_name(cluster, DaemonRole::Proxy))
            .await?;
        if ready_replicas(proxy.as_ref()) == 0 {
            return Ok(None);
        }
        let api = match self.provider.client_for(cluster).await {
            Ok(api) => api,
            Err(Error::Kube(e)) => return Err(Error::Kube(e)),
            Err(e) => {
                debug!(name = %cluster.name_any(), error = %e, "No cluster API client");
                return Ok(None);
            }
        };
        match api.health(false).await {
            Ok(()) => Ok(Some(api)),
            Err(e) => {
                debug!(name = %cluster.name_any(), error = %e, "Cluster API not answering");
                Ok(None)
            }
        }
    }

    async fn decommission(&self, pass: &mut Pass) -> Result<StepResult> {
        if let Some(api) = self.reachable_api(&pass.cluster).await? {
            let wipe_metadata = pass.cluster.should_cleanup_metadata();
            let result = if wipe_metadata {
                info!(name = %pass.cluster.name_any(), wipe_data = pass.cluster.should_cleanup_data(), "Decommissioning cluster");
                api.decommission_cluster(pass.cluster.should_cleanup_data())
                    .await
            } else {
                info!(name = %pass.cluster.name_any(), "Shutting cluster down before deletion");
                api.shutdown_cluster().await
            };
            match result {
                Ok(()) => return Ok(StepResult::RetryAfter(DECOMMISSION_RETRY)),
                Err(e) if e.is_unreachable() => {
                    debug!(name = %pass.cluster.name_any(), error = %e, "Cluster went away during decommission");
                }
                Err(e) => {
                    warn!(name = %pass.cluster.name_any(), error = %e, "Cluster decommission failed");
                    self.resources
                        .publish_event(
                            &pass.cluster,
                            EventType::Warning,
                            "Failed",
                            "Decommission",
                            Some(e.to_string()),
                        )
                        .await;
                    return Ok(StepResult::RetryAfter(DECOMMISSION_RETRY));
                }
            }
        }

        self.record_daemon_nodes(pass).await?;
        self.transition(pass, ClusterEvent::ClusterUnreachable, &TransitionContext::new())
            .await?;
        Ok(StepResult::immediately())
    }

    /// Remember the nodes daemons ran on; host cleanup needs them after the
    /// pods are gone.
    async fn record_daemon_nodes(&self, pass: &mut Pass) -> Result<()> {
        let namespace = pass.cluster.namespace_or_default();
        let mut nodes: BTreeSet<String> = pass.status.host_cleanup_nodes.iter().cloned().collect();
        for role in [DaemonRole::Proxy, DaemonRole::Target] {
            let pods: Vec<Pod> = self
                .resources
                .list(&namespace, &role_selector(&pass.cluster, role))
                .await?;
            nodes.extend(
                pods.iter()
                    .filter_map(|p| p.spec.as_ref().and_then(|s| s.node_name.clone())),
            );
        }
        if let Some(autoscale) = &pass.status.auto_scale_status {
            nodes.extend(autoscale.expected_proxy_nodes.iter().cloned());
            nodes.extend(autoscale.expected_target_nodes.iter().cloned());
        }
        pass.status.host_cleanup_nodes = nodes.into_iter().collect();
        Ok(())
    }

    async fn clean_resources(&self, pass: &mut Pass) -> Result<StepResult> {
        let cluster = pass.cluster.clone();
        let namespace = cluster.namespace_or_default();

        if let Some(step) = self.remove_targets(&cluster).await? {
            return Ok(step);
        }
        if self.delete_role_services(&cluster, DaemonRole::Target).await? {
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        let proxy_name = statefulset_name(&cluster, DaemonRole::Proxy);
        if self
            .resources
            .delete_if_exists::<StatefulSet>(&namespace, &proxy_name)
            .await?
        {
            info!(name = %cluster.name_any(), "Deleted proxy StatefulSet");
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        if self.delete_role_services(&cluster, DaemonRole::Proxy).await? {
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        let mut pending = false;
        pending |= self
            .resources
            .delete_if_exists::<ConfigMap>(&namespace, &global_configmap_name(&cluster))
            .await?;
        pending |= self
            .resources
            .delete_if_exists::<ConfigMap>(&namespace, &statsd_configmap_name(&cluster))
            .await?;
        pending |= self
            .resources
            .delete_if_exists::<Deployment>(&namespace, &admin_client_name(&cluster))
            .await?;
        pending |= self
            .resources
            .delete_if_exists::<PodDisruptionBudget>(&namespace, &pdb_name(&cluster))
            .await?;
        if generate_certificate(&cluster).is_some() {
            pending |= self
                .resources
                .delete_if_exists::<Certificate>(&namespace, &certificate_name(&cluster))
                .await?;
        }
        if pending {
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        let cluster_rbac = cluster_rbac_name(&cluster);
        let rbac = rbac_name(&cluster);
        pending |= self
            .resources
            .delete_if_exists::<ClusterRoleBinding>("", &cluster_rbac)
            .await?;
        pending |= self
            .resources
            .delete_if_exists::<ClusterRole>("", &cluster_rbac)
            .await?;
        pending |= self
            .resources
            .delete_if_exists::<RoleBinding>(&namespace, &rbac)
            .await?;
        pending |= self.resources.delete_if_exists::<Role>(&namespace, &rbac).await?;
        pending |= self
            .resources
            .delete_if_exists::<ServiceAccount>(&namespace, &rbac)
            .await?;
        if pending {
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        if cluster.should_cleanup_metadata() && self.delete_volume_claims(&cluster).await? {
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        let ctx = TransitionContext::new()
            .with_wipe_host_state(cluster.should_cleanup_metadata() && cluster.uses_hostpath_state())
            .with_recorded_nodes(pass.status.host_cleanup_nodes.len());
        if ctx.needs_host_cleanup() {
            self.start_host_cleanup(pass).await?;
        }
        if let Some(event) = determine_event(&pass.state(), &ctx, false) {
            self.transition(pass, event, &ctx).await?;
        }
        Ok(StepResult::immediately())
    }

    /// Target StatefulSet removal. Returns a step while targets remain.
    async fn remove_targets(&self, cluster: &AIStore) -> Result<Option<StepResult>> {
        let namespace = cluster.namespace_or_default();
        let name = statefulset_name(cluster, DaemonRole::Target);
        let Some(sts) = self.resources.get::<StatefulSet>(&namespace, &name).await? else {
            return Ok(None);
        };

        if let Some(api) = self.reachable_api(cluster).await? {
            let wipe = cluster.should_cleanup_data();
            match api.get_cluster_map().await {
                Ok(smap) => {
                    for ordinal in (0..spec_replicas(Some(&sts))).rev() {
                        let pod = pod_name(cluster, DaemonRole::Target, ordinal);
                        let Some(node) = smap.target_for_pod(&pod) else {
                            continue;
                        };
                        if let Err(e) = api.decommission_node(&node.daemon_id, wipe).await {
                            warn!(name = %cluster.name_any(), node = %node.daemon_id, error = %e, "Target decommission failed");
                        }
                    }
                }
                Err(e) => {
                    debug!(name = %cluster.name_any(), error = %e, "Cluster map unavailable, deleting targets directly");
                }
            }
        } else if ready_replicas(Some(&sts)) > 0 {
            if spec_replicas(Some(&sts)) > 0 {
                info!(name = %cluster.name_any(), "Scaling unreachable targets to zero");
                self.resources
                    .update_statefulset_replicas(&namespace, &name, 0)
                    .await?;
            }
            return Ok(Some(StepResult::RetryAfter(SHORT_RETRY)));
        }

        info!(name = %cluster.name_any(), "Deleting target StatefulSet");
        self.resources
            .delete_if_exists::<StatefulSet>(&namespace, &name)
            .await?;
        Ok(Some(StepResult::RetryAfter(SHORT_RETRY)))
    }

    /// Delete every Service of a role. Returns true if any existed.
    async fn delete_role_services(&self, cluster: &AIStore, role: DaemonRole) -> Result<bool> {
        let namespace = cluster.namespace_or_default();
        let services: Vec<Service> = self
            .resources
            .list(&namespace, &role_selector(cluster, role))
            .await?;
        let mut existed = false;
        for svc in services {
            existed |= self
                .resources
                .delete_if_exists::<Service>(&namespace, &svc.name_any())
                .await?;
        }
        Ok(existed)
    }

    /// Delete daemon volume claims: all of them when data is wiped, else
    /// only state volumes on the configured storage class.
    async fn delete_volume_claims(&self, cluster: &AIStore) -> Result<bool> {
        let namespace = cluster.namespace_or_default();
        let wipe_data = cluster.should_cleanup_data();
        let state_class = cluster.spec.state_storage_class.as_deref();
        let mut existed = false;
        for role in [DaemonRole::Proxy, DaemonRole::Target] {
            let claims: Vec<PersistentVolumeClaim> = self
                .resources
                .list(&namespace, &role_selector(cluster, role))
                .await?;
            for claim in claims {
                let class = claim
                    .spec
                    .as_ref()
                    .and_then(|s| s.storage_class_name.as_deref());
                if !wipe_data && (state_class.is_none() || class != state_class) {
                    continue;
                }
                existed |= self
                    .resources
                    .delete_if_exists::<PersistentVolumeClaim>(&namespace, &claim.name_any())
                    .await?;
            }
        }
        Ok(existed)
    }

    /// One cleanup Job per recorded node, skipping nodes that already have one.
    async fn start_host_cleanup(&self, pass: &mut Pass) -> Result<()> {
        let existing: Vec<Job> = self
            .resources
            .list(
                &pass.cluster.namespace_or_default(),
                &cleanup_job_selector(&pass.cluster),
            )
            .await?;
        for node in &pass.status.host_cleanup_nodes {
            let prefix = cleanup_job_prefix(node);
            if existing.iter().any(|j| j.name_any().starts_with(&prefix)) {
                continue;
            }
            let job = self
                .resources
                .create(&generate_cleanup_job(&pass.cluster, node))
                .await?;
            info!(name = %pass.cluster.name_any(), node = %node, job = %job.name_any(), "Started host cleanup");
        }
        Ok(())
    }

    async fn host_cleanup(&self, pass: &mut Pass) -> Result<StepResult> {
        let namespace = pass.cluster.namespace_or_default();
        let jobs: Vec<Job> = self
            .resources
            .list(&namespace, &cleanup_job_selector(&pass.cluster))
            .await?;
        if jobs.is_empty() {
            self.transition(pass, ClusterEvent::HostCleanupComplete, &TransitionContext::new())
                .await?;
            return Ok(StepResult::immediately());
        }

        let now = jiff::Timestamp::now().as_second();
        let threshold = i64::try_from(STUCK_JOB_THRESHOLD.as_secs()).unwrap_or(i64::MAX);
        for job in &jobs {
            let name = job.name_any();
            if job_succeeded(job) || job_failed(job) {
                if job_failed(job) {
                    warn!(job = %name, "Host cleanup job failed");
                }
                self.resources.delete_if_exists::<Job>(&namespace, &name).await?;
            } else if job_age_secs(job, now).is_some_and(|age| age > threshold) {
                warn!(job = %name, "Host cleanup job stuck, force deleting");
                self.resources.force_delete::<Job>(&namespace, &name).await?;
            }
        }
        Ok(StepResult::RetryAfter(SHORT_RETRY))
    }

    async fn finalize(&self, pass: &mut Pass) -> Result<StepResult> {
        self.flush(pass).await?;
        remove_finalizer(self.resources.as_ref(), &pass.cluster).await?;
        self.provider.invalidate(&pass.cluster).await;
        info!(name = %pass.cluster.name_any(), "Released finalizer");
        self.finish(pass);
        Ok(StepResult::Done)
    }
}
