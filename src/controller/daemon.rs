//! Generic daemon group reconciliation.
//!
//! Proxies and targets share one scale/rollout loop. Role-specific behavior
//! (primary handoff, per-pod LoadBalancers, decommission policy) lives behind
//! the [`DaemonGroup`] hooks.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Node, Pod, PodTemplateSpec, Service};
use kube::ResourceExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::client::{ClusterApiProvider, ResourceClient};
use crate::controller::drift::template_drift;
use crate::controller::error::Result;
use crate::controller::reconciler::{Pass, Reconciler, ready_replicas, spec_replicas};
use crate::controller::step::{SHORT_RETRY, StepResult};
use crate::crd::{AIStore, AUTOSCALE_SIZE, AutoScaleStatus};
use crate::resources::DaemonRole;
use crate::resources::common::{role_selector, selector, statefulset_name};
use crate::resources::statefulset::{NODE_CONTAINER, daemon_spec, generate_statefulset};

/// Role-specific behavior of a daemon group.
#[async_trait]
pub trait DaemonGroup: Send + Sync {
    fn role(&self) -> DaemonRole;

    /// Runs before replicas are raised from `current` to `desired`.
    async fn prepare_scale_up(
        &self,
        _pass: &mut Pass,
        _current: i32,
        _desired: i32,
    ) -> Result<StepResult> {
        Ok(StepResult::Done)
    }

    /// Removes ordinals `desired..current` from the managed cluster.
    /// Replicas are lowered only once this returns [`StepResult::Done`].
    async fn scale_down(&self, pass: &mut Pass, current: i32, desired: i32)
    -> Result<StepResult>;

    /// Runs after replicas were lowered.
    async fn after_scale_down(&self, _pass: &mut Pass, _current: i32, _desired: i32) -> Result<()> {
        Ok(())
    }

    /// Replaces the StatefulSet's pod template.
    async fn rollout(
        &self,
        pass: &mut Pass,
        sts: &StatefulSet,
        template: &PodTemplateSpec,
    ) -> Result<StepResult>;

    /// Drives a rollout already in progress.
    async fn continue_rollout(&self, _pass: &mut Pass, _sts: &StatefulSet) -> Result<StepResult> {
        Ok(StepResult::Done)
    }
}

/// Whether a pod reports the Ready condition.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// First ingress IP (or hostname) assigned to a LoadBalancer service.
pub fn ingress_ip(svc: &Service) -> Option<String> {
    svc.status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .iter()
        .find_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
}

/// Merge patch replacing a pod template.
///
/// Merge patches merge maps key by key, so labels and annotations dropped
/// from the desired template are nulled explicitly.
pub fn template_patch(desired: &PodTemplateSpec, current: &PodTemplateSpec) -> Result<Value> {
    let mut template = serde_json::to_value(desired)?;
    if let Some(metadata) = template
        .as_object_mut()
        .map(|t| t.entry("metadata").or_insert_with(|| json!({})))
        .and_then(Value::as_object_mut)
    {
        let current_meta = current.metadata.as_ref();
        for (field, stale) in [
            ("labels", current_meta.and_then(|m| m.labels.as_ref())),
            ("annotations", current_meta.and_then(|m| m.annotations.as_ref())),
        ] {
            let Some(stale) = stale else { continue };
            let entry = metadata
                .entry(field)
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Some(map) = entry.as_object_mut() {
                for key in stale.keys() {
                    map.entry(key.clone()).or_insert(Value::Null);
                }
            }
        }
    }
    Ok(json!({ "spec": { "template": template } }))
}

/// Merge patch setting the rolling-update partition.
pub fn partition_patch(partition: i32) -> Value {
    json!({
        "spec": {
            "updateStrategy": {
                "type": "RollingUpdate",
                "rollingUpdate": { "partition": partition }
            }
        }
    })
}

/// Current rolling-update partition (0 when unset).
pub fn current_partition(sts: &StatefulSet) -> i32 {
    sts.spec
        .as_ref()
        .and_then(|s| s.update_strategy.as_ref())
        .and_then(|u| u.rolling_update.as_ref())
        .and_then(|r| r.partition)
        .unwrap_or(0)
}

/// StatefulSet controller finished rolling: every replica runs the desired
/// revision, no extra pods linger and all of them are ready.
pub fn statefulset_ready(sts: &StatefulSet, desired: i32) -> bool {
    let spec = spec_replicas(Some(sts));
    if spec != desired {
        return false;
    }
    let Some(status) = sts.status.as_ref() else {
        return desired == 0;
    };
    let rolling = status.update_revision.as_deref().is_some_and(|r| !r.is_empty());
    if rolling && status.updated_replicas.unwrap_or(0) != spec {
        return false;
    }
    status.replicas == spec && status.ready_replicas.unwrap_or(0) == spec
}

impl<R, P> Reconciler<R, P>
where
    R: ResourceClient + 'static,
    P: ClusterApiProvider + 'static,
{
    /// Desired replica count for a role; autoscaled roles count matching nodes.
    pub(crate) async fn desired_size(&self, pass: &mut Pass, role: DaemonRole) -> Result<i32> {
        let size = match role {
            DaemonRole::Proxy => pass.cluster.proxy_size(),
            DaemonRole::Target => pass.cluster.target_size(),
        };
        if size != AUTOSCALE_SIZE {
            return Ok(size.max(0));
        }

        let node_selector = selector(&daemon_spec(&pass.cluster, role).node_selector);
        let nodes: Vec<Node> = self.resources.list("", &node_selector).await?;
        let mut names: Vec<String> = nodes.iter().map(ResourceExt::name_any).collect();
        names.sort();

        let autoscale = pass
            .status
            .auto_scale_status
            .get_or_insert_with(AutoScaleStatus::default);
        let expected = match role {
            DaemonRole::Proxy => &mut autoscale.expected_proxy_nodes,
            DaemonRole::Target => &mut autoscale.expected_target_nodes,
        };
        if *expected != names {
            debug!(role = %role, nodes = ?names, "Autoscale node set changed");
            *expected = names;
        }
        Ok(i32::try_from(expected.len()).unwrap_or(i32::MAX))
    }

    /// One scale/rollout step for a daemon group.
    ///
    /// Returns [`StepResult::Done`] only when the StatefulSet runs the
    /// desired template at the desired size and every pod is ready.
    pub(crate) async fn reconcile_group<G: DaemonGroup>(
        &self,
        group: &G,
        pass: &mut Pass,
    ) -> Result<StepResult> {
        let role = group.role();
        let desired = self.desired_size(pass, role).await?;
        let cluster = pass.cluster.clone();
        let namespace = cluster.namespace_or_default();
        let name = statefulset_name(&cluster, role);

        let Some(sts) = self.resources.get::<StatefulSet>(&namespace, &name).await? else {
            warn!(name = %cluster.name_any(), role = %role, "StatefulSet missing, recreating");
            self.resources
                .create_if_not_exists(&generate_statefulset(&cluster, role, desired))
                .await?;
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        };

        let current = spec_replicas(Some(&sts));
        self.record_replicas(&cluster, role, desired, ready_replicas(Some(&sts)));

        if desired > current {
            pass.scaling = true;
            let prepared = group.prepare_scale_up(pass, current, desired).await?;
            if !prepared.is_done() {
                return Ok(prepared);
            }
            info!(name = %cluster.name_any(), role = %role, from = current, to = desired, "Scaling up");
            self.resources
                .update_statefulset_replicas(&namespace, &name, desired)
                .await?;
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        if desired < current {
            pass.scaling = true;
            let removed = group.scale_down(pass, current, desired).await?;
            if !removed.is_done() {
                return Ok(removed);
            }
            info!(name = %cluster.name_any(), role = %role, from = current, to = desired, "Scaling down");
            self.resources
                .update_statefulset_replicas(&namespace, &name, desired)
                .await?;
            group.after_scale_down(pass, current, desired).await?;
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }

        let template = generate_statefulset(&cluster, role, desired)
            .spec
            .map(|s| s.template)
            .unwrap_or_default();
        let stored = sts.spec.as_ref().map(|s| &s.template);
        if let Some(reason) = stored.and_then(|t| template_drift(&template, t)) {
            info!(name = %cluster.name_any(), role = %role, reason = %reason, "Pod template drifted");
            return group.rollout(pass, &sts, &template).await;
        }

        let rolling = group.continue_rollout(pass, &sts).await?;
        if !rolling.is_done() {
            return Ok(rolling);
        }

        if !statefulset_ready(&sts, desired) {
            debug!(name = %cluster.name_any(), role = %role, "Waiting for StatefulSet to settle");
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        if !self.pods_run_image(&cluster, role).await? {
            debug!(name = %cluster.name_any(), role = %role, "Waiting for pods to run the desired image");
            return Ok(StepResult::RetryAfter(SHORT_RETRY));
        }
        Ok(StepResult::Done)
    }

    /// Apply a new pod template with a plain merge patch.
    pub(crate) async fn patch_template(
        &self,
        cluster: &AIStore,
        sts: &StatefulSet,
        template: &PodTemplateSpec,
    ) -> Result<()> {
        let current = sts.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default();
        let patch = template_patch(template, &current)?;
        self.resources
            .patch::<StatefulSet>(&cluster.namespace_or_default(), &sts.name_any(), &patch)
            .await?;
        Ok(())
    }

    /// Every live pod runs the spec's node image, not just the template.
    async fn pods_run_image(&self, cluster: &AIStore, role: DaemonRole) -> Result<bool> {
        let pods: Vec<Pod> = self
            .resources
            .list(&cluster.namespace_or_default(), &role_selector(cluster, role))
            .await?;
        Ok(pods.iter().all(|pod| {
            pod.spec
                .as_ref()
                .and_then(|s| s.containers.iter().find(|c| c.name == NODE_CONTAINER))
                .is_none_or(|c| c.image.as_deref() == Some(cluster.spec.node_image.as_str()))
        }))
    }

    fn record_replicas(&self, cluster: &AIStore, role: DaemonRole, desired: i32, ready: i32) {
        if let Some(health_state) = self.health_state() {
            health_state.metrics.set_cluster_replicas(
                &cluster.namespace_or_default(),
                &cluster.name_any(),
                role.as_str(),
                i64::from(desired),
                i64::from(ready),
            );
        }
    }
}
