//! Drives the real reconciler against the in-memory store and fake cluster.
//!
//! `settle` plays the part of the other controllers: the StatefulSet
//! controller (pods, revisions, partitions, PVCs), the kubelet (readiness),
//! the EndpointSlice controller, the cloud LoadBalancer controller and the
//! Job controller. Scenarios alternate `reconcile` and `settle` until the
//! resource reaches the state under test.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ais_operator::client::Snode;
use ais_operator::controller::error::Result;
use ais_operator::controller::reconciler::Reconciler;
use ais_operator::crd::{AIStore, ClusterState};
use ais_operator::health::HealthState;
use kube::runtime::controller::Action;
use serde_json::{Value, json};

use crate::mock_cluster::{FakeClusterApi, FakeProvider, snode};
use crate::mock_resources::{Journal, MockResources, merge_patch};

pub const NS: &str = "ais";
pub const NAME: &str = "ais";
pub const PROXY_STS: &str = "ais-proxy";
pub const TARGET_STS: &str = "ais-target";

const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";
const REVISION_LABEL: &str = "controller-revision-hash";
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Minimal valid spec: three proxies and three targets on host-path state.
pub fn base_spec() -> Value {
    json!({
        "size": 3,
        "nodeImage": "aistorage/aisnode:v3.28",
        "initImage": "aistorage/ais-init:v3.28"
    })
}

pub struct Harness {
    pub resources: Arc<MockResources>,
    pub api: Arc<FakeClusterApi>,
    pub provider: Arc<FakeProvider>,
    pub reconciler: Reconciler<MockResources, FakeProvider>,
    pub journal: Journal,
    pub health: Arc<HealthState>,
    /// Cloud controller hands out LoadBalancer IPs.
    pub assign_lb_ips: AtomicBool,
    /// Cleanup Jobs finish on the next settle.
    pub complete_jobs: AtomicBool,
    revisions: std::sync::Mutex<Vec<Value>>,
}

impl Harness {
    pub fn new(spec: Value) -> Self {
        let journal = Journal::default();
        let resources = Arc::new(MockResources::new(journal.clone()));
        let api = Arc::new(FakeClusterApi::new(journal.clone()));
        let provider = Arc::new(FakeProvider::new(api.clone()));
        let health = Arc::new(HealthState::new());
        let reconciler = Reconciler::new(resources.clone(), provider.clone())
            .with_health_state(Some(health.clone()));

        resources.insert_value(
            ("AIStore".to_string(), NS.to_string(), NAME.to_string()),
            json!({
                "apiVersion": "ais.nvidia.com/v1beta1",
                "kind": "AIStore",
                "metadata": {"name": NAME, "namespace": NS, "generation": 1},
                "spec": spec
            }),
        );

        Self {
            resources,
            api,
            provider,
            reconciler,
            journal,
            health,
            assign_lb_ips: AtomicBool::new(true),
            complete_jobs: AtomicBool::new(true),
            revisions: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn cluster(&self) -> Option<AIStore> {
        self.resources
            .get_value("AIStore", NS, NAME)
            .map(|v| serde_json::from_value(v).unwrap())
    }

    pub fn state(&self) -> Option<ClusterState> {
        self.cluster().map(|c| c.state())
    }

    /// One reconcile of the stored resource.
    pub async fn reconcile(&self) -> Result<Action> {
        match self.cluster() {
            Some(cluster) => self.reconciler.reconcile(&cluster).await,
            None => Ok(Action::await_change()),
        }
    }

    /// Reconcile and settle until `done` holds. Returns false on timeout.
    pub async fn run_until(&self, max_passes: usize, done: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..max_passes {
            let _ = self.reconcile().await;
            self.settle();
            if done(self) {
                return true;
            }
        }
        false
    }

    pub async fn run_until_state(&self, state: ClusterState, max_passes: usize) -> bool {
        self.run_until(max_passes, |h| h.state() == Some(state)).await
    }

    /// Create the cluster and wait for Ready.
    pub async fn ready(spec: Value) -> Self {
        let h = Self::new(spec);
        assert!(
            h.run_until_state(ClusterState::Ready, 30).await,
            "cluster never became Ready: {:?}",
            h.states()
        );
        h
    }

    /// Merge-patch the spec the way `kubectl patch --type merge` would.
    pub fn update_spec(&self, patch: Value) {
        self.resources.mutate("AIStore", NS, NAME, |obj| {
            merge_patch(&mut obj["spec"], &patch);
            let generation = obj["metadata"]["generation"].as_i64().unwrap_or(1);
            obj["metadata"]["generation"] = json!(generation + 1);
            obj["metadata"]["resourceVersion"] = json!(format!("spec-{}", generation + 1));
        });
    }

    /// `kubectl delete`: the finalizer keeps the object around.
    pub fn delete(&self) {
        self.resources.mutate("AIStore", NS, NAME, |obj| {
            obj["metadata"]["deletionTimestamp"] = json!(jiff::Timestamp::now().to_string());
        });
    }

    pub fn add_node(&self, name: &str, labels: Value) {
        self.resources.insert_value(
            ("Node".to_string(), String::new(), name.to_string()),
            json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": {"name": name, "labels": labels}
            }),
        );
    }

    /// Backdate every cleanup Job.
    pub fn age_jobs(&self, secs: i64) {
        let created = jiff::Timestamp::now()
            .checked_sub(jiff::SignedDuration::from_secs(secs))
            .unwrap();
        for name in self.resources.names_of("Job") {
            self.resources.mutate("Job", NS, &name, |job| {
                job["metadata"]["creationTimestamp"] = json!(created.to_string());
            });
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    /// Index of the first journal entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.journal().iter().position(|e| e == entry)
    }

    pub fn position_prefix(&self, prefix: &str) -> Option<usize> {
        self.journal().iter().position(|e| e.starts_with(prefix))
    }

    /// States written to the status, in order.
    pub fn states(&self) -> Vec<String> {
        self.resources.states.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.resources.events.lock().unwrap().clone()
    }

    pub fn has_event(&self, type_: &str, reason: &str) -> bool {
        self.events()
            .iter()
            .any(|(t, r)| t == type_ && r == reason)
    }

    pub fn statefulset(&self, name: &str) -> Option<Value> {
        self.resources.get_value("StatefulSet", NS, name)
    }

    pub fn replicas(&self, name: &str) -> Option<i64> {
        self.statefulset(name)
            .and_then(|s| s["spec"]["replicas"].as_i64())
    }

    pub fn partition(&self, name: &str) -> i64 {
        self.statefulset(name)
            .and_then(|s| s["spec"]["updateStrategy"]["rollingUpdate"]["partition"].as_i64())
            .unwrap_or(0)
    }

    pub fn pod_names(&self, sts: &str) -> Vec<String> {
        self.resources
            .names_of("Pod")
            .into_iter()
            .filter(|n| ordinal_of(n, sts).is_some())
            .collect()
    }

    /// Simulate everything that happens between two reconciles.
    pub fn settle(&self) {
        let proxies = self.settle_statefulset(PROXY_STS);
        let targets = self.settle_statefulset(TARGET_STS);
        self.settle_endpoints(&proxies);
        self.settle_load_balancers();
        self.settle_jobs();

        let members = |pods: &[String], sts: &str, prefix: &str, kind: &str| -> Vec<Snode> {
            pods.iter()
                .filter_map(|pod| {
                    let ordinal = ordinal_of(pod, sts)?;
                    let host = format!("{pod}.{sts}.{NS}.svc.cluster.local");
                    Some(snode(&format!("{prefix}{ordinal}"), kind, &host))
                })
                .collect()
        };
        self.api.sync_membership(
            members(&proxies, PROXY_STS, "p", "proxy"),
            members(&targets, TARGET_STS, "t", "target"),
        );
    }

    /// Revision name of a pod template.
    fn revision(&self, name: &str, template: &Value) -> String {
        let mut revisions = self.revisions.lock().unwrap();
        let index = match revisions.iter().position(|t| t == template) {
            Some(i) => i,
            None => {
                revisions.push(template.clone());
                revisions.len() - 1
            }
        };
        format!("{name}-rev{index}")
    }

    fn template_of(&self, revision: &str) -> Option<Value> {
        let index: usize = revision.rsplit_once("-rev")?.1.parse().ok()?;
        self.revisions.lock().unwrap().get(index).cloned()
    }

    /// StatefulSet controller for one set. Returns the names of ready pods.
    fn settle_statefulset(&self, name: &str) -> Vec<String> {
        let existing = self.pod_names(name);
        let Some(sts) = self.statefulset(name) else {
            for pod in existing {
                self.resources.remove_value("Pod", NS, &pod);
            }
            return Vec::new();
        };

        let replicas = sts["spec"]["replicas"].as_i64().unwrap_or(1);
        let partition = sts["spec"]["updateStrategy"]["rollingUpdate"]["partition"]
            .as_i64()
            .unwrap_or(0);
        let template = sts["spec"]["template"].clone();
        let update_revision = self.revision(name, &template);
        let current_revision = sts["status"]["currentRevision"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| update_revision.clone());

        for pod in &existing {
            if ordinal_of(pod, name).is_some_and(|o| o >= replicas) {
                self.resources.remove_value("Pod", NS, pod);
            }
        }

        for ordinal in 0..replicas {
            let pod = format!("{name}-{ordinal}");
            let have = self
                .resources
                .get_value("Pod", NS, &pod)
                .and_then(|p| p["metadata"]["labels"][REVISION_LABEL].as_str().map(str::to_string));
            let want = if ordinal >= partition {
                update_revision.clone()
            } else {
                have.clone().unwrap_or_else(|| current_revision.clone())
            };
            if have.as_deref() != Some(want.as_str()) {
                let template = self.template_of(&want).unwrap_or_else(|| template.clone());
                self.resources.insert_value(
                    ("Pod".to_string(), NS.to_string(), pod.clone()),
                    pod_from_template(&pod, ordinal, &want, &template),
                );
            }
            self.ensure_claims(&sts, &pod);
        }

        let revisions: Vec<String> = (0..replicas)
            .filter_map(|o| self.resources.get_value("Pod", NS, &format!("{name}-{o}")))
            .filter_map(|p| p["metadata"]["labels"][REVISION_LABEL].as_str().map(str::to_string))
            .collect();
        let updated = revisions.iter().filter(|r| **r == update_revision).count();
        let current_revision = if updated as i64 == replicas {
            update_revision.clone()
        } else {
            current_revision
        };
        let current = revisions.iter().filter(|r| **r == current_revision).count();

        self.resources.mutate("StatefulSet", NS, name, |sts| {
            sts["status"] = json!({
                "observedGeneration": 1,
                "replicas": revisions.len(),
                "readyReplicas": revisions.len(),
                "availableReplicas": revisions.len(),
                "updatedReplicas": updated,
                "currentReplicas": current,
                "currentRevision": current_revision,
                "updateRevision": update_revision,
            });
        });

        (0..replicas)
            .map(|o| format!("{name}-{o}"))
            .filter(|p| self.resources.get_value("Pod", NS, p).is_some())
            .collect()
    }

    /// PVCs from volumeClaimTemplates; never deleted by the StatefulSet.
    fn ensure_claims(&self, sts: &Value, pod: &str) {
        let Some(templates) = sts["spec"]["volumeClaimTemplates"].as_array() else {
            return;
        };
        for template in templates {
            let claim = format!("{}-{pod}", template["metadata"]["name"].as_str().unwrap_or(""));
            if self.resources.get_value("PersistentVolumeClaim", NS, &claim).is_some() {
                continue;
            }
            self.resources.insert_value(
                ("PersistentVolumeClaim".to_string(), NS.to_string(), claim.clone()),
                json!({
                    "apiVersion": "v1",
                    "kind": "PersistentVolumeClaim",
                    "metadata": {
                        "name": claim,
                        "namespace": NS,
                        "labels": template["metadata"]["labels"].clone()
                    },
                    "spec": template["spec"].clone()
                }),
            );
        }
    }

    /// EndpointSlice for the proxy headless service.
    fn settle_endpoints(&self, proxies: &[String]) {
        let slice = format!("{PROXY_STS}-abcde");
        let service_exists = self.resources.get_value("Service", NS, PROXY_STS).is_some();
        if proxies.is_empty() || !service_exists {
            self.resources.remove_value("EndpointSlice", NS, &slice);
            return;
        }
        let endpoints: Vec<Value> = proxies
            .iter()
            .filter_map(|p| ordinal_of(p, PROXY_STS))
            .map(|o| json!({"addresses": [format!("10.1.0.{o}")], "conditions": {"ready": true}}))
            .collect();
        self.resources.insert_value(
            ("EndpointSlice".to_string(), NS.to_string(), slice.clone()),
            json!({
                "apiVersion": "discovery.k8s.io/v1",
                "kind": "EndpointSlice",
                "metadata": {
                    "name": slice,
                    "namespace": NS,
                    "labels": {SERVICE_NAME_LABEL: PROXY_STS}
                },
                "addressType": "IPv4",
                "endpoints": endpoints
            }),
        );
    }

    fn settle_load_balancers(&self) {
        if !self.assign_lb_ips.load(Ordering::SeqCst) {
            return;
        }
        for (i, name) in self.resources.names_of("Service").into_iter().enumerate() {
            self.resources.mutate("Service", NS, &name, |svc| {
                let is_lb = svc["spec"]["type"] == json!("LoadBalancer");
                if is_lb && svc["status"]["loadBalancer"]["ingress"].is_null() {
                    svc["status"] = json!({"loadBalancer": {"ingress": [{"ip": format!("34.0.0.{i}")}]}});
                }
            });
        }
    }

    fn settle_jobs(&self) {
        if !self.complete_jobs.load(Ordering::SeqCst) {
            return;
        }
        for name in self.resources.names_of("Job") {
            self.resources.mutate("Job", NS, &name, |job| {
                job["status"] = json!({"succeeded": 1});
            });
        }
    }

    /// Proxy and target counts as the fake cluster sees them.
    pub fn membership(&self) -> (usize, usize) {
        let state = self.api.state.lock().unwrap();
        (state.proxies.len(), state.targets.len())
    }

    /// Labels of a stored object.
    pub fn labels(&self, kind: &str, name: &str) -> BTreeMap<String, String> {
        self.resources
            .get_value(kind, NS, name)
            .and_then(|v| serde_json::from_value(v["metadata"]["labels"].clone()).ok())
            .unwrap_or_default()
    }
}

/// Ordinal of `pod` if it belongs to StatefulSet `sts`.
pub fn ordinal_of(pod: &str, sts: &str) -> Option<i64> {
    pod.strip_prefix(sts)?.strip_prefix('-')?.parse().ok()
}

fn pod_from_template(name: &str, ordinal: i64, revision: &str, template: &Value) -> Value {
    let mut labels = template["metadata"]["labels"].clone();
    if !labels.is_object() {
        labels = json!({});
    }
    labels[POD_NAME_LABEL] = json!(name);
    labels[REVISION_LABEL] = json!(revision);

    let mut spec = template["spec"].clone();
    spec["nodeName"] = json!(format!("node-{ordinal}"));

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": NS,
            "labels": labels,
            "annotations": template["metadata"]["annotations"].clone()
        },
        "spec": spec,
        "status": {
            "phase": "Running",
            "hostIP": format!("10.0.0.{ordinal}"),
            "podIP": format!("10.1.0.{ordinal}"),
            "conditions": [{"type": "Ready", "status": "True"}]
        }
    })
}
