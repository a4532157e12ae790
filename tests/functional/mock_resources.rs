//! In-memory Kubernetes object store implementing `ResourceClient`.
//!
//! Objects are kept as JSON keyed by (kind, namespace, name). Every write
//! that changes something is appended to the shared journal, so tests can
//! assert both on the resulting objects and on the order of side effects.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ais_operator::client::resources::with_resource_version;
use ais_operator::client::{ManagedResource, ResourceClient};
use ais_operator::controller::error::{Error, Result};
use ais_operator::crd::{AIStore, AIStoreStatus};
use async_trait::async_trait;
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::{Value, json};

/// Ordered log of side effects, shared with the fake cluster API.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub type Key = (String, String, String);

pub fn not_found(name: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{name} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

fn conflict(name: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{name} was modified"),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    let Value::Object(obj) = target else {
        return;
    };
    for (k, v) in patch {
        if v.is_null() {
            obj.remove(k);
        } else {
            merge_patch(obj.entry(k.clone()).or_insert(Value::Null), v);
        }
    }
}

/// Equality label selector match (`k=v,k=v`; empty matches everything).
pub fn selector_matches(selector: &str, obj: &Value) -> bool {
    let labels = &obj["metadata"]["labels"];
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => labels[k].as_str() == Some(v),
            None => false,
        })
}

/// Comparable form of an object: without server-managed fields.
fn comparable(obj: &Value) -> Value {
    let mut obj = obj.clone();
    if let Some(map) = obj.as_object_mut() {
        map.remove("status");
    }
    if let Some(meta) = obj["metadata"].as_object_mut() {
        meta.remove("resourceVersion");
        meta.remove("creationTimestamp");
        meta.remove("uid");
    }
    obj
}

#[derive(Default)]
pub struct MockResources {
    pub objects: Mutex<BTreeMap<Key, Value>>,
    pub journal: Journal,
    /// (type, reason) of every published event.
    pub events: Mutex<Vec<(String, String)>>,
    /// Every state the AIStore status was written with, in order.
    pub states: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl MockResources {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    pub fn key_of<K: ManagedResource>(namespace: &str, name: &str) -> Key {
        (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
    }

    fn key_for<K: ManagedResource>(obj: &K) -> Key {
        Self::key_of::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any())
    }

    /// Insert or replace an object, stamping server-side metadata.
    pub fn insert_value(&self, key: Key, mut value: Value) {
        value["metadata"]["resourceVersion"] = json!(self.next().to_string());
        if value["metadata"]["creationTimestamp"].is_null() {
            value["metadata"]["creationTimestamp"] = json!(jiff::Timestamp::now().to_string());
        }
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = json!(format!("uid-{}", self.next()));
        }
        self.objects.lock().unwrap().insert(key, value);
    }

    pub fn get_value(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn remove_value(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(kind.to_string(), namespace.to_string(), name.to_string()))
    }

    /// All objects of a kind.
    pub fn values_of(&self, kind: &str) -> Vec<Value> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _, _), _)| k == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Names of all objects of a kind.
    pub fn names_of(&self, kind: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| k == kind)
            .map(|(_, _, n)| n.clone())
            .collect()
    }

    /// Update a stored object in place without journaling.
    pub fn mutate(&self, kind: &str, namespace: &str, name: &str, f: impl FnOnce(&mut Value)) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(v) = objects.get_mut(&(kind.to_string(), namespace.to_string(), name.to_string()))
        {
            f(v);
        }
    }

    fn typed<K: ManagedResource>(value: Value) -> Result<K> {
        Ok(serde_json::from_value(value)?)
    }

    /// Apply a patch to the stored AIStore the way the API server would.
    fn patch_stored_cluster(&self, cluster: &AIStore, body: Value, status_only: bool) -> Result<AIStore> {
        let key = Self::key_of::<AIStore>(&cluster.namespace_or_default(), &cluster.name_any());
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(not_found(&cluster.name_any()));
        };
        let stored_rv = stored["metadata"]["resourceVersion"].clone();
        if body["metadata"]["resourceVersion"] != stored_rv {
            return Err(conflict(&cluster.name_any()));
        }
        let mut body = body;
        if let Some(meta) = body["metadata"].as_object_mut() {
            meta.remove("resourceVersion");
        }
        if status_only {
            merge_patch(&mut stored["status"], &body["status"]);
        } else {
            if let Some(map) = body.as_object_mut() {
                map.remove("status");
            }
            merge_patch(stored, &body);
        }
        stored["metadata"]["resourceVersion"] = json!(self.next().to_string());

        let finalizers_gone = stored["metadata"]["finalizers"]
            .as_array()
            .is_none_or(Vec::is_empty);
        let result: AIStore = serde_json::from_value(stored.clone())?;
        if finalizers_gone && !stored["metadata"]["deletionTimestamp"].is_null() {
            objects.remove(&key);
        }
        Ok(result)
    }
}

#[async_trait]
impl ResourceClient for MockResources {
    async fn apply<K: ManagedResource>(&self, obj: &K) -> Result<bool> {
        let key = Self::key_for(obj);
        let value = serde_json::to_value(obj)?;
        let existing = self.objects.lock().unwrap().get(&key).cloned();
        match existing {
            Some(stored) if comparable(&stored) == comparable(&value) => Ok(false),
            Some(stored) => {
                let mut value = value;
                value["status"] = stored["status"].clone();
                value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
                value["metadata"]["creationTimestamp"] =
                    stored["metadata"]["creationTimestamp"].clone();
                self.insert_value(key.clone(), value);
                self.log(format!("update {} {}", key.0, key.2));
                Ok(true)
            }
            None => {
                self.insert_value(key.clone(), value);
                self.log(format!("create {} {}", key.0, key.2));
                Ok(true)
            }
        }
    }

    async fn create_if_not_exists<K: ManagedResource>(&self, obj: &K) -> Result<bool> {
        let key = Self::key_for(obj);
        if self.objects.lock().unwrap().contains_key(&key) {
            return Ok(false);
        }
        self.insert_value(key.clone(), serde_json::to_value(obj)?);
        self.log(format!("create {} {}", key.0, key.2));
        Ok(true)
    }

    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K> {
        let mut value = serde_json::to_value(obj)?;
        let name = match (obj.meta().name.clone(), obj.meta().generate_name.clone()) {
            (Some(name), _) => name,
            (None, Some(prefix)) => format!("{prefix}{:05}", self.next()),
            (None, None) => return Err(Error::MissingField("metadata.name".to_string())),
        };
        value["metadata"]["name"] = json!(name);
        let key = Self::key_of::<K>(&obj.namespace().unwrap_or_default(), &name);
        self.insert_value(key.clone(), value);
        self.log(format!("create {} {}", key.0, key.2));
        let stored = self.objects.lock().unwrap().get(&key).cloned().unwrap();
        Self::typed(stored)
    }

    async fn delete_if_exists<K: ManagedResource>(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = Self::key_of::<K>(namespace, name);
        let existed = self.objects.lock().unwrap().remove(&key).is_some();
        if existed {
            self.log(format!("delete {} {}", key.0, key.2));
        }
        Ok(existed)
    }

    async fn force_delete<K: ManagedResource>(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = Self::key_of::<K>(namespace, name);
        let existed = self.objects.lock().unwrap().remove(&key).is_some();
        if existed {
            self.log(format!("force-delete {} {}", key.0, key.2));
        }
        Ok(existed)
    }

    async fn get<K: ManagedResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let key = Self::key_of::<K>(namespace, name);
        let value = self.objects.lock().unwrap().get(&key).cloned();
        value.map(Self::typed).transpose()
    }

    async fn list<K: ManagedResource>(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let values: Vec<Value> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, ns, _), v)| {
                *k == kind && (namespace.is_empty() || ns == namespace) && selector_matches(selector, v)
            })
            .map(|(_, v)| v.clone())
            .collect();
        values.into_iter().map(Self::typed).collect()
    }

    async fn patch<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let key = Self::key_of::<K>(namespace, name);
        let patched = {
            let mut objects = self.objects.lock().unwrap();
            let Some(stored) = objects.get_mut(&key) else {
                return Err(not_found(name));
            };
            let before = stored.clone();
            merge_patch(stored, patch);
            let changed = *stored != before;
            if changed {
                stored["metadata"]["resourceVersion"] = json!(self.next().to_string());
            }
            (stored.clone(), changed)
        };
        if patched.1 {
            self.log(format!("patch {} {}", key.0, key.2));
        }
        Self::typed(patched.0)
    }

    async fn update_statefulset_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<bool> {
        let key = ("StatefulSet".to_string(), namespace.to_string(), name.to_string());
        let changed = {
            let mut objects = self.objects.lock().unwrap();
            let Some(stored) = objects.get_mut(&key) else {
                return Err(not_found(name));
            };
            if stored["spec"]["replicas"] == json!(replicas) {
                false
            } else {
                stored["spec"]["replicas"] = json!(replicas);
                true
            }
        };
        if changed {
            self.log(format!("scale {name} {replicas}"));
        }
        Ok(changed)
    }

    async fn patch_cluster(&self, cluster: &AIStore, patch: &Value) -> Result<AIStore> {
        let body = with_resource_version(cluster, patch.clone());
        let result = self.patch_stored_cluster(cluster, body, false)?;
        self.log(format!("patch-cluster {}", cluster.name_any()));
        Ok(result)
    }

    async fn patch_cluster_status(&self, cluster: &AIStore, status: &AIStoreStatus) -> Result<AIStore> {
        let body = with_resource_version(cluster, json!({ "status": status }));
        let result = self.patch_stored_cluster(cluster, body, true)?;
        let state = status.state.to_string();
        let mut states = self.states.lock().unwrap();
        if states.last() != Some(&state) {
            self.log(format!("state {state}"));
            states.push(state);
        } else {
            self.log("status".to_string());
        }
        Ok(result)
    }

    async fn publish_event(
        &self,
        _cluster: &AIStore,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        let type_ = match type_ {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        };
        self.events
            .lock()
            .unwrap()
            .push((type_.to_string(), reason.to_string()));
    }
}
