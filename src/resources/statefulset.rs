//! StatefulSet generation for AIS daemons.
//!
//! Proxies and targets each run as one StatefulSet:
//! - Stable network identity via the role's headless service
//! - An init container rendering the local daemon config
//! - Daemon state on a host path or on a dynamically provisioned volume
//! - Target mountpaths as PVC templates
//! - Parallel pod management with a partitioned rolling update, so the
//!   operator can hold back ordinal 0 during proxy rollouts

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    CSIVolumeSource, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, EnvVarSource, HTTPGetAction, HostPathVolumeSource, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
    SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::{AIStore, DaemonSpec, RESTART_HASH_ANNOTATION, TlsMode};
use crate::resources::certificate::certificate_secret_name;
use crate::resources::common::{
    DaemonRole, global_configmap_name, headless_service_name, owned_meta,
    rbac_name, role_labels, statefulset_name, statsd_configmap_name,
};

/// Name of the main daemon container.
pub const NODE_CONTAINER: &str = "ais-node";
/// Name of the init container.
pub const INIT_CONTAINER: &str = "populate-env";
/// Name of the optional log sidecar.
pub const LOG_SIDECAR: &str = "ais-logs";

/// Container-internal location of the daemon's persistent state.
pub const STATE_DIR: &str = "/etc/ais";
const CONFIG_TEMPLATE_DIR: &str = "/var/ais_config_template";
const CONFIG_DIR: &str = "/var/ais_config";
const GLOBAL_CONFIG_DIR: &str = "/var/global_config";
const STATSD_DIR: &str = "/var/statsd_config";
const LOGS_DIR: &str = "/var/log/ais";
/// Where TLS material is mounted in daemon containers.
pub const CERTS_DIR: &str = "/var/certs";

const CONFIG_TEMPLATE_VOLUME: &str = "config-template";
const CONFIG_VOLUME: &str = "config-mount";
const CONFIG_GLOBAL_VOLUME: &str = "config-global";
const STATSD_VOLUME: &str = "statsd-config";
const LOGS_VOLUME: &str = "logs-dir";
const TLS_VOLUME: &str = "tls-certs";
/// Volume (or PVC template) holding daemon state.
pub const STATE_VOLUME: &str = "state-mount";

const STATE_VOLUME_SIZE: &str = "1Gi";
const CSI_DRIVER: &str = "csi.cert-manager.io";
const TERMINATION_GRACE_PERIOD: i64 = 60;

/// Generate the StatefulSet for one daemon role.
pub fn generate_statefulset(cluster: &AIStore, role: DaemonRole, replicas: i32) -> StatefulSet {
    let labels = role_labels(cluster, role);

    StatefulSet {
        metadata: owned_meta(cluster, statefulset_name(cluster, role), labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: Some(headless_service_name(cluster, role)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            template: generate_pod_template(cluster, role, labels),
            volume_claim_templates: non_empty(generate_pvc_templates(cluster, role)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Daemon settings for a role.
pub fn daemon_spec(cluster: &AIStore, role: DaemonRole) -> &DaemonSpec {
    match role {
        DaemonRole::Proxy => &cluster.spec.proxy_spec,
        DaemonRole::Target => &cluster.spec.target_spec,
    }
}

/// Service port of a role.
pub fn role_port(cluster: &AIStore, role: DaemonRole) -> i32 {
    match role {
        DaemonRole::Proxy => cluster.proxy_port(),
        DaemonRole::Target => cluster.target_port(),
    }
}

fn generate_pod_template(
    cluster: &AIStore,
    role: DaemonRole,
    selector_labels: BTreeMap<String, String>,
) -> PodTemplateSpec {
    let spec = daemon_spec(cluster, role);

    let mut labels = spec.labels.clone();
    // Selector labels win over user labels.
    labels.extend(selector_labels);

    let mut annotations = spec.annotations.clone();
    if let Some(hash) = cluster.restart_hash() {
        annotations.insert(RESTART_HASH_ANNOTATION.to_string(), hash.to_string());
    }

    let mut containers = vec![generate_node_container(cluster, role)];
    if let Some(image) = &cluster.spec.log_sidecar_image {
        containers.push(generate_log_sidecar(image, role));
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations: non_empty_map(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            service_account_name: Some(rbac_name(cluster)),
            init_containers: Some(vec![generate_init_container(cluster, role)]),
            containers,
            volumes: Some(generate_volumes(cluster, role)),
            node_selector: non_empty_map(spec.node_selector.clone()),
            tolerations: non_empty(spec.tolerations.clone()),
            priority_class_name: spec.priority_class_name.clone(),
            ..Default::default()
        }),
    }
}

fn env_value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_init_container(cluster: &AIStore, role: DaemonRole) -> Container {
    let mut env = vec![
        env_field("MY_NODE", "spec.nodeName"),
        env_field("MY_POD", "metadata.name"),
        env_value("K8S_NS", cluster.namespace_or_default()),
        env_value("MY_SERVICE", headless_service_name(cluster, role)),
        env_value("AIS_NODE_ROLE", role.as_str()),
        env_value(
            "AIS_PUBLIC_HOSTNAME_ENABLED",
            cluster.spec.enable_external_lb.to_string(),
        ),
    ];
    if role == DaemonRole::Proxy {
        env.push(env_value(
            "AIS_DEFAULT_PRIMARY",
            format!("{}-0", statefulset_name(cluster, DaemonRole::Proxy)),
        ));
    }

    Container {
        name: INIT_CONTAINER.to_string(),
        image: Some(cluster.spec.init_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["aisinit".to_string()]),
        args: Some(vec![
            format!("-role={role}"),
            format!("-local_config_template={CONFIG_TEMPLATE_DIR}/ais_local_{role}.json"),
            format!("-output_local_config={CONFIG_DIR}/ais_local.json"),
        ]),
        env: Some(env),
        volume_mounts: Some(vec![
            mount(CONFIG_TEMPLATE_VOLUME, CONFIG_TEMPLATE_DIR),
            mount(CONFIG_VOLUME, CONFIG_DIR),
            mount(CONFIG_GLOBAL_VOLUME, GLOBAL_CONFIG_DIR),
        ]),
        ..Default::default()
    }
}

fn generate_node_container(cluster: &AIStore, role: DaemonRole) -> Container {
    let spec = daemon_spec(cluster, role);
    let port = role_port(cluster, role);

    let mut args = vec![
        format!("-config={CONFIG_DIR}/ais.json"),
        format!("-local_config={CONFIG_DIR}/ais_local.json"),
        format!("-role={role}"),
    ];
    if role == DaemonRole::Proxy {
        args.push(format!("-ntargets={}", cluster.target_size().max(0)));
    }

    let mut env = vec![
        env_field("MY_POD", "metadata.name"),
        env_value("K8S_NS", cluster.namespace_or_default()),
        env_value("AIS_NODE_ROLE", role.as_str()),
        env_value("STATSD_CONF_FILE", format!("{STATSD_DIR}/statsd.json")),
    ];
    env.extend(spec.env.iter().cloned());

    Container {
        name: NODE_CONTAINER.to_string(),
        image: Some(cluster.spec.node_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["aisnode".to_string()]),
        args: Some(args),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: spec.resources.clone(),
        security_context: spec.security_context.clone(),
        volume_mounts: Some(generate_volume_mounts(cluster, role)),
        liveness_probe: Some(health_probe(cluster, "/v1/health", 30, 5)),
        readiness_probe: Some(health_probe(cluster, "/v1/health?readiness=true", 5, 3)),
        ..Default::default()
    }
}

fn health_probe(cluster: &AIStore, path: &str, period: i32, failures: i32) -> Probe {
    let scheme = if cluster.use_https() { "HTTPS" } else { "HTTP" };
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String("http".to_string()),
            scheme: Some(scheme.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(period),
        timeout_seconds: Some(5),
        failure_threshold: Some(failures),
        ..Default::default()
    }
}

/// Redirects the daemon's log file to the pod's stdout.
fn generate_log_sidecar(image: &str, role: DaemonRole) -> Container {
    Container {
        name: LOG_SIDECAR.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("tail -n+1 -F {LOGS_DIR}/ais{role}.INFO"),
        ]),
        volume_mounts: Some(vec![mount(LOGS_VOLUME, LOGS_DIR)]),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        read_only: Some(true),
        ..mount(name, path)
    }
}

fn configmap_volume(name: &str, configmap: String) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(name: String, secret: String) -> Volume {
    Volume {
        name,
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Host directory holding a role's state: `<prefix>/<namespace>/<name>/<role>`.
pub fn hostpath_state_dir(cluster: &AIStore, role: DaemonRole) -> String {
    format!(
        "{}/{}/{}/{}",
        cluster.spec.hostpath_prefix.trim_end_matches('/'),
        cluster.namespace_or_default(),
        cluster.name_any(),
        role
    )
}

/// Volume name for a cloud backend credentials secret.
fn cloud_volume_name(provider: &str) -> String {
    format!("{provider}-creds")
}

/// Volume name of a target mountpath, e.g. `/ais/disk1` -> `ais-disk1`.
pub fn mount_volume_name(path: &str) -> String {
    path.trim_matches('/').replace('/', "-")
}

fn generate_volumes(cluster: &AIStore, role: DaemonRole) -> Vec<Volume> {
    let mut volumes = vec![
        configmap_volume(CONFIG_TEMPLATE_VOLUME, global_configmap_name(cluster)),
        Volume {
            name: CONFIG_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        configmap_volume(CONFIG_GLOBAL_VOLUME, global_configmap_name(cluster)),
        configmap_volume(STATSD_VOLUME, statsd_configmap_name(cluster)),
        Volume {
            name: LOGS_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ];

    if cluster.uses_hostpath_state() {
        volumes.push(Volume {
            name: STATE_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: hostpath_state_dir(cluster, role),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        });
    }

    for (provider, secret) in &cluster.spec.cloud_secrets {
        volumes.push(secret_volume(cloud_volume_name(provider), secret.clone()));
    }

    if let Some(tls) = &cluster.spec.tls {
        match tls.mode {
            TlsMode::CertManagerCsi => {
                let service = statefulset_name(cluster, role);
                let mut attributes = BTreeMap::new();
                if let Some(issuer) = &tls.issuer_ref {
                    attributes.insert(
                        "csi.cert-manager.io/issuer-name".to_string(),
                        issuer.name.clone(),
                    );
                    attributes.insert(
                        "csi.cert-manager.io/issuer-kind".to_string(),
                        issuer.kind.clone(),
                    );
                }
                attributes.insert(
                    "csi.cert-manager.io/dns-names".to_string(),
                    format!(
                        "${{POD_NAME}}.{service}.${{POD_NAMESPACE}}.svc.{domain},{service}.${{POD_NAMESPACE}}.svc.{domain},{service}",
                        domain = cluster.cluster_domain()
                    ),
                );
                volumes.push(Volume {
                    name: TLS_VOLUME.to_string(),
                    csi: Some(CSIVolumeSource {
                        driver: CSI_DRIVER.to_string(),
                        read_only: Some(true),
                        volume_attributes: Some(attributes),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
            TlsMode::Secret | TlsMode::CertManagerSecret => {
                volumes.push(secret_volume(
                    TLS_VOLUME.to_string(),
                    certificate_secret_name(cluster),
                ));
            }
        }
    }

    volumes
}

fn generate_volume_mounts(cluster: &AIStore, role: DaemonRole) -> Vec<VolumeMount> {
    let mut mounts = vec![
        mount(CONFIG_VOLUME, CONFIG_DIR),
        VolumeMount {
            sub_path: Some("ais.json".to_string()),
            ..mount(CONFIG_GLOBAL_VOLUME, &format!("{CONFIG_DIR}/ais.json"))
        },
        mount(STATSD_VOLUME, STATSD_DIR),
        mount(LOGS_VOLUME, LOGS_DIR),
    ];

    // Targets are pinned to their node, so each pod gets its own state subdirectory.
    let state_mount = mount(STATE_VOLUME, STATE_DIR);
    mounts.push(if cluster.uses_hostpath_state() && role == DaemonRole::Target {
        VolumeMount {
            sub_path_expr: Some("$(MY_POD)".to_string()),
            ..state_mount
        }
    } else {
        state_mount
    });

    if role == DaemonRole::Target {
        for m in &cluster.spec.target_spec.mounts {
            mounts.push(mount(&mount_volume_name(&m.path), &m.path));
        }
    }

    for provider in cluster.spec.cloud_secrets.keys() {
        mounts.push(read_only_mount(
            &cloud_volume_name(provider),
            &format!("/var/{provider}"),
        ));
    }

    if cluster.use_https() {
        mounts.push(read_only_mount(TLS_VOLUME, CERTS_DIR));
    }

    mounts
}

fn pvc_template(
    name: String,
    labels: &BTreeMap<String, String>,
    size: &str,
    storage_class: Option<String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage_class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// PVC templates: the state volume when a storage class is set, plus target mountpaths.
///
/// Claims carry the role labels so cleanup can find them.
fn generate_pvc_templates(cluster: &AIStore, role: DaemonRole) -> Vec<PersistentVolumeClaim> {
    let labels = role_labels(cluster, role);
    let mut templates = Vec::new();
    if let Some(class) = &cluster.spec.state_storage_class {
        templates.push(pvc_template(
            STATE_VOLUME.to_string(),
            &labels,
            STATE_VOLUME_SIZE,
            Some(class.clone()),
        ));
    }
    if role == DaemonRole::Target {
        for m in &cluster.spec.target_spec.mounts {
            templates.push(pvc_template(
                mount_volume_name(&m.path),
                &labels,
                &m.size,
                m.storage_class.clone(),
            ));
        }
    }
    templates
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    if v.is_empty() { None } else { Some(v) }
}

fn non_empty_map(m: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if m.is_empty() { None } else { Some(m) }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;

    fn test_resource(spec: serde_json::Value) -> AIStore {
        let mut obj = serde_json::json!({
            "apiVersion": "ais.nvidia.com/v1beta1",
            "kind": "AIStore",
            "metadata": {"name": "ais", "namespace": "store", "uid": "test-uid"},
            "spec": {"size": 3, "nodeImage": "aisnode:v1", "initImage": "aisinit:v1"}
        });
        for (k, v) in spec.as_object().unwrap() {
            obj["spec"][k] = v.clone();
        }
        serde_json::from_value(obj).unwrap()
    }

    fn pod_spec(sts: &StatefulSet) -> &PodSpec {
        sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    fn volume<'a>(sts: &'a StatefulSet, name: &str) -> Option<&'a Volume> {
        pod_spec(sts)
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == name)
    }

    #[test]
    fn test_generate_statefulset() {
        let resource = test_resource(serde_json::json!({}));
        let sts = generate_statefulset(&resource, DaemonRole::Proxy, 1);

        assert_eq!(sts.metadata.name, Some("ais-proxy".to_string()));
        assert_eq!(sts.metadata.namespace, Some("store".to_string()));
        assert_eq!(
            sts.metadata.owner_references.as_ref().unwrap()[0].uid,
            "test-uid"
        );

        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.service_name, Some("ais-proxy".to_string()));
        assert_eq!(spec.pod_management_policy, Some("Parallel".to_string()));
        let strategy = spec.update_strategy.as_ref().unwrap();
        assert_eq!(
            strategy.rolling_update.as_ref().unwrap().partition,
            Some(0)
        );
    }

    #[test]
    fn test_proxy_init_container_knows_default_primary() {
        let resource = test_resource(serde_json::json!({}));
        let sts = generate_statefulset(&resource, DaemonRole::Proxy, 3);
        let init = &pod_spec(&sts).init_containers.as_ref().unwrap()[0];
        assert_eq!(init.image.as_deref(), Some("aisinit:v1"));
        let env = init.env.as_ref().unwrap();
        let primary = env.iter().find(|e| e.name == "AIS_DEFAULT_PRIMARY").unwrap();
        assert_eq!(primary.value.as_deref(), Some("ais-proxy-0"));
    }

    #[test]
    fn test_hostpath_state_volume() {
        let resource = test_resource(serde_json::json!({}));
        let sts = generate_statefulset(&resource, DaemonRole::Target, 3);
        let state = volume(&sts, STATE_VOLUME).unwrap();
        assert_eq!(
            state.host_path.as_ref().unwrap().path,
            "/etc/ais/store/ais/target"
        );
        assert!(sts.spec.unwrap().volume_claim_templates.is_none());
    }

    #[test]
    fn test_state_storage_class_uses_pvc_template() {
        let resource = test_resource(serde_json::json!({
            "stateStorageClass": "fast",
            "targetSpec": {"mounts": [{"path": "/ais/disk1", "size": "10Gi"}]}
        }));
        let sts = generate_statefulset(&resource, DaemonRole::Target, 3);
        assert!(volume(&sts, STATE_VOLUME).is_none());

        let templates = sts.spec.unwrap().volume_claim_templates.unwrap();
        let names: Vec<_> = templates
            .iter()
            .map(|t| t.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["state-mount", "ais-disk1"]);
        assert_eq!(
            templates[0].spec.as_ref().unwrap().storage_class_name,
            Some("fast".to_string())
        );
    }

    #[test]
    fn test_restart_hash_copied_into_template() {
        let mut resource = test_resource(serde_json::json!({}));
        resource
            .annotations_mut()
            .insert(RESTART_HASH_ANNOTATION.to_string(), "abc".to_string());
        let sts = generate_statefulset(&resource, DaemonRole::Target, 3);
        let annotations = sts
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .annotations
            .unwrap();
        assert_eq!(annotations.get(RESTART_HASH_ANNOTATION), Some(&"abc".to_string()));
    }

    #[test]
    fn test_user_labels_cannot_override_selector() {
        let resource = test_resource(serde_json::json!({
            "proxySpec": {"labels": {"app.kubernetes.io/component": "evil", "team": "a"}}
        }));
        let sts = generate_statefulset(&resource, DaemonRole::Proxy, 1);
        let labels = sts.spec.unwrap().template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get("app.kubernetes.io/component"), Some(&"proxy".to_string()));
        assert_eq!(labels.get("team"), Some(&"a".to_string()));
    }

    #[test]
    fn test_log_sidecar_optional() {
        let resource = test_resource(serde_json::json!({}));
        let sts = generate_statefulset(&resource, DaemonRole::Proxy, 1);
        assert_eq!(pod_spec(&sts).containers.len(), 1);

        let resource = test_resource(serde_json::json!({"logSidecarImage": "busybox"}));
        let sts = generate_statefulset(&resource, DaemonRole::Proxy, 1);
        assert_eq!(pod_spec(&sts).containers[1].name, LOG_SIDECAR);
    }

    #[test]
    fn test_tls_secret_volume() {
        let resource = test_resource(serde_json::json!({"tls": {"secretName": "certs"}}));
        let sts = generate_statefulset(&resource, DaemonRole::Proxy, 1);
        let tls = volume(&sts, TLS_VOLUME).unwrap();
        assert_eq!(
            tls.secret.as_ref().unwrap().secret_name,
            Some("certs".to_string())
        );
        let probe = pod_spec(&sts).containers[0].readiness_probe.as_ref().unwrap();
        assert_eq!(
            probe.http_get.as_ref().unwrap().scheme,
            Some("HTTPS".to_string())
        );
    }

    #[test]
    fn test_mount_volume_name() {
        assert_eq!(mount_volume_name("/ais1"), "ais1");
        assert_eq!(mount_volume_name("/ais/disk1/"), "ais-disk1");
    }
}
