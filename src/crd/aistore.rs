//! AIStore Custom Resource Definition.
//!
//! Declares an AIStore cluster: a set of proxies (gateways, one of which is
//! elected primary) and targets (storage daemons), plus the knobs the operator
//! needs to drive its lifecycle from the outside.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, SecurityContext, Toleration};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation recording the hash of the last runtime config pushed to the cluster.
pub const CONFIG_HASH_ANNOTATION: &str = "ais.nvidia.com/config-hash";

/// Annotation whose value is copied into pod templates to force a restart.
pub const RESTART_HASH_ANNOTATION: &str = "ais.nvidia.com/restart-hash";

/// Size value meaning "one daemon per node matching the role's node selector".
pub const AUTOSCALE_SIZE: i32 = -1;

/// Default cluster DNS domain.
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Default proxy service port.
pub const DEFAULT_PROXY_PORT: i32 = 51080;

/// Default target service port.
pub const DEFAULT_TARGET_PORT: i32 = 51081;

/// AIStore is a custom resource describing a managed AIS cluster.
///
/// Example:
/// ```yaml
/// apiVersion: ais.nvidia.com/v1beta1
/// kind: AIStore
/// metadata:
///   name: ais
/// spec:
///   size: 3
///   nodeImage: aistorage/aisnode:v3.28
///   initImage: aistorage/ais-init:v3.28
///   hostpathPrefix: /etc/ais
///   targetSpec:
///     mounts:
///       - path: /ais1
///         size: 10Gi
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ais.nvidia.com",
    version = "v1beta1",
    kind = "AIStore",
    plural = "aistores",
    shortname = "ais",
    status = "AIStoreStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Cluster ID", "type":"string", "jsonPath":".status.clusterID"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIStoreSpec {
    /// Default size for both proxies and targets. `-1` autoscales to the
    /// nodes matching each role's node selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,

    /// aisnode container image.
    pub node_image: String,

    /// Init container image that renders the local daemon config.
    pub init_image: String,

    /// Optional log sidecar image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_sidecar_image: Option<String>,

    /// Proxy daemon settings.
    #[serde(default)]
    pub proxy_spec: DaemonSpec,

    /// Target daemon settings.
    #[serde(default)]
    pub target_spec: DaemonSpec,

    /// Host directory holding daemon state when no state storage class is set.
    #[serde(default = "default_hostpath_prefix")]
    pub hostpath_prefix: String,

    /// Storage class for dynamically provisioned state volumes.
    /// When unset, daemon state lives under `hostpathPrefix` on the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_storage_class: Option<String>,

    /// TLS configuration for the cluster's HTTP endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,

    /// Partial runtime config applied on top of the computed config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_to_update: Option<ConfigToUpdate>,

    /// Gracefully shut the cluster down (scale daemons to zero, keep data).
    #[serde(default)]
    pub shutdown_cluster: bool,

    /// Wipe cluster metadata on deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_metadata: Option<bool>,

    /// Wipe user data and volumes on deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_data: Option<bool>,

    /// Expose proxies and targets through LoadBalancer services.
    #[serde(default, rename = "enableExternalLB")]
    pub enable_external_lb: bool,

    /// How the operator reaches the cluster API (`public` uses node host IPs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_mode: Option<String>,

    /// Authentication settings. When set, the operator logs in through AuthN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,

    /// Secrets holding cloud backend credentials, keyed by provider.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cloud_secrets: BTreeMap<String, String>,

    /// Optional admin client deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_client: Option<AdminClientSpec>,

    /// PodDisruptionBudget for targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdb: Option<PdbSpec>,

    /// Cluster DNS domain (default: cluster.local).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,
}

fn default_hostpath_prefix() -> String {
    "/etc/ais".to_string()
}

/// Settings shared by proxy and target daemons.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSpec {
    /// Role size; overrides `spec.size`. `-1` autoscales.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,

    /// Service port (defaults: proxy 51080, target 51081).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,

    /// Node selector for daemon pods; also the autoscale node filter.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Extra environment for the aisnode container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    /// Extra pod annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Extra pod labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Data mountpaths (targets only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
}

/// A target mountpath backed by a PersistentVolumeClaim.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Path inside the target container.
    pub path: String,
    /// Requested volume size (e.g. 10Gi).
    pub size: String,
    /// Storage class for the volume; cluster default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// How TLS certificates are provided to the daemons.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum TlsMode {
    /// A pre-existing Secret shared by all daemons.
    #[default]
    Secret,
    /// cert-manager issues a Certificate into a Secret.
    CertManagerSecret,
    /// cert-manager CSI driver mounts certificates directly into pods.
    CertManagerCsi,
}

/// TLS configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub mode: TlsMode,

    /// Secret holding `tls.crt`, `tls.key` and optionally `ca.crt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// cert-manager issuer for the cert-manager modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<IssuerRef>,
}

/// Reference to a cert-manager Issuer or ClusterIssuer.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,
    /// Issuer or ClusterIssuer (default: ClusterIssuer).
    #[serde(default = "default_issuer_kind")]
    pub kind: String,
}

fn default_issuer_kind() -> String {
    "ClusterIssuer".to_string()
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Secret with the AuthN signing key shared with the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret_name: Option<String>,

    /// OIDC issuer settings pushed into the cluster config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcSpec>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcSpec {
    #[serde(rename = "issuerURL")]
    pub issuer_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

/// Admin client deployment settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminClientSpec {
    /// Image shipping the `ais` CLI.
    #[serde(default = "default_admin_client_image")]
    pub image: String,
}

fn default_admin_client_image() -> String {
    "aistorage/ais-util:latest".to_string()
}

/// Target PodDisruptionBudget settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PdbSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Maximum unavailable targets (default: 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i32>,
}

/// Partial AIS runtime configuration. Only set fields are pushed.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ConfigToUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebalance: Option<RebalanceConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<SpaceConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutConf>,
    /// Feature flags bitmask, as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md_write: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmodule: Option<String>,

    // Sections passed through to AIS as given; AIS validates their fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub backend: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub mirror: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub ec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub periodic: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub client: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub lru: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub disk: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub replication: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub checksum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub versioning: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub net: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub fshc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub auth: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub keepalivetracker: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub downloader: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub distributed_sort: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_section")]
    pub compression: Option<Value>,
}

/// Object schema that keeps every field the user sets.
fn raw_config_section(_: &mut schemars::r#gen::SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..SchemaObject::default()
    };
    schema
        .extensions
        .insert("nullable".to_string(), Value::Bool(true));
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        Value::Bool(true),
    );
    Schema::Object(schema)
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RebalanceConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_retry_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SpaceConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanupwm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lowwm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highwm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_of_space: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LogConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TimeoutConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cplane_operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_keepalive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_time: Option<String>,
}

/// Status of an AIStore.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AIStoreStatus {
    /// Current lifecycle state.
    #[serde(default)]
    pub state: ClusterState,

    /// Conditions, one per type.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Cluster UUID reported by the cluster map.
    #[serde(default, rename = "clusterID", skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    /// URL the operator uses to reach the cluster API.
    #[serde(default, rename = "intraClusterURL", skip_serializing_if = "Option::is_none")]
    pub intra_cluster_url: Option<String>,

    /// Nodes selected for autoscaled roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scale_status: Option<AutoScaleStatus>,

    /// Nodes that ran daemons, captured when teardown starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_cleanup_nodes: Vec<String>,
}

/// Node names backing autoscaled roles.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoScaleStatus {
    #[serde(default)]
    pub expected_proxy_nodes: Vec<String>,
    #[serde(default)]
    pub expected_target_nodes: Vec<String>,
}

/// ClusterState is the lifecycle state of an AIStore.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterState {
    /// Not yet seen by the operator.
    #[default]
    #[serde(rename = "")]
    Uninitialized,
    /// Finalizer attached, prerequisites pending.
    Initialized,
    /// LoadBalancer services created, waiting for the first IPs.
    InitializingLoadBalancerService,
    /// Still waiting for LoadBalancer external IPs.
    PendingLoadBalancerService,
    /// Proxies and targets have been bootstrapped.
    Created,
    /// Cluster matches spec and is healthy.
    Ready,
    /// Rolling a spec change through the daemons.
    Upgrading,
    /// Changing the number of daemons.
    Scaling,
    /// Scaling daemons down for a graceful shutdown.
    ShuttingDown,
    /// All daemons stopped; resumes when `shutdownCluster` clears.
    Shutdown,
    /// Deletion requested; decommissioning the cluster.
    Decommissioning,
    /// Removing owned Kubernetes objects.
    CleaningResources,
    /// Wiping host-local state on every node that ran the cluster.
    HostCleanup,
    /// Teardown finished; the finalizer can go.
    Finalized,
}

impl ClusterState {
    /// All states, in lifecycle order.
    pub const ALL: [ClusterState; 14] = [
        ClusterState::Uninitialized,
        ClusterState::Initialized,
        ClusterState::InitializingLoadBalancerService,
        ClusterState::PendingLoadBalancerService,
        ClusterState::Created,
        ClusterState::Ready,
        ClusterState::Upgrading,
        ClusterState::Scaling,
        ClusterState::ShuttingDown,
        ClusterState::Shutdown,
        ClusterState::Decommissioning,
        ClusterState::CleaningResources,
        ClusterState::HostCleanup,
        ClusterState::Finalized,
    ];

    /// States the deletion path owns.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            ClusterState::Decommissioning
                | ClusterState::CleaningResources
                | ClusterState::HostCleanup
                | ClusterState::Finalized
        )
    }

    /// States before the bootstrap completed.
    pub fn is_pre_created(&self) -> bool {
        matches!(
            self,
            ClusterState::Uninitialized
                | ClusterState::Initialized
                | ClusterState::InitializingLoadBalancerService
                | ClusterState::PendingLoadBalancerService
        )
    }

    /// States handled by the steady-state loop.
    pub fn is_steady(&self) -> bool {
        matches!(
            self,
            ClusterState::Created
                | ClusterState::Ready
                | ClusterState::Upgrading
                | ClusterState::Scaling
        )
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterState::Uninitialized => "",
            ClusterState::Initialized => "Initialized",
            ClusterState::InitializingLoadBalancerService => "InitializingLoadBalancerService",
            ClusterState::PendingLoadBalancerService => "PendingLoadBalancerService",
            ClusterState::Created => "Created",
            ClusterState::Ready => "Ready",
            ClusterState::Upgrading => "Upgrading",
            ClusterState::Scaling => "Scaling",
            ClusterState::ShuttingDown => "ShuttingDown",
            ClusterState::Shutdown => "Shutdown",
            ClusterState::Decommissioning => "Decommissioning",
            ClusterState::CleaningResources => "CleaningResources",
            ClusterState::HostCleanup => "HostCleanup",
            ClusterState::Finalized => "Finalized",
        };
        write!(f, "{s}")
    }
}

/// Condition describes one aspect of the cluster at a point in time.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// "True" or "False".
    pub status: String,
    /// Machine-readable reason for the last transition.
    pub reason: String,
    /// Human-readable details.
    pub message: String,
    /// Last time the status flipped.
    pub last_transition_time: String,
    /// Generation the condition was computed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Condition types tracked on an AIStore.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConditionType {
    /// The operator has taken ownership of the resource.
    Initialized,
    /// Proxies and targets were bootstrapped at least once.
    Created,
    /// The cluster matches spec and passes health checks.
    Ready,
    /// Rebalance may follow the spec value (False forces it off).
    ReadyRebalance,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Initialized => write!(f, "Initialized"),
            ConditionType::Created => write!(f, "Created"),
            ConditionType::Ready => write!(f, "Ready"),
            ConditionType::ReadyRebalance => write!(f, "ReadyRebalance"),
        }
    }
}

impl AIStore {
    /// Namespace of the resource ("default" when unset).
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Configured proxy size (may be [`AUTOSCALE_SIZE`]).
    pub fn proxy_size(&self) -> i32 {
        self.spec.proxy_spec.size.or(self.spec.size).unwrap_or(1)
    }

    /// Configured target size (may be [`AUTOSCALE_SIZE`]).
    pub fn target_size(&self) -> i32 {
        self.spec.target_spec.size.or(self.spec.size).unwrap_or(1)
    }

    pub fn proxy_port(&self) -> i32 {
        self.spec.proxy_spec.service_port.unwrap_or(DEFAULT_PROXY_PORT)
    }

    pub fn target_port(&self) -> i32 {
        self.spec
            .target_spec
            .service_port
            .unwrap_or(DEFAULT_TARGET_PORT)
    }

    pub fn cluster_domain(&self) -> &str {
        self.spec
            .cluster_domain
            .as_deref()
            .unwrap_or(DEFAULT_CLUSTER_DOMAIN)
    }

    /// Daemon state lives on the node rather than in dynamic volumes.
    pub fn uses_hostpath_state(&self) -> bool {
        self.spec.state_storage_class.is_none()
    }

    pub fn should_cleanup_metadata(&self) -> bool {
        self.spec.cleanup_metadata.unwrap_or(false)
    }

    pub fn should_cleanup_data(&self) -> bool {
        self.spec.cleanup_data.unwrap_or(false)
    }

    pub fn use_https(&self) -> bool {
        self.spec.tls.is_some()
    }

    pub fn auth_enabled(&self) -> bool {
        self.spec.auth.is_some()
    }

    pub fn uses_public_api(&self) -> bool {
        self.spec.api_mode.as_deref() == Some("public")
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClusterState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.r#type == condition_type.to_string() && c.is_true())
        })
    }

    /// Hash of the last runtime config pushed to the cluster.
    pub fn config_hash(&self) -> Option<&str> {
        self.annotations()
            .get(CONFIG_HASH_ANNOTATION)
            .map(String::as_str)
    }

    pub fn restart_hash(&self) -> Option<&str> {
        self.annotations()
            .get(RESTART_HASH_ANNOTATION)
            .map(String::as_str)
    }
}
