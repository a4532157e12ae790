//! Certificate resource generation for cert-manager integration.
//!
//! When TLS is issued through cert-manager into a Secret, the operator owns a
//! Certificate covering every proxy and target DNS name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{AIStore, TlsMode};
use crate::resources::common::{
    DaemonRole, certificate_name, owned_meta, proxy_lb_service_name, standard_labels,
    statefulset_name,
};

// ============================================================================
// cert-manager Certificate types
// ============================================================================

/// Subset of the cert-manager Certificate spec the operator sets.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    plural = "certificates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Name of the Secret that will contain the certificate.
    pub secret_name: String,

    /// Issuer responsible for the certificate.
    pub issuer_ref: CertIssuerRef,

    /// DNS names to include in the certificate.
    pub dns_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
}

/// Reference to a cert-manager Issuer or ClusterIssuer.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertIssuerRef {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

// ============================================================================
// Certificate generation
// ============================================================================

/// Secret the daemons read their certificate from.
pub fn certificate_secret_name(cluster: &AIStore) -> String {
    cluster
        .spec
        .tls
        .as_ref()
        .and_then(|t| t.secret_name.clone())
        .unwrap_or_else(|| certificate_name(cluster))
}

/// Generate the Certificate, or `None` unless TLS is issued by cert-manager into a Secret.
///
/// SANs cover the per-pod names behind both headless services, the services
/// themselves and the proxy LoadBalancer name.
pub fn generate_certificate(cluster: &AIStore) -> Option<Certificate> {
    let tls = cluster.spec.tls.as_ref()?;
    if tls.mode != TlsMode::CertManagerSecret {
        return None;
    }
    let issuer = tls.issuer_ref.as_ref()?;
    let namespace = cluster.namespace_or_default();
    let domain = cluster.cluster_domain();

    let mut dns_names = Vec::new();
    for role in [DaemonRole::Proxy, DaemonRole::Target] {
        let service = statefulset_name(cluster, role);
        dns_names.push(format!("*.{service}.{namespace}.svc.{domain}"));
        dns_names.push(format!("{service}.{namespace}.svc.{domain}"));
        dns_names.push(format!("{service}.{namespace}.svc"));
        dns_names.push(service);
    }
    dns_names.push(proxy_lb_service_name(cluster));

    let mut certificate = Certificate::new(
        &certificate_name(cluster),
        CertificateSpec {
            secret_name: certificate_secret_name(cluster),
            issuer_ref: CertIssuerRef {
                name: issuer.name.clone(),
                kind: issuer.kind.clone(),
                group: Some("cert-manager.io".to_string()),
            },
            dns_names,
            usages: vec![
                "server auth".to_string(),
                "client auth".to_string(),
            ],
        },
    );
    certificate.metadata = owned_meta(cluster, certificate_name(cluster), standard_labels(cluster));
    Some(certificate)
}
