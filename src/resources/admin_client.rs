//! Admin client Deployment.
//!
//! A single pod with the `ais` CLI preconfigured to talk to the cluster.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::crd::AIStore;
use crate::resources::common::{LABEL_COMPONENT, admin_client_name, owned_meta, standard_labels};
use crate::resources::config::proxy_service_url;

/// Generate the admin client Deployment, or `None` when not requested.
pub fn generate_admin_client(cluster: &AIStore) -> Option<Deployment> {
    let spec = cluster.spec.admin_client.as_ref()?;
    let mut labels = standard_labels(cluster);
    labels.insert(LABEL_COMPONENT.to_string(), "client".to_string());

    let mut env = vec![EnvVar {
        name: "AIS_ENDPOINT".to_string(),
        value: Some(proxy_service_url(cluster)),
        ..Default::default()
    }];
    if cluster.use_https() {
        env.push(EnvVar {
            name: "AIS_SKIP_VERIFY_CRT".to_string(),
            value: Some("true".to_string()),
            ..Default::default()
        });
    }

    Some(Deployment {
        metadata: owned_meta(cluster, admin_client_name(cluster), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "ais-client".to_string(),
                        image: Some(spec.image.clone()),
                        command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}
