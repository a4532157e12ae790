//! Resource generation module.
//!
//! Contains utilities for generating Kubernetes resources owned by an AIStore.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | One per role (proxy, target) |
//! | Headless Service | Stable pod DNS per role |
//! | LoadBalancer Services | External access (shared for proxies, per pod for targets) |
//! | ConfigMaps | Global cluster config and statsd config |
//! | RBAC | ServiceAccount, Role(Binding), ClusterRole(Binding) for daemons |
//! | PodDisruptionBudget | Bound voluntary target disruptions |
//! | Certificate | TLS certs via cert-manager |
//! | Deployment | Optional admin client |
//! | Job | Host-path cleanup after deletion |

pub mod admin_client;
pub mod certificate;
pub mod common;
pub mod config;
pub mod configmap;
pub mod job;
pub mod pdb;
pub mod rbac;
pub mod services;
pub mod statefulset;

// Re-export commonly used items from common
pub use common::{DaemonRole, owner_reference, standard_labels};
