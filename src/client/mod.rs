//! Clients the operator uses to reach Kubernetes and the managed cluster.
//!
//! ## Architecture
//!
//! - `resources`: narrow CRUD/patch contract over Kubernetes objects
//! - `cluster_api`: HTTP contract to a running AIS cluster
//! - `authn`: AuthN login for clusters with authentication enabled
//! - `registry`: per-cluster cache of cluster API clients

pub mod authn;
pub mod cluster_api;
pub mod registry;
pub mod resources;

pub use cluster_api::{ClusterApi, ClusterApiError, ClusterMap, HttpClusterApi, Snode};
pub use registry::{ClientRegistry, ClusterApiProvider};
pub use resources::{KubeResourceClient, ManagedResource, ResourceClient};
