//! Custom Resource Definitions (CRDs) for ais-operator.
//!
//! - `AIStore`: Deploy and manage an AIS cluster of proxies and targets

mod aistore;

pub use aistore::*;
