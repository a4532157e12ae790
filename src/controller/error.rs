//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::client::cluster_api::ClusterApiError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Managed cluster API error
    #[error("Cluster API error: {0}")]
    ClusterApi(#[from] ClusterApiError),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube(kube::Error::Api(e)) => Some(e.code),
            _ => None,
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Optimistic-concurrency conflict: someone else wrote the object first.
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::ClusterApi(_) | Error::Transient(_) => true,
            Error::Permanent(_) | Error::MissingField(_) | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_conflict() {
            Duration::from_secs(1)
        } else if self.is_retryable() {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
