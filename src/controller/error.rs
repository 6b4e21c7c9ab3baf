//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Malformed store label selector
    #[error("Invalid label selector: {0}")]
    Selector(String),

    /// Option that failed to parse (duration, quantity, time bound)
    #[error("Invalid value for {field}: {reason}")]
    InvalidOption { field: String, reason: String },

    /// Owner reference could not be established on a child object
    #[error("Owner reference error: {0}")]
    OwnerReference(String),

    /// One or more desired objects failed to sync
    #[error("failed to create or update {failed} of {total} resources for {component}")]
    SyncFailed {
        component: &'static str,
        failed: usize,
        total: usize,
    },

    /// Reconciliation was cancelled mid-batch
    #[error(
        "reconciliation cancelled after applying {applied} of {total} resources ({failed} failed)"
    )]
    Cancelled {
        applied: usize,
        failed: usize,
        total: usize,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Controller registration or startup failure
    #[error("Setup failed: {0}")]
    Setup(String),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error indicates a write conflict on a stale resourceVersion
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            // Partial failures and cancellations converge on the next pass
            Error::SyncFailed { .. } | Error::Cancelled { .. } => true,
            Error::Selector(_) | Error::InvalidOption { .. } | Error::OwnerReference(_) => false,
            Error::Serialization(_) | Error::Setup(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            // A spec edit will trigger a new pass; poll slowly until then
            Duration::from_secs(300)
        }
    }

    pub(crate) fn invalid_option(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidOption {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
