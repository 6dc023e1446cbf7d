//! Error types for the node pool

use thiserror::Error;

use crate::backend::BackendError;
use crate::models::BackendNode;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Pool has not been started")]
    NotStarted,

    #[error("Pool is closed")]
    Closed,

    #[error(
        "Insufficient capacity: requested {requested}, available {available}, \
         pool size {pool_size} (min {min_size}, max {max_size})"
    )]
    InsufficientCapacity {
        available: usize,
        pool_size: usize,
        min_size: usize,
        max_size: usize,
        requested: usize,
    },

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Backend provisioning failed after {} node(s): {reason}", partial.len())]
    BackendProvisioningFailure {
        partial: Vec<BackendNode>,
        reason: String,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Capacity failures leave the pool untouched
    pub fn is_capacity_error(&self) -> bool {
        matches!(self, Error::InsufficientCapacity { .. })
    }

    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::InsufficientCapacity { .. }
                | Error::BackendProvisioningFailure { .. }
                | Error::Backend(_)
        )
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::PartialCreate { created, reason, .. } => {
                Error::BackendProvisioningFailure { partial: created, reason }
            }
            BackendError::NodeNotFound(id) => Error::NotFound(id),
            other => Error::Backend(other.to_string()),
        }
    }
}

impl From<crate::blobstore::BlobStoreError> for Error {
    fn from(err: crate::blobstore::BlobStoreError) -> Self {
        Error::Metadata(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_create_translates_to_provisioning_failure() {
        let err: Error = BackendError::PartialCreate {
            created: vec![BackendNode::new("n-1", "pool")],
            requested: 3,
            reason: "quota".into(),
        }
        .into();

        match err {
            Error::BackendProvisioningFailure { partial, reason } => {
                assert_eq!(partial.len(), 1);
                assert_eq!(reason, "quota");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_retryable() {
        let err = Error::InsufficientCapacity {
            available: 0,
            pool_size: 5,
            min_size: 2,
            max_size: 5,
            requested: 1,
        };
        assert!(err.is_capacity_error());
        assert!(err.is_retryable());
        assert!(!Error::NotStarted.is_retryable());
        assert!(!Error::Closed.is_retryable());
    }
}
