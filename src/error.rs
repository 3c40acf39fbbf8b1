//! Error kinds returned by the environment manager.

use thiserror::Error;

use crate::backend::BackendStatus;

#[derive(Debug, Error)]
pub enum AccelError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("{op} failed: {status}")]
    Backend {
        op: &'static str,
        status: BackendStatus,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    #[error("program build failed: {status}\n{log}")]
    Compilation { status: BackendStatus, log: String },

    #[error("kernel '{name}' not found in any compiled program")]
    NotFound { name: String },
}

impl AccelError {
    pub(crate) fn backend(op: &'static str, status: BackendStatus) -> Self {
        if status == BackendStatus::OUT_OF_HOST_MEMORY {
            return Self::OutOfMemory;
        }
        Self::Backend { op, status }
    }
}

pub type Result<T> = std::result::Result<T, AccelError>;
