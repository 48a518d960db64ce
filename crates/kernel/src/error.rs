use statesync_common::PathError;
use statesync_persist::StorageError;

/// Errors from kernel operations.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("invalid subscriber: {0}")]
    InvalidSubscriber(String),
    #[error("{0} must be a mapping")]
    NotAnObject(&'static str),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
