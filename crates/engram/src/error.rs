use std::time::Duration;

use engram_crdt::DocumentError;
use engram_store::StorageError;

use crate::embedding::EmbeddingError;

/// Errors returned by [`AgentMemory`](crate::AgentMemory).
#[derive(Debug, thiserror::Error)]
pub enum AgentMemoryError {
    /// An operation was called before [`start`](crate::AgentMemory::start).
    #[error("agent memory has not been started")]
    NotStarted,
    /// An operation was called after [`stop`](crate::AgentMemory::stop).
    #[error("agent memory has been stopped")]
    Stopped,
    /// The storage backend failed.
    #[error(transparent)]
    Storage(StorageError),
    /// The embedding service failed (strict mode only).
    #[error("embedding service unavailable: {0}")]
    Embedding(#[from] EmbeddingError),
    /// The embedding service did not answer in time (strict mode only).
    #[error("{operation} timed out after {after:?}")]
    RecallTimeout {
        /// `embed` or `similarity_search`.
        operation: &'static str,
        /// The configured timeout.
        after: Duration,
    },
    /// No memory with this id.
    #[error("memory {0} not found")]
    NotFound(String),
    /// A document operation was rejected.
    #[error(transparent)]
    Merge(#[from] DocumentError),
    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),
}

impl AgentMemoryError {
    /// True if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StorageError> for AgentMemoryError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => Self::NotFound(id),
            StorageError::Merge(e) => Self::Merge(e),
            other => Self::Storage(other),
        }
    }
}
