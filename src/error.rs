//! Error types for the Kinesis consumer

use crate::client::KinesisClientError;
use thiserror::Error;
use tokio::task::JoinError;

/// Main error type for consumer operations
///
/// Only configuration, discovery and lifecycle errors are ever returned to
/// the embedder. The remaining variants describe steady-state failures that
/// shard readers log and recover from on their own.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shard discovery failed: {0}")]
    ShardDiscovery(#[source] KinesisClientError),

    #[error("Consumer already started")]
    AlreadyStarted,

    #[error("Failed to get iterator: {0}")]
    GetIteratorFailed(String),

    #[error("Iterator expired for shard {0}")]
    IteratorExpired(String),

    #[error("Failed to get records: {0}")]
    GetRecordsFailed(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<JoinError> for ConsumerError {
    fn from(err: JoinError) -> Self {
        ConsumerError::Other(err.into())
    }
}

/// Result type for consumer operations
pub type Result<T> = std::result::Result<T, ConsumerError>;
