//! Kinesis Checkpoint Consumer - a single-process AWS Kinesis consumer
//!
//! Every shard of a stream is polled by its own task. Records from all shards
//! are merged into one [`RecordStream`], in order within each shard. The last
//! delivered sequence number of every shard is cached in memory and flushed
//! to a [`CheckpointStore`] periodically and at shutdown. The store never
//! moves a checkpoint backwards, so a restarted consumer resumes just after
//! the last flushed record.

pub mod checkpoint;
pub mod client;
pub mod consumer;
pub mod error;
pub mod monitoring;
mod reader;
pub mod record;
pub mod retry;
mod shutdown;
pub mod store;
mod stream;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;

pub use checkpoint::{CheckpointCache, FlushReport};
pub use client::{KinesisClientError, KinesisClientTrait, RecordBatch, StreamRecord};
pub use consumer::{ConsumerConfig, KinesisConsumer};
pub use error::{ConsumerError, Result};
pub use record::{Record, SequenceNumber};
pub use retry::{Backoff, ExponentialBackoff, PollBackoff};
pub use stream::RecordStream;

// Re-export main traits
pub use crate::store::{CheckpointKey, CheckpointStore, SaveOutcome};

// Re-export implementations
pub use crate::store::memory::InMemoryCheckpointStore;

#[cfg(feature = "dynamodb-store")]
pub use crate::store::dynamodb::DynamoDbCheckpointStore;
