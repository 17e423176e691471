//! Monitoring for shard readers and checkpoint flushes
//!
//! Readers and the checkpoint cache publish [`ConsumerEvent`]s on an optional
//! channel. [`MetricsAggregator`] folds them into per-shard counters.

mod metrics;
mod types;

pub use metrics::{MetricsAggregator, ShardMetrics};
pub use types::{
    CheckpointOutcome, ConsumerEvent, ConsumerEventType, IteratorEventType, MonitoringConfig,
    ShardEventType,
};

pub(crate) use types::EventSink;
