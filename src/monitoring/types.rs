use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Configuration for the monitoring system
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Whether monitoring is enabled
    pub enabled: bool,
    /// Size of the monitoring channel buffer
    pub channel_size: usize,
    /// How often the aggregator logs its metrics
    pub metrics_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_size: 1000,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

/// A monitoring event emitted by a shard reader or the checkpoint cache
#[derive(Debug, Clone)]
pub struct ConsumerEvent {
    /// When the event occurred
    pub timestamp: SystemTime,
    /// ID of the shard this event relates to
    pub shard_id: String,
    /// The type of event and its details
    pub event_type: ConsumerEventType,
}

#[derive(Debug, Clone)]
pub enum ConsumerEventType {
    Shard {
        event_type: ShardEventType,
        details: Option<String>,
    },
    Iterator {
        event_type: IteratorEventType,
        /// Sequence number the iterator was positioned after, if any
        after_sequence_number: Option<String>,
        error: Option<String>,
    },
    BatchFetched {
        record_count: usize,
        millis_behind_latest: Option<i64>,
        duration: Duration,
    },
    FetchFailed {
        error: String,
        consecutive_failures: u32,
    },
    BatchDelivered {
        record_count: usize,
        last_sequence_number: Option<String>,
    },
    Backoff {
        /// Delay in poll units
        delay: u32,
    },
    Checkpoint {
        sequence_number: String,
        outcome: CheckpointOutcome,
    },
}

/// Types of shard-level events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEventType {
    Started,
    /// The backend reported no further iterator; the reader stops polling
    Exhausted,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorEventType {
    Acquired,
    Failed,
}

/// Result of flushing one checkpoint entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Saved,
    /// The durable value was already newer; the monotonic guard kept it
    Stale,
    Failed(String),
}

impl ConsumerEvent {
    fn new(shard_id: String, event_type: ConsumerEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            shard_id,
            event_type,
        }
    }

    pub fn shard_event(shard_id: String, event_type: ShardEventType, details: Option<String>) -> Self {
        Self::new(shard_id, ConsumerEventType::Shard { event_type, details })
    }

    pub fn iterator(
        shard_id: String,
        event_type: IteratorEventType,
        after_sequence_number: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self::new(
            shard_id,
            ConsumerEventType::Iterator {
                event_type,
                after_sequence_number,
                error,
            },
        )
    }

    pub fn batch_fetched(
        shard_id: String,
        record_count: usize,
        millis_behind_latest: Option<i64>,
        duration: Duration,
    ) -> Self {
        Self::new(
            shard_id,
            ConsumerEventType::BatchFetched {
                record_count,
                millis_behind_latest,
                duration,
            },
        )
    }

    pub fn fetch_failed(shard_id: String, error: String, consecutive_failures: u32) -> Self {
        Self::new(
            shard_id,
            ConsumerEventType::FetchFailed {
                error,
                consecutive_failures,
            },
        )
    }

    pub fn batch_delivered(
        shard_id: String,
        record_count: usize,
        last_sequence_number: Option<String>,
    ) -> Self {
        Self::new(
            shard_id,
            ConsumerEventType::BatchDelivered {
                record_count,
                last_sequence_number,
            },
        )
    }

    pub fn backoff(shard_id: String, delay: u32) -> Self {
        Self::new(shard_id, ConsumerEventType::Backoff { delay })
    }

    pub fn checkpoint(shard_id: String, sequence_number: String, outcome: CheckpointOutcome) -> Self {
        Self::new(
            shard_id,
            ConsumerEventType::Checkpoint {
                sequence_number,
                outcome,
            },
        )
    }
}

/// Sending half of the monitoring channel.
///
/// Events are dropped rather than awaited when the channel is full so that a
/// slow monitoring consumer never stalls a shard reader.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<ConsumerEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: Option<mpsc::Sender<ConsumerEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn emit(&self, event: ConsumerEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!(shard_id = %event.shard_id, "Monitoring channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
