use super::types::{
    CheckpointOutcome, ConsumerEvent, ConsumerEventType, IteratorEventType, MonitoringConfig,
    ShardEventType,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

/// Holds aggregated metrics for a single shard
#[derive(Debug, Clone)]
pub struct ShardMetrics {
    pub records_delivered: u64,
    pub batches_fetched: u64,
    pub empty_polls: u64,
    pub fetch_failures: u64,
    pub fetch_time: Duration,

    pub iterators_acquired: u64,
    pub iterator_failures: u64,

    pub checkpoints_saved: u64,
    pub checkpoints_stale: u64,
    pub checkpoints_failed: u64,

    /// Last backoff delay, in poll units
    pub current_backoff: u32,
    pub millis_behind_latest: Option<i64>,
    pub last_checkpoint: Option<String>,
    pub exhausted: bool,

    pub window_start: Instant,
    pub last_updated: Instant,
}

impl Default for ShardMetrics {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            records_delivered: 0,
            batches_fetched: 0,
            empty_polls: 0,
            fetch_failures: 0,
            fetch_time: Duration::default(),
            iterators_acquired: 0,
            iterator_failures: 0,
            checkpoints_saved: 0,
            checkpoints_stale: 0,
            checkpoints_failed: 0,
            current_backoff: 0,
            millis_behind_latest: None,
            last_checkpoint: None,
            exhausted: false,
            window_start: now,
            last_updated: now,
        }
    }
}

/// Aggregates monitoring events into per-shard metrics
pub struct MetricsAggregator {
    metrics: Arc<RwLock<HashMap<String, ShardMetrics>>>,
    window_duration: Duration,
    monitoring_rx: tokio::sync::mpsc::Receiver<ConsumerEvent>,
}

impl MetricsAggregator {
    pub fn new(
        window_duration: Duration,
        monitoring_rx: tokio::sync::mpsc::Receiver<ConsumerEvent>,
    ) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
            window_duration,
            monitoring_rx,
        }
    }

    /// Aggregator that logs once per `config.metrics_interval`
    pub fn from_config(
        config: &MonitoringConfig,
        monitoring_rx: tokio::sync::mpsc::Receiver<ConsumerEvent>,
    ) -> Self {
        Self::new(config.metrics_interval, monitoring_rx)
    }

    /// Shared handle to the metrics map, readable while [`run`](Self::run) owns the aggregator
    pub fn metrics_handle(&self) -> Arc<RwLock<HashMap<String, ShardMetrics>>> {
        self.metrics.clone()
    }

    /// Process events and log metrics until the monitoring channel closes
    pub async fn run(mut self) {
        let mut interval = interval(self.window_duration);

        loop {
            tokio::select! {
                event = self.monitoring_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => break,
                },
                _ = interval.tick() => {
                    self.emit_metrics().await;
                }
            }
        }

        self.emit_metrics().await;
        debug!("Monitoring channel closed, metrics aggregator stopped");
    }

    pub async fn process_event(&self, event: ConsumerEvent) {
        let mut metrics = self.metrics.write().await;
        let shard_metrics = metrics.entry(event.shard_id.clone()).or_default();

        match event.event_type {
            ConsumerEventType::Shard {
                event_type,
                details,
            } => match event_type {
                ShardEventType::Started => {
                    debug!(shard_id = %event.shard_id, "Shard reader started");
                }
                ShardEventType::Exhausted => {
                    shard_metrics.exhausted = true;
                    info!(shard_id = %event.shard_id, details = ?details, "Shard exhausted");
                }
                ShardEventType::Stopped => {
                    debug!(shard_id = %event.shard_id, "Shard reader stopped");
                }
            },
            ConsumerEventType::Iterator {
                event_type, error, ..
            } => match event_type {
                IteratorEventType::Acquired => {
                    shard_metrics.iterators_acquired += 1;
                    trace!(shard_id = %event.shard_id, "Iterator acquired");
                }
                IteratorEventType::Failed => {
                    shard_metrics.iterator_failures += 1;
                    warn!(shard_id = %event.shard_id, error = ?error, "Iterator acquisition failed");
                }
            },
            ConsumerEventType::BatchFetched {
                record_count,
                millis_behind_latest,
                duration,
            } => {
                shard_metrics.batches_fetched += 1;
                if record_count == 0 {
                    shard_metrics.empty_polls += 1;
                }
                shard_metrics.fetch_time += duration;
                shard_metrics.millis_behind_latest = millis_behind_latest;
            }
            ConsumerEventType::FetchFailed { .. } => {
                shard_metrics.fetch_failures += 1;
            }
            ConsumerEventType::BatchDelivered { record_count, .. } => {
                shard_metrics.records_delivered += record_count as u64;
            }
            ConsumerEventType::Backoff { delay } => {
                shard_metrics.current_backoff = delay;
            }
            ConsumerEventType::Checkpoint {
                sequence_number,
                outcome,
            } => match outcome {
                CheckpointOutcome::Saved => {
                    shard_metrics.checkpoints_saved += 1;
                    shard_metrics.last_checkpoint = Some(sequence_number);
                }
                CheckpointOutcome::Stale => {
                    shard_metrics.checkpoints_stale += 1;
                }
                CheckpointOutcome::Failed(error) => {
                    shard_metrics.checkpoints_failed += 1;
                    warn!(
                        shard_id = %event.shard_id,
                        sequence = %sequence_number,
                        error = %error,
                        "Checkpoint flush failed"
                    );
                }
            },
        }

        shard_metrics.last_updated = Instant::now();
    }

    async fn emit_metrics(&self) {
        let metrics = self.metrics.read().await;

        for (shard_id, metrics) in metrics.iter() {
            info!(
                shard_id = %shard_id,
                records_delivered = metrics.records_delivered,
                batches_fetched = metrics.batches_fetched,
                empty_polls = metrics.empty_polls,
                fetch_failures = metrics.fetch_failures,
                iterator_failures = metrics.iterator_failures,
                checkpoints_saved = metrics.checkpoints_saved,
                checkpoints_stale = metrics.checkpoints_stale,
                checkpoints_failed = metrics.checkpoints_failed,
                current_backoff = metrics.current_backoff,
                millis_behind_latest = ?metrics.millis_behind_latest,
                "Shard metrics"
            );

            if metrics.fetch_failures > 0 {
                warn!(
                    shard_id = %shard_id,
                    failures = metrics.fetch_failures,
                    "Fetch failures detected"
                );
            }

            if metrics.checkpoints_failed > 0 {
                warn!(
                    shard_id = %shard_id,
                    failures = metrics.checkpoints_failed,
                    "Checkpoint failures detected"
                );
            }
        }
    }

    /// Get current metrics for all shards
    pub async fn get_metrics(&self) -> HashMap<String, ShardMetrics> {
        self.metrics.read().await.clone()
    }

    /// Get metrics for a specific shard
    pub async fn get_shard_metrics(&self, shard_id: &str) -> Option<ShardMetrics> {
        self.metrics.read().await.get(shard_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_from_config_uses_metrics_interval() {
        let (tx, rx) = mpsc::channel(10);
        let config = MonitoringConfig {
            enabled: true,
            metrics_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let aggregator = MetricsAggregator::from_config(&config, rx);
        assert_eq!(aggregator.window_duration, Duration::from_secs(5));

        let metrics = aggregator.metrics_handle();
        let handle = tokio::spawn(aggregator.run());
        tx.send(ConsumerEvent::backoff("shard-1".to_string(), 4))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(metrics.read().await["shard-1"].current_backoff, 4);
    }

    #[tokio::test]
    async fn test_event_aggregation() {
        let (_tx, rx) = mpsc::channel(10);
        let aggregator = MetricsAggregator::new(Duration::from_secs(60), rx);
        let shard = "shard-1".to_string();

        aggregator
            .process_event(ConsumerEvent::batch_fetched(
                shard.clone(),
                3,
                Some(0),
                Duration::from_millis(5),
            ))
            .await;
        aggregator
            .process_event(ConsumerEvent::batch_fetched(
                shard.clone(),
                0,
                Some(0),
                Duration::from_millis(5),
            ))
            .await;
        aggregator
            .process_event(ConsumerEvent::batch_delivered(
                shard.clone(),
                3,
                Some("3".to_string()),
            ))
            .await;
        aggregator
            .process_event(ConsumerEvent::fetch_failed(
                shard.clone(),
                "Iterator expired".to_string(),
                1,
            ))
            .await;
        aggregator
            .process_event(ConsumerEvent::backoff(shard.clone(), 4))
            .await;
        aggregator
            .process_event(ConsumerEvent::checkpoint(
                shard.clone(),
                "3".to_string(),
                CheckpointOutcome::Saved,
            ))
            .await;
        aggregator
            .process_event(ConsumerEvent::checkpoint(
                shard.clone(),
                "2".to_string(),
                CheckpointOutcome::Stale,
            ))
            .await;

        let metrics = aggregator.get_shard_metrics("shard-1").await.unwrap();
        assert_eq!(metrics.batches_fetched, 2);
        assert_eq!(metrics.empty_polls, 1);
        assert_eq!(metrics.records_delivered, 3);
        assert_eq!(metrics.fetch_failures, 1);
        assert_eq!(metrics.current_backoff, 4);
        assert_eq!(metrics.checkpoints_saved, 1);
        assert_eq!(metrics.checkpoints_stale, 1);
        assert_eq!(metrics.last_checkpoint.as_deref(), Some("3"));
        assert!(aggregator.get_shard_metrics("shard-2").await.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let (tx, rx) = mpsc::channel(10);
        let aggregator = MetricsAggregator::new(Duration::from_secs(60), rx);
        let metrics = aggregator.metrics_handle();

        tx.send(ConsumerEvent::shard_event(
            "shard-1".to_string(),
            ShardEventType::Exhausted,
            None,
        ))
        .await
        .unwrap();
        drop(tx);

        aggregator.run().await;

        assert!(metrics.read().await["shard-1"].exhausted);
    }
}
