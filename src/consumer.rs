//! Consumer entry point
//!
//! [`KinesisConsumer`] discovers the shards of a stream, runs one reader per
//! shard and merges their records into a single [`RecordStream`]. A
//! background task flushes the checkpoint cache periodically and once more
//! after every reader has stopped.

use crate::checkpoint::CheckpointCache;
use crate::client::KinesisClientTrait;
use crate::error::{ConsumerError, Result};
use crate::monitoring::{ConsumerEvent, EventSink, MonitoringConfig};
use crate::reader::{ReaderContext, ShardReader};
use crate::retry::ExponentialBackoff;
use crate::store::CheckpointStore;
use crate::stream::{record_channel, RecordSender, RecordStream};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Largest output buffer accepted for the record channel
pub const MAX_CHANNEL_CAPACITY: usize = 1 << 20;

/// Largest batch a single `GetRecords` call may request
pub const MAX_BATCH_SIZE: i32 = 10_000;

/// Configuration for the Kinesis consumer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Application name, part of every checkpoint key
    pub app_name: String,
    /// Name of the Kinesis stream to consume
    pub stream_name: String,
    /// DynamoDB table used by [`KinesisConsumer::connect`]
    pub table_name: String,
    /// Ceiling of the adaptive poll delay, in multiples of `poll_interval`
    pub max_wait: u32,
    /// Buffered records in the output stream; 0 makes every hand-off wait
    /// for the receiver
    pub channel_capacity: usize,
    /// Length of one poll-delay unit
    pub poll_interval: Duration,
    /// How often the checkpoint cache is written to the store
    pub flush_interval: Duration,
    /// Maximum records per fetch; `None` lets the service decide
    pub batch_size: Option<i32>,
    /// First delay after a failed fetch
    pub retry_initial_delay: Duration,
    /// Ceiling for the delay between consecutive failed fetches
    pub retry_max_delay: Duration,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            stream_name: String::new(),
            table_name: String::new(),
            max_wait: 20,
            channel_capacity: 0,
            poll_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(10),
            batch_size: None,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(30),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn new(
        app_name: impl Into<String>,
        stream_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            stream_name: stream_name.into(),
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(ConsumerError::InvalidConfig("app_name must not be empty".into()));
        }
        if self.stream_name.is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "stream_name must not be empty".into(),
            ));
        }
        if self.channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(ConsumerError::InvalidConfig(format!(
                "channel_capacity must be at most {}",
                MAX_CHANNEL_CAPACITY
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConsumerError::InvalidConfig(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ConsumerError::InvalidConfig(
                "flush_interval must be greater than zero".into(),
            ));
        }
        if let Some(size) = self.batch_size {
            if !(1..=MAX_BATCH_SIZE).contains(&size) {
                return Err(ConsumerError::InvalidConfig(format!(
                    "batch_size must be between 1 and {}",
                    MAX_BATCH_SIZE
                )));
            }
        }
        if self.retry_initial_delay > self.retry_max_delay {
            return Err(ConsumerError::InvalidConfig(
                "retry_initial_delay must not exceed retry_max_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Checkpointing Kinesis consumer
///
/// # Examples
///
/// ```rust,no_run
/// use kinesis_checkpoint_consumer::KinesisConsumer;
///
/// # async fn run() -> Result<(), kinesis_checkpoint_consumer::ConsumerError> {
/// let (mut consumer, _monitoring_rx) =
///     KinesisConsumer::connect("my-app", "my-stream", "checkpoints").await?;
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
///
/// let mut records = consumer.start(shutdown_rx).await?;
/// while let Some(record) = records.recv().await {
///     println!("{} {}", record.shard_id, record.sequence_number);
///     # let _ = shutdown_tx.send(true);
/// }
///
/// consumer.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct KinesisConsumer<C, S>
where
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    config: ConsumerConfig,
    client: Arc<C>,
    cache: CheckpointCache<S>,
    max_wait: Arc<AtomicU32>,
    events: EventSink,
    started: bool,
    background: Option<JoinHandle<()>>,
}

impl<C, S> KinesisConsumer<C, S>
where
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    /// Create a consumer from a validated configuration.
    ///
    /// Returns the consumer and, when monitoring is enabled, the receiving
    /// half of the monitoring channel.
    pub fn new(
        config: ConsumerConfig,
        client: C,
        store: S,
    ) -> Result<(Self, Option<mpsc::Receiver<ConsumerEvent>>)> {
        config.validate()?;

        let (events, monitoring_rx) = if config.monitoring.enabled {
            let (tx, rx) = mpsc::channel(config.monitoring.channel_size.max(1));
            (EventSink::new(Some(tx)), Some(rx))
        } else {
            (EventSink::disabled(), None)
        };

        let cache = CheckpointCache::with_events(
            Arc::new(store),
            config.app_name.clone(),
            config.stream_name.clone(),
            events.clone(),
        );

        let consumer = Self {
            max_wait: Arc::new(AtomicU32::new(config.max_wait)),
            client: Arc::new(client),
            cache,
            events,
            started: false,
            background: None,
            config,
        };

        Ok((consumer, monitoring_rx))
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn checkpoint_cache(&self) -> &CheckpointCache<S> {
        &self.cache
    }

    pub fn max_wait(&self) -> u32 {
        self.max_wait.load(Ordering::Relaxed)
    }

    /// Whether [`start`](Self::start) has succeeded, even if the consumer has
    /// since been joined
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Change the poll delay ceiling. Running readers pick it up on their
    /// next backoff.
    pub fn set_max_wait(&mut self, max_wait: i64) -> Result<()> {
        let max_wait = u32::try_from(max_wait).map_err(|_| {
            ConsumerError::InvalidConfig(format!(
                "max_wait must be between 0 and {}, got {}",
                u32::MAX,
                max_wait
            ))
        })?;

        self.max_wait.store(max_wait, Ordering::Relaxed);
        self.config.max_wait = max_wait;
        debug!(max_wait, "Updated poll delay ceiling");
        Ok(())
    }

    /// Change the output buffer size. Only allowed before [`start`](Self::start).
    pub fn set_channel_capacity(&mut self, capacity: i64) -> Result<()> {
        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|c| *c <= MAX_CHANNEL_CAPACITY)
            .ok_or_else(|| {
                ConsumerError::InvalidConfig(format!(
                    "channel_capacity must be between 0 and {}, got {}",
                    MAX_CHANNEL_CAPACITY, capacity
                ))
            })?;

        if self.is_started() {
            return Err(ConsumerError::AlreadyStarted);
        }

        self.config.channel_capacity = capacity;
        Ok(())
    }

    /// Discover shards and start one reader per shard.
    ///
    /// Nothing is spawned if discovery fails, so `start` may be retried.
    pub async fn start(&mut self, shutdown_rx: watch::Receiver<bool>) -> Result<RecordStream> {
        if self.is_started() {
            return Err(ConsumerError::AlreadyStarted);
        }

        info!(stream = %self.config.stream_name, "Starting Kinesis consumer");

        let shards = self
            .client
            .list_shards(&self.config.stream_name)
            .await
            .map_err(|e| {
                error!(stream = %self.config.stream_name, error = %e, "Shard discovery failed");
                ConsumerError::ShardDiscovery(e)
            })?;

        if shards.is_empty() {
            warn!(stream = %self.config.stream_name, "Stream has no shards");
        }
        info!(shard_count = shards.len(), "Discovered shards");

        let (sender, stream) = record_channel(self.config.channel_capacity);
        let ctx = ReaderContext {
            stream_name: self.config.stream_name.clone(),
            client: self.client.clone(),
            cache: self.cache.clone(),
            sender,
            max_wait: self.max_wait.clone(),
            poll_interval: self.config.poll_interval,
            batch_size: self.config.batch_size,
            retry_backoff: ExponentialBackoff::new(
                self.config.retry_initial_delay,
                self.config.retry_max_delay,
            ),
            events: self.events.clone(),
        };

        let mut readers = JoinSet::new();
        for shard_id in shards {
            readers.spawn(ShardReader::new(shard_id, ctx.clone()).run(shutdown_rx.clone()));
        }
        // The supervisor keeps one sender until shutdown so the stream stays
        // open even when there are no readers
        let keepalive = ctx.sender.clone();
        drop(ctx);

        self.started = true;
        self.background = Some(tokio::spawn(supervise(
            readers,
            keepalive,
            self.cache.clone(),
            self.config.flush_interval,
            shutdown_rx,
        )));

        Ok(stream)
    }

    /// Wait for the readers and the final checkpoint flush to finish
    pub async fn join(&mut self) -> Result<()> {
        if let Some(handle) = self.background.take() {
            handle.await?;
        }
        Ok(())
    }
}

#[cfg(feature = "dynamodb-store")]
impl KinesisConsumer<aws_sdk_kinesis::Client, crate::store::DynamoDbCheckpointStore> {
    /// Build a consumer on the default AWS configuration chain, with
    /// checkpoints kept in the DynamoDB table `table_name`
    pub async fn connect(
        app_name: impl Into<String>,
        stream_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<(Self, Option<mpsc::Receiver<ConsumerEvent>>)> {
        let config = ConsumerConfig::new(app_name, stream_name, table_name);
        Self::connect_with_config(config).await
    }

    pub async fn connect_with_config(
        config: ConsumerConfig,
    ) -> Result<(Self, Option<mpsc::Receiver<ConsumerEvent>>)> {
        config.validate()?;

        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let kinesis = aws_sdk_kinesis::Client::new(&sdk_config);
        let store = crate::store::DynamoDbCheckpointStore::builder()
            .with_client(aws_sdk_dynamodb::Client::new(&sdk_config))
            .with_table_name(config.table_name.clone())
            .build()
            .map_err(|e| ConsumerError::InvalidConfig(e.to_string()))?;

        Self::new(config, kinesis, store)
    }
}

async fn supervise<S>(
    mut readers: JoinSet<()>,
    keepalive: RecordSender,
    cache: CheckpointCache<S>,
    flush_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) where
    S: CheckpointStore + 'static,
{
    cache.run_flush_loop(flush_interval, shutdown_rx).await;
    drop(keepalive);

    info!("Shutdown requested, waiting for shard readers");
    while let Some(result) = readers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Shard reader task failed");
        }
    }

    let report = cache.flush().await;
    info!(
        saved = report.saved,
        stale = report.stale,
        failed = report.failed,
        "Final checkpoint flush complete"
    );
}
