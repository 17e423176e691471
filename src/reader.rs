//! Per-shard reader loop
//!
//! Each shard gets one [`ShardReader`] running in its own task. The reader
//! moves through four states:
//!
//! - `Resuming`: pick the resume marker (cached value, then durable value)
//!   and acquire an iterator after it, or at the trim horizon
//! - `Polling`: fetch one batch with the current iterator
//! - `Draining`: hand every record of the batch to the output stream in
//!   order, advancing the checkpoint cache after each hand-off
//! - `Backoff`: wait the adaptive poll delay before the next fetch
//!
//! A failed fetch drops the iterator and sends the reader back to
//! `Resuming`, so progress restarts just after the last delivered record.

use crate::checkpoint::CheckpointCache;
use crate::client::{KinesisClientError, KinesisClientTrait, RecordBatch, StreamRecord};
use crate::error::{ConsumerError, Result};
use crate::monitoring::{ConsumerEvent, EventSink, IteratorEventType, ShardEventType};
use crate::record::Record;
use crate::retry::{Backoff, ExponentialBackoff, PollBackoff};
use crate::shutdown;
use crate::store::CheckpointStore;
use crate::stream::RecordSender;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Everything a shard reader shares with its siblings
pub(crate) struct ReaderContext<C, S> {
    pub(crate) stream_name: String,
    pub(crate) client: Arc<C>,
    pub(crate) cache: CheckpointCache<S>,
    pub(crate) sender: RecordSender,
    /// Poll delay ceiling in poll units, adjustable while running
    pub(crate) max_wait: Arc<AtomicU32>,
    pub(crate) poll_interval: Duration,
    pub(crate) batch_size: Option<i32>,
    pub(crate) retry_backoff: ExponentialBackoff,
    pub(crate) events: EventSink,
}

impl<C, S> Clone for ReaderContext<C, S> {
    fn clone(&self) -> Self {
        Self {
            stream_name: self.stream_name.clone(),
            client: self.client.clone(),
            cache: self.cache.clone(),
            sender: self.sender.clone(),
            max_wait: self.max_wait.clone(),
            poll_interval: self.poll_interval,
            batch_size: self.batch_size,
            retry_backoff: self.retry_backoff.clone(),
            events: self.events.clone(),
        }
    }
}

enum ReaderState {
    Resuming,
    Polling,
    Draining(RecordBatch),
    Backoff {
        record_count: usize,
        millis_behind_latest: Option<i64>,
    },
    Exhausted,
}

/// How a drain ended
enum Drained {
    Complete,
    Interrupted,
}

pub(crate) struct ShardReader<C, S> {
    shard_id: String,
    ctx: ReaderContext<C, S>,
    iterator: Option<String>,
    poll_backoff: PollBackoff,
    consecutive_failures: u32,
}

impl<C, S> ShardReader<C, S>
where
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    pub(crate) fn new(shard_id: impl Into<String>, ctx: ReaderContext<C, S>) -> Self {
        Self {
            shard_id: shard_id.into(),
            ctx,
            iterator: None,
            poll_backoff: PollBackoff::new(),
            consecutive_failures: 0,
        }
    }

    /// Run until shutdown is requested or the output stream is dropped
    pub(crate) async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(shard_id = %self.shard_id, "Starting shard reader");
        self.ctx.events.emit(ConsumerEvent::shard_event(
            self.shard_id.clone(),
            ShardEventType::Started,
            None,
        ));

        let mut state = ReaderState::Resuming;

        loop {
            if shutdown::is_requested(&shutdown_rx) {
                debug!(shard_id = %self.shard_id, "Shutdown observed at top of loop");
                break;
            }

            state = match state {
                ReaderState::Resuming => {
                    self.resume().await;
                    ReaderState::Polling
                }
                ReaderState::Polling => match self.poll().await {
                    Ok(batch) => {
                        self.consecutive_failures = 0;
                        ReaderState::Draining(batch)
                    }
                    Err(e) => {
                        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                        warn!(
                            shard_id = %self.shard_id,
                            error = %e,
                            consecutive_failures = self.consecutive_failures,
                            "Failed to fetch records, re-acquiring iterator"
                        );
                        self.ctx.events.emit(ConsumerEvent::fetch_failed(
                            self.shard_id.clone(),
                            e.to_string(),
                            self.consecutive_failures,
                        ));

                        let delay = self
                            .ctx
                            .retry_backoff
                            .next_delay(self.consecutive_failures - 1);
                        if !pause(delay, &mut shutdown_rx).await {
                            break;
                        }
                        ReaderState::Resuming
                    }
                },
                ReaderState::Draining(batch) => {
                    let record_count = batch.records.len();
                    let millis_behind_latest = batch.millis_behind_latest;

                    if let Drained::Interrupted = self.drain(batch.records, &mut shutdown_rx).await
                    {
                        break;
                    }

                    match batch.next_iterator {
                        Some(next) => {
                            self.iterator = Some(next);
                            ReaderState::Backoff {
                                record_count,
                                millis_behind_latest,
                            }
                        }
                        None => ReaderState::Exhausted,
                    }
                }
                ReaderState::Backoff {
                    record_count,
                    millis_behind_latest,
                } => {
                    let max_wait = self.ctx.max_wait.load(Ordering::Relaxed);
                    let delay = self
                        .poll_backoff
                        .observe(record_count, millis_behind_latest, max_wait);
                    trace!(shard_id = %self.shard_id, delay, max_wait, "Poll backoff");
                    self.ctx
                        .events
                        .emit(ConsumerEvent::backoff(self.shard_id.clone(), delay));

                    if delay > 0 && !pause(self.ctx.poll_interval * delay, &mut shutdown_rx).await
                    {
                        break;
                    }
                    ReaderState::Polling
                }
                ReaderState::Exhausted => {
                    info!(
                        shard_id = %self.shard_id,
                        "Shard has no further iterator, idling until shutdown"
                    );
                    self.ctx.events.emit(ConsumerEvent::shard_event(
                        self.shard_id.clone(),
                        ShardEventType::Exhausted,
                        None,
                    ));
                    shutdown::requested(&mut shutdown_rx).await;
                    break;
                }
            };
        }

        info!(shard_id = %self.shard_id, "Shard reader stopped");
        self.ctx.events.emit(ConsumerEvent::shard_event(
            self.shard_id.clone(),
            ShardEventType::Stopped,
            None,
        ));
    }

    /// Pick a resume marker and acquire an iterator after it.
    ///
    /// On any failure the iterator is left unset, which makes the next poll
    /// fail and brings the reader back here after the retry delay.
    async fn resume(&mut self) {
        self.iterator = None;

        let marker = match self.ctx.cache.get(&self.shard_id) {
            Some(cached) => {
                debug!(shard_id = %self.shard_id, checkpoint = %cached, "Resuming from cached checkpoint");
                Some(cached)
            }
            None => match self.ctx.cache.durable_checkpoint(&self.shard_id).await {
                Ok(Some(stored)) => {
                    info!(shard_id = %self.shard_id, checkpoint = %stored, "Retrieved existing checkpoint");
                    Some(stored)
                }
                Ok(None) => {
                    info!(shard_id = %self.shard_id, "No existing checkpoint found, starting at trim horizon");
                    None
                }
                Err(e) => {
                    let err = ConsumerError::CheckpointError(e.to_string());
                    warn!(shard_id = %self.shard_id, error = %err, "Failed to retrieve checkpoint");
                    self.ctx.events.emit(ConsumerEvent::iterator(
                        self.shard_id.clone(),
                        IteratorEventType::Failed,
                        None,
                        Some(err.to_string()),
                    ));
                    return;
                }
            },
        };

        match self
            .ctx
            .client
            .get_shard_iterator(&self.ctx.stream_name, &self.shard_id, marker.as_deref())
            .await
        {
            Ok(iterator) => {
                debug!(shard_id = %self.shard_id, "Acquired shard iterator");
                self.iterator = Some(iterator);
                self.ctx.events.emit(ConsumerEvent::iterator(
                    self.shard_id.clone(),
                    IteratorEventType::Acquired,
                    marker,
                    None,
                ));
            }
            Err(e) => {
                let err = ConsumerError::GetIteratorFailed(e.to_string());
                warn!(shard_id = %self.shard_id, error = %err, "Failed to get shard iterator");
                self.ctx.events.emit(ConsumerEvent::iterator(
                    self.shard_id.clone(),
                    IteratorEventType::Failed,
                    marker,
                    Some(err.to_string()),
                ));
            }
        }
    }

    async fn poll(&self) -> Result<RecordBatch> {
        let iterator = self.iterator.as_deref().ok_or_else(|| {
            ConsumerError::GetIteratorFailed(format!("no iterator held for shard {}", self.shard_id))
        })?;

        let start = Instant::now();
        match self.ctx.client.get_records(iterator, self.ctx.batch_size).await {
            Ok(batch) => {
                trace!(
                    shard_id = %self.shard_id,
                    record_count = batch.records.len(),
                    millis_behind_latest = ?batch.millis_behind_latest,
                    "Fetched batch"
                );
                self.ctx.events.emit(ConsumerEvent::batch_fetched(
                    self.shard_id.clone(),
                    batch.records.len(),
                    batch.millis_behind_latest,
                    start.elapsed(),
                ));
                Ok(batch)
            }
            Err(KinesisClientError::ExpiredIterator) => {
                Err(ConsumerError::IteratorExpired(self.shard_id.clone()))
            }
            Err(e) => Err(ConsumerError::GetRecordsFailed(e.to_string())),
        }
    }

    /// Deliver `records` in order. The cache only advances past a record once
    /// the output stream has accepted it.
    async fn drain(
        &self,
        records: Vec<StreamRecord>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Drained {
        let record_count = records.len();
        let mut last_sequence_number = None;

        for stream_record in records {
            let sequence_number = stream_record.sequence_number.clone();
            let record = Record {
                shard_id: self.shard_id.clone(),
                sequence_number: stream_record.sequence_number,
                arrival_timestamp: stream_record
                    .approximate_arrival_timestamp
                    .unwrap_or_default(),
                data: stream_record.data,
            };

            tokio::select! {
                sent = self.ctx.sender.send(record) => {
                    if sent.is_err() {
                        info!(shard_id = %self.shard_id, "Record stream dropped, stopping reader");
                        return Drained::Interrupted;
                    }
                }
                _ = shutdown::requested(shutdown_rx) => {
                    debug!(
                        shard_id = %self.shard_id,
                        sequence_number = %sequence_number,
                        "Shutdown while handing off record"
                    );
                    return Drained::Interrupted;
                }
            }

            self.ctx.cache.advance(&self.shard_id, &sequence_number);
            last_sequence_number = Some(sequence_number);
        }

        if record_count > 0 {
            self.ctx.events.emit(ConsumerEvent::batch_delivered(
                self.shard_id.clone(),
                record_count,
                last_sequence_number,
            ));
        }

        Drained::Complete
    }
}

/// Sleep for `duration`, returning `false` if shutdown arrives first
async fn pause(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown::requested(shutdown_rx) => false,
    }
}
