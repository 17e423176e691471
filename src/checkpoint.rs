//! In-memory checkpoint cache with periodic, monotonic flushes
//!
//! Shard readers call [`CheckpointCache::advance`] after every record they
//! hand off. The flush loop writes the latest value per shard to the durable
//! store once per period, so the store sees one write per shard per period
//! instead of one per record. Up to one period of records can be redelivered
//! after a crash.

use crate::monitoring::{CheckpointOutcome, ConsumerEvent, EventSink};
use crate::record::SequenceNumber;
use crate::shutdown;
use crate::store::{CheckpointKey, CheckpointStore, SaveOutcome};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Counts of per-shard outcomes for one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    /// Entries the store already held a newer value for
    pub stale: usize,
    /// Entries left for the next flush after a store error
    pub failed: usize,
}

struct CacheInner<S> {
    store: Arc<S>,
    app_name: String,
    stream_name: String,
    entries: RwLock<BTreeMap<String, SequenceNumber>>,
    events: EventSink,
}

/// Latest delivered sequence number per shard
pub struct CheckpointCache<S> {
    inner: Arc<CacheInner<S>>,
}

impl<S> Clone for CheckpointCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> CheckpointCache<S>
where
    S: CheckpointStore + 'static,
{
    pub fn new(store: Arc<S>, app_name: impl Into<String>, stream_name: impl Into<String>) -> Self {
        Self::with_events(store, app_name, stream_name, EventSink::disabled())
    }

    pub(crate) fn with_events(
        store: Arc<S>,
        app_name: impl Into<String>,
        stream_name: impl Into<String>,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                app_name: app_name.into(),
                stream_name: stream_name.into(),
                entries: RwLock::new(BTreeMap::new()),
                events,
            }),
        }
    }

    /// Durable key for `shard_id` under this cache's application and stream
    pub fn key(&self, shard_id: &str) -> CheckpointKey {
        CheckpointKey::new(&self.inner.app_name, &self.inner.stream_name, shard_id)
    }

    /// Record that `sequence_number` has been delivered for `shard_id`.
    ///
    /// Never moves an entry backwards, so replaying an older marker is a no-op.
    pub fn advance(&self, shard_id: &str, sequence_number: &str) {
        let next = SequenceNumber::from(sequence_number);
        let mut entries = self.inner.entries.write();

        match entries.get_mut(shard_id) {
            Some(current) if *current >= next => {
                trace!(
                    shard_id = %shard_id,
                    current = %current,
                    sequence_number = %sequence_number,
                    "Ignoring checkpoint that does not advance"
                );
            }
            Some(current) => *current = next,
            None => {
                entries.insert(shard_id.to_string(), next);
            }
        }
    }

    /// Cached sequence number for `shard_id`, if any record has been delivered
    pub fn get(&self, shard_id: &str) -> Option<String> {
        self.inner
            .entries
            .read()
            .get(shard_id)
            .map(|s| s.as_str().to_string())
    }

    /// Read the last flushed value for `shard_id` straight from the store
    pub async fn durable_checkpoint(&self, shard_id: &str) -> anyhow::Result<Option<String>> {
        self.inner.store.get_checkpoint(&self.key(shard_id)).await
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(shard, seq)| (shard.clone(), seq.as_str().to_string()))
            .collect()
    }

    /// Write every cached entry to the durable store.
    ///
    /// A stale outcome means the monotonic guard kept a newer stored value and
    /// counts as success. Store errors are logged and the entry is retried on
    /// the next flush.
    pub async fn flush(&self) -> FlushReport {
        // The guard must be released before awaiting the store
        let pending = self.snapshot();
        let mut report = FlushReport::default();

        for (shard_id, sequence_number) in pending {
            let key = self.key(&shard_id);
            let outcome = match self
                .inner
                .store
                .save_checkpoint_if_not_lower(&key, &sequence_number)
                .await
            {
                Ok(SaveOutcome::Saved) => {
                    report.saved += 1;
                    trace!(
                        shard_id = %shard_id,
                        sequence_number = %sequence_number,
                        "Checkpoint flushed"
                    );
                    CheckpointOutcome::Saved
                }
                Ok(SaveOutcome::Stale) => {
                    report.stale += 1;
                    debug!(
                        shard_id = %shard_id,
                        sequence_number = %sequence_number,
                        "Stored checkpoint already newer"
                    );
                    CheckpointOutcome::Stale
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        shard_id = %shard_id,
                        sequence_number = %sequence_number,
                        error = %e,
                        "Failed to flush checkpoint, will retry next cycle"
                    );
                    CheckpointOutcome::Failed(e.to_string())
                }
            };

            self.inner
                .events
                .emit(ConsumerEvent::checkpoint(shard_id, sequence_number, outcome));
        }

        report
    }

    /// Flush every `period` until shutdown is requested.
    ///
    /// The final flush after shutdown is left to the caller, which first has
    /// to wait for the readers to stop advancing.
    pub(crate) async fn run_flush_loop(
        &self,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.flush().await;
                    debug!(
                        saved = report.saved,
                        stale = report.stale,
                        failed = report.failed,
                        "Periodic checkpoint flush complete"
                    );
                }
                _ = shutdown::requested(&mut shutdown_rx) => break,
            }
        }
    }
}
