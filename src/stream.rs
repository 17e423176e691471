//! Merged output channel shared by every shard reader

use crate::record::Record;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;

/// Build the output channel. A capacity of zero gives a hand-off channel in
/// which a send completes only once the receiver has taken the record.
pub(crate) fn record_channel(capacity: usize) -> (RecordSender, RecordStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        RecordSender {
            tx,
            handoff: capacity == 0,
        },
        RecordStream { rx },
    )
}

#[derive(Debug, Clone)]
pub(crate) struct RecordSender {
    tx: mpsc::Sender<Record>,
    handoff: bool,
}

impl RecordSender {
    /// Fails only when the [`RecordStream`] has been dropped
    pub(crate) async fn send(&self, record: Record) -> Result<(), SendError<()>> {
        self.tx.send(record).await.map_err(|_| SendError(()))?;

        if self.handoff {
            // The single slot frees up once the receiver has taken the record
            let permit = self.tx.reserve().await?;
            drop(permit);
        }

        Ok(())
    }
}

/// Records from every shard, FIFO within a shard and unordered across shards.
///
/// The stream only ends after shutdown, once every shard reader has exited.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<Record>,
}

impl RecordStream {
    /// Receive the next record, waiting until one is available
    pub async fn recv(&mut self) -> Option<Record> {
        self.rx.recv().await
    }

    /// Take a record if one is already buffered
    pub fn try_recv(&mut self) -> Option<Record> {
        self.rx.try_recv().ok()
    }
}

impl Stream for RecordStream {
    type Item = Record;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Record>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
