//! Test utilities and mock implementations for testing the consumer


use crate::client::{RecordBatch, StreamRecord};
use bytes::Bytes;
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize logging for tests, once per process
pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive("kinesis_checkpoint_consumer=debug".parse().unwrap()),
            )
            .with_test_writer()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .ok();
    });
}

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// Create a test record with given sequence number and data
    pub fn create_test_record(sequence_number: &str, data: &[u8]) -> StreamRecord {
        StreamRecord {
            sequence_number: sequence_number.to_string(),
            data: Bytes::copy_from_slice(data),
            approximate_arrival_timestamp: None,
        }
    }

    /// Create `count` records with numeric sequence numbers starting at `first`
    pub fn create_test_records(first: u64, count: u64) -> Vec<StreamRecord> {
        (first..first + count)
            .map(|i| Self::create_test_record(&i.to_string(), format!("data-{}", i).as_bytes()))
            .collect()
    }

    /// A caught-up batch for `shard_id` that continues on `"{shard_id}/next"`
    pub fn create_batch(shard_id: &str, records: Vec<StreamRecord>) -> RecordBatch {
        RecordBatch {
            records,
            next_iterator: Some(format!("{}/next", shard_id)),
            millis_behind_latest: Some(0),
        }
    }

    /// A batch after which the shard reports no further iterator
    pub fn create_final_batch(records: Vec<StreamRecord>) -> RecordBatch {
        RecordBatch {
            records,
            next_iterator: None,
            millis_behind_latest: Some(0),
        }
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_for_condition<F, Fut>(mut check: F, timeout: Duration) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while !check().await {
        if start.elapsed() > timeout {
            anyhow::bail!("Condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_records() {
        let records = TestUtils::create_test_records(5, 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number, "5");
        assert_eq!(records[2].sequence_number, "7");
        assert_eq!(records[1].data.as_ref(), b"data-6");
    }

    #[test]
    fn test_batches() {
        let batch = TestUtils::create_batch("shard-1", vec![]);
        assert_eq!(batch.next_iterator.as_deref(), Some("shard-1/next"));

        let batch = TestUtils::create_final_batch(TestUtils::create_test_records(1, 1));
        assert!(batch.next_iterator.is_none());
    }
}
