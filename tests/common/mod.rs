// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::Result;
use kinesis_checkpoint_consumer::test::mocks::MockKinesisClient;
use kinesis_checkpoint_consumer::test::{init_logging, TestUtils};
use kinesis_checkpoint_consumer::{
    store::InMemoryCheckpointStore, ConsumerConfig, KinesisConsumer, Record, RecordStream,
};
use std::time::Duration;
use tokio::sync::watch;

pub const APP: &str = "test-app";
pub const STREAM: &str = "test-stream";

pub fn create_test_config() -> ConsumerConfig {
    ConsumerConfig {
        channel_capacity: 100,
        poll_interval: Duration::from_millis(1),
        flush_interval: Duration::from_secs(60),
        retry_initial_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(20),
        ..ConsumerConfig::new(APP, STREAM, "test-checkpoints")
    }
}

pub struct TestContext {
    pub config: ConsumerConfig,
    pub client: MockKinesisClient,
    pub store: InMemoryCheckpointStore,
}

impl TestContext {
    pub fn new() -> Self {
        init_logging();
        Self {
            config: create_test_config(),
            client: MockKinesisClient::new(),
            store: InMemoryCheckpointStore::new(),
        }
    }

    /// Script `shards` for discovery and one batch of `count` records per shard
    pub async fn with_shards(self, shards: &[&str], count: u64) -> Self {
        self.client
            .mock_list_shards(Ok(shards.iter().map(|s| s.to_string()).collect()))
            .await;
        for shard in shards {
            self.client
                .mock_get_records(
                    shard,
                    Ok(TestUtils::create_batch(shard, TestUtils::create_test_records(1, count))),
                )
                .await;
        }
        self
    }

    pub async fn start(
        &self,
    ) -> Result<(
        KinesisConsumer<MockKinesisClient, InMemoryCheckpointStore>,
        RecordStream,
        watch::Sender<bool>,
    )> {
        let (mut consumer, _) =
            KinesisConsumer::new(self.config.clone(), self.client.clone(), self.store.clone())?;
        let (tx, rx) = watch::channel(false);
        let stream = consumer.start(rx).await?;
        Ok((consumer, stream, tx))
    }

    pub async fn stored_checkpoint(&self, shard_id: &str) -> Option<String> {
        self.store
            .get_all_checkpoints()
            .await
            .into_iter()
            .find(|(key, _)| key.shard_id == shard_id)
            .map(|(_, seq)| seq)
    }
}

/// Receive exactly `count` records, failing if any takes longer than a second
pub async fn collect_records(stream: &mut RecordStream, count: usize) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let record = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream ended after {} records", records.len()))?;
        records.push(record);
    }
    Ok(records)
}

pub fn sequences_for(records: &[Record], shard_id: &str) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.shard_id == shard_id)
        .map(|r| r.sequence_number.clone())
        .collect()
}
