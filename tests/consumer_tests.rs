use anyhow::Result;
use futures::StreamExt;
use kinesis_checkpoint_consumer::monitoring::MetricsAggregator;
use kinesis_checkpoint_consumer::test::mocks::MockKinesisClient;
use kinesis_checkpoint_consumer::test::{wait_for_condition, TestUtils};
use kinesis_checkpoint_consumer::{CheckpointKey, CheckpointStore, KinesisConsumer};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::watch;

mod common;

use common::{collect_records, sequences_for, TestContext, APP, STREAM};

#[tokio::test]
async fn test_consumer_lifecycle() -> Result<()> {
    let ctx = TestContext::new()
        .with_shards(&["shard-1", "shard-2"], 3)
        .await;
    let (mut consumer, mut stream, shutdown_tx) = ctx.start().await?;

    let records = collect_records(&mut stream, 6).await?;
    assert_eq!(sequences_for(&records, "shard-1"), vec!["1", "2", "3"]);
    assert_eq!(sequences_for(&records, "shard-2"), vec!["1", "2", "3"]);
    assert_eq!(records[0].data.as_ref(), b"data-1");

    // Nothing is flushed before the first period elapses
    assert_eq!(ctx.stored_checkpoint("shard-1").await, None);

    shutdown_tx.send(true)?;
    tokio::time::timeout(Duration::from_secs(2), consumer.join()).await??;

    assert_eq!(ctx.stored_checkpoint("shard-1").await.as_deref(), Some("3"));
    assert_eq!(ctx.stored_checkpoint("shard-2").await.as_deref(), Some("3"));
    assert!(stream.next().await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_restart_resumes_after_flushed_checkpoint() -> Result<()> {
    let first = TestContext::new().with_shards(&["shard-1"], 3).await;
    let (mut consumer, mut stream, shutdown_tx) = first.start().await?;
    collect_records(&mut stream, 3).await?;
    shutdown_tx.send(true)?;
    consumer.join().await?;

    // Same store, fresh client
    let second = TestContext {
        client: MockKinesisClient::new(),
        ..first
    };
    second
        .client
        .mock_list_shards(Ok(vec!["shard-1".to_string()]))
        .await;
    second
        .client
        .mock_get_records(
            "shard-1",
            Ok(TestUtils::create_batch("shard-1", TestUtils::create_test_records(4, 2))),
        )
        .await;

    let (mut consumer, mut stream, shutdown_tx) = second.start().await?;
    let records = collect_records(&mut stream, 2).await?;
    assert_eq!(sequences_for(&records, "shard-1"), vec!["4", "5"]);

    let requests = second.client.get_iterator_requests().await;
    assert_eq!(requests[0].after_sequence_number.as_deref(), Some("3"));

    shutdown_tx.send(true)?;
    consumer.join().await?;
    assert_eq!(second.stored_checkpoint("shard-1").await.as_deref(), Some("5"));

    Ok(())
}

#[tokio::test]
async fn test_zero_capacity_advances_only_past_received_records() -> Result<()> {
    let mut ctx = TestContext::new().with_shards(&["shard-1"], 3).await;
    ctx.config.channel_capacity = 0;
    let (mut consumer, mut stream, shutdown_tx) = ctx.start().await?;

    let first = collect_records(&mut stream, 1).await?;
    assert_eq!(first[0].sequence_number, "1");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        consumer.checkpoint_cache().get("shard-1").as_deref(),
        Some("1")
    );

    shutdown_tx.send(true)?;
    consumer.join().await?;
    assert_eq!(ctx.stored_checkpoint("shard-1").await.as_deref(), Some("1"));

    Ok(())
}

#[tokio::test]
async fn test_periodic_flush_without_shutdown() -> Result<()> {
    let mut ctx = TestContext::new().with_shards(&["shard-1"], 2).await;
    ctx.config.flush_interval = Duration::from_millis(20);
    let (mut consumer, mut stream, shutdown_tx) = ctx.start().await?;

    collect_records(&mut stream, 2).await?;

    let store = ctx.store.clone();
    let key = CheckpointKey::new(APP, STREAM, "shard-1");
    wait_for_condition(
        || {
            let store = store.clone();
            let key = key.clone();
            async move {
                store.get_checkpoint(&key).await.ok().flatten().as_deref() == Some("2")
            }
        },
        Duration::from_secs(1),
    )
    .await?;

    shutdown_tx.send(true)?;
    consumer.join().await?;
    Ok(())
}

#[tokio::test]
async fn test_metrics_follow_consumer_events() -> Result<()> {
    let mut ctx = TestContext::new().with_shards(&["shard-1"], 4).await;
    ctx.config.monitoring.enabled = true;

    let (mut consumer, monitoring_rx) =
        KinesisConsumer::new(ctx.config.clone(), ctx.client.clone(), ctx.store.clone())?;
    let monitoring_rx = monitoring_rx.ok_or_else(|| anyhow::anyhow!("monitoring disabled"))?;
    let aggregator = MetricsAggregator::from_config(&ctx.config.monitoring, monitoring_rx);
    let metrics = aggregator.metrics_handle();
    let aggregator_handle = tokio::spawn(aggregator.run());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut stream = consumer.start(shutdown_rx).await?;
    collect_records(&mut stream, 4).await?;

    shutdown_tx.send(true)?;
    consumer.join().await?;
    // Closing the last event sender stops the aggregator
    drop(consumer);
    tokio::time::timeout(Duration::from_secs(1), aggregator_handle).await??;

    let metrics = metrics.read().await;
    let shard = metrics
        .get("shard-1")
        .ok_or_else(|| anyhow::anyhow!("no metrics for shard-1"))?;
    assert_eq!(shard.records_delivered, 4);
    assert_eq!(shard.iterators_acquired, 1);
    assert_eq!(shard.checkpoints_saved, 1);
    assert_eq!(shard.last_checkpoint.as_deref(), Some("4"));

    Ok(())
}
