use anyhow::Context;
#[cfg(feature = "dynamodb-store")]
use {
    crate::store::{CheckpointKey, CheckpointStore, SaveOutcome},
    async_trait::async_trait,
    aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient},
    tracing::{debug, instrument, trace},
};

const APP_NAME_ATTR: &str = "AppName";
const STREAM_SHARD_ATTR: &str = "StreamShard";
const SEQUENCE_NUMBER_ATTR: &str = "SequenceNumber";

/// DynamoDB-backed checkpoint store.
///
/// Items are keyed by `AppName` (hash key) and `StreamShard` (range key,
/// `"{stream}_{shard}"`). Writes are conditional so the stored
/// `SequenceNumber` never moves backwards, even with several processes
/// flushing the same key. The condition compares strings, which orders
/// Kinesis sequence numbers correctly as long as they share a width.
#[cfg(feature = "dynamodb-store")]
#[derive(Debug, Clone)]
pub struct DynamoDbCheckpointStore {
    client: DynamoClient,
    table_name: String,
}

#[cfg(feature = "dynamodb-store")]
impl DynamoDbCheckpointStore {
    pub fn builder() -> DynamoDbCheckpointStoreBuilder {
        DynamoDbCheckpointStoreBuilder::new()
    }

    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn stream_shard(key: &CheckpointKey) -> String {
        format!("{}_{}", key.stream_name, key.shard_id)
    }
}

#[cfg(feature = "dynamodb-store")]
#[async_trait]
impl CheckpointStore for DynamoDbCheckpointStore {
    #[instrument(skip(self, key), fields(table = %self.table_name, key = %key))]
    async fn get_checkpoint(&self, key: &CheckpointKey) -> anyhow::Result<Option<String>> {
        let stream_shard = Self::stream_shard(key);

        trace!(stream_shard = %stream_shard, "Getting checkpoint from DynamoDB");

        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(APP_NAME_ATTR, AttributeValue::S(key.app_name.clone()))
            .key(STREAM_SHARD_ATTR, AttributeValue::S(stream_shard))
            .consistent_read(true)
            .send()
            .await
            .context("Failed to get checkpoint from DynamoDB")?;

        let checkpoint = response
            .item
            .and_then(|item| item.get(SEQUENCE_NUMBER_ATTR).cloned())
            .and_then(|attr| attr.as_s().ok().map(|s| s.to_string()))
            .filter(|s| !s.is_empty());

        debug!(checkpoint = ?checkpoint, "Retrieved checkpoint from DynamoDB");

        Ok(checkpoint)
    }

    #[instrument(skip(self, key), fields(table = %self.table_name, key = %key))]
    async fn save_checkpoint_if_not_lower(
        &self,
        key: &CheckpointKey,
        sequence_number: &str,
    ) -> anyhow::Result<SaveOutcome> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(APP_NAME_ATTR, AttributeValue::S(key.app_name.clone()))
            .key(STREAM_SHARD_ATTR, AttributeValue::S(Self::stream_shard(key)))
            .update_expression("SET #SN = :sn")
            .condition_expression("attribute_not_exists(#SN) OR #SN <= :sn")
            .expression_attribute_names("#SN", SEQUENCE_NUMBER_ATTR)
            .expression_attribute_values(":sn", AttributeValue::S(sequence_number.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => {
                trace!(sequence_number = %sequence_number, "Checkpoint saved to DynamoDB");
                Ok(SaveOutcome::Saved)
            }
            Err(e)
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                debug!(
                    sequence_number = %sequence_number,
                    "Stored checkpoint is newer, conditional write skipped"
                );
                Ok(SaveOutcome::Stale)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to save checkpoint to DynamoDB")),
        }
    }
}

#[cfg(feature = "dynamodb-store")]
#[derive(Debug, Default)]
pub struct DynamoDbCheckpointStoreBuilder {
    client: Option<DynamoClient>,
    table_name: Option<String>,
}

#[cfg(feature = "dynamodb-store")]
impl DynamoDbCheckpointStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: DynamoClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn build(self) -> anyhow::Result<DynamoDbCheckpointStore> {
        let table_name = self
            .table_name
            .filter(|t| !t.is_empty())
            .context("Table name is required")?;
        Ok(DynamoDbCheckpointStore {
            client: self.client.context("DynamoDB client is required")?,
            table_name,
        })
    }
}
