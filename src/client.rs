//! Stream backend seam and its AWS Kinesis implementation

use async_trait::async_trait;
use aws_sdk_kinesis::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::{types::ShardIteratorType, Client};
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors surfaced by the stream backend
#[derive(Debug, Clone, Error)]
pub enum KinesisClientError {
    #[error("Iterator expired")]
    ExpiredIterator,

    #[error("Throughput exceeded")]
    ThroughputExceeded,

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("KMS error: {0}")]
    KmsError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{0}")]
    Other(String),
}

/// A single record as returned by the stream backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub sequence_number: String,
    pub data: Bytes,
    pub approximate_arrival_timestamp: Option<DateTime<Utc>>,
}

/// Result of one `GetRecords` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    pub records: Vec<StreamRecord>,
    /// Iterator for the following call; `None` once the shard is closed
    pub next_iterator: Option<String>,
    /// How far the returned records trail the tip of the shard
    pub millis_behind_latest: Option<i64>,
}

#[async_trait]
pub trait KinesisClientTrait: Send + Sync {
    /// List the ids of every shard in the stream
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<String>, KinesisClientError>;

    /// Acquire an iterator positioned just after `after_sequence_number`,
    /// or at the trim horizon when it is `None`
    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        after_sequence_number: Option<&str>,
    ) -> Result<String, KinesisClientError>;

    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<i32>,
    ) -> Result<RecordBatch, KinesisClientError>;
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> KinesisClientError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) => {
            return KinesisClientError::Timeout(DisplayErrorContext(&err).to_string())
        }
        SdkError::DispatchFailure(_) => {
            return KinesisClientError::ConnectionError(DisplayErrorContext(&err).to_string())
        }
        _ => {}
    }

    let message = err.message().unwrap_or_default().to_string();
    match err.code() {
        Some("ExpiredIteratorException") => KinesisClientError::ExpiredIterator,
        Some("ProvisionedThroughputExceededException") | Some("LimitExceededException") => {
            KinesisClientError::ThroughputExceeded
        }
        Some("AccessDeniedException") => KinesisClientError::AccessDenied,
        Some("InvalidArgumentException") => KinesisClientError::InvalidArgument(message),
        Some("ResourceNotFoundException") => KinesisClientError::ResourceNotFound(message),
        Some(code) if code.starts_with("KMS") => KinesisClientError::KmsError(message),
        _ => KinesisClientError::Other(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl KinesisClientTrait for Client {
    async fn list_shards(&self, stream_name: &str) -> Result<Vec<String>, KinesisClientError> {
        let mut shards = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // ListShards rejects StreamName together with NextToken
            let request = match &next_token {
                Some(token) => self.list_shards().next_token(token),
                None => self.list_shards().stream_name(stream_name),
            };
            let response = request.send().await.map_err(classify_sdk_error)?;

            shards.extend(response.shards().iter().map(|s| s.shard_id().to_string()));

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(stream = %stream_name, shard_count = shards.len(), "Listed shards");
        Ok(shards)
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        after_sequence_number: Option<&str>,
    ) -> Result<String, KinesisClientError> {
        let mut req = self
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id);

        req = match after_sequence_number {
            Some(seq) => req
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(seq),
            None => req.shard_iterator_type(ShardIteratorType::TrimHorizon),
        };

        let response = req.send().await.map_err(classify_sdk_error)?;
        response
            .shard_iterator()
            .map(String::from)
            .ok_or_else(|| KinesisClientError::Other("No shard iterator returned".to_string()))
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<i32>,
    ) -> Result<RecordBatch, KinesisClientError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .set_limit(limit)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let records = response
            .records()
            .iter()
            .map(|r| {
                StreamRecord {
                    sequence_number: r.sequence_number().to_string(),
                    data: Bytes::copy_from_slice(r.data().as_ref()),
                    approximate_arrival_timestamp: r
                        .approximate_arrival_timestamp()
                        .and_then(arrival_time),
                }
            })
            .collect::<Vec<_>>();

        trace!(
            count = records.len(),
            millis_behind_latest = ?response.millis_behind_latest(),
            "Fetched records"
        );

        Ok(RecordBatch {
            records,
            next_iterator: response.next_shard_iterator().map(String::from),
            millis_behind_latest: response.millis_behind_latest(),
        })
    }
}

fn arrival_time(ts: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    match ts.to_chrono_utc() {
        Ok(dt) => Some(dt),
        Err(e) => {
            warn!(error = %e, "Unrepresentable arrival timestamp");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrival_time_conversion() {
        let ts = aws_smithy_types::DateTime::from_secs(1_700_000_000);
        let converted = arrival_time(&ts).expect("representable timestamp");
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }
}
