//! Durable checkpoint storage for the Kinesis consumer

use async_trait::async_trait;
use std::fmt;

#[cfg(feature = "dynamodb-store")]
pub mod dynamodb;
pub mod memory;

/// Identity of a durable checkpoint.
///
/// Keys compare by value so that two independently built keys for the same
/// application, stream and shard always address the same checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointKey {
    pub app_name: String,
    pub stream_name: String,
    pub shard_id: String,
}

impl CheckpointKey {
    pub fn new(
        app_name: impl Into<String>,
        stream_name: impl Into<String>,
        shard_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            stream_name: stream_name.into(),
            shard_id: shard_id.into(),
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.stream_name, self.shard_id)
    }
}

/// Outcome of a conditional checkpoint write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The new sequence number was persisted
    Saved,
    /// A newer (or equal) sequence number was already stored; nothing changed
    Stale,
}

/// Trait for checkpoint storage implementations
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Retrieve the checkpoint for a given shard with a strongly consistent read
    async fn get_checkpoint(&self, key: &CheckpointKey) -> anyhow::Result<Option<String>>;

    /// Persist `sequence_number` unless the stored value is already higher
    async fn save_checkpoint_if_not_lower(
        &self,
        key: &CheckpointKey,
        sequence_number: &str,
    ) -> anyhow::Result<SaveOutcome>;
}

#[cfg(feature = "dynamodb-store")]
pub use dynamodb::DynamoDbCheckpointStore;
pub use memory::InMemoryCheckpointStore;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_value_equality() {
        let mut map = HashMap::new();
        map.insert(CheckpointKey::new("app", "stream", "shard-1"), "1");
        map.insert(CheckpointKey::new("app", "stream", "shard-1"), "2");

        assert_eq!(map.len(), 1);
        assert_eq!(map[&CheckpointKey::new("app", "stream", "shard-1")], "2");
        assert_eq!(
            CheckpointKey::new("app", "stream", "shard-1").to_string(),
            "app/stream/shard-1"
        );
    }
}
