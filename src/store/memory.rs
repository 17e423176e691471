use crate::record::SequenceNumber;
use crate::store::{CheckpointKey, CheckpointStore, SaveOutcome};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

/// In-memory implementation of checkpoint storage
///
/// Applies the same monotonic guard as the DynamoDB store, which makes it a
/// faithful stand-in for local runs and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<CheckpointKey, String>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        debug!("Initializing in-memory checkpoint store");
        Self {
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Snapshot of every stored checkpoint
    pub async fn get_all_checkpoints(&self) -> HashMap<CheckpointKey, String> {
        self.checkpoints.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn get_checkpoint(&self, key: &CheckpointKey) -> anyhow::Result<Option<String>> {
        let checkpoint = self.checkpoints.read().await.get(key).cloned();

        debug!(checkpoint = ?checkpoint, "Retrieved checkpoint from memory");

        Ok(checkpoint)
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn save_checkpoint_if_not_lower(
        &self,
        key: &CheckpointKey,
        sequence_number: &str,
    ) -> anyhow::Result<SaveOutcome> {
        let mut checkpoints = self.checkpoints.write().await;

        if let Some(stored) = checkpoints.get(key) {
            if SequenceNumber::from(stored.as_str()) > SequenceNumber::from(sequence_number) {
                trace!(
                    stored = %stored,
                    sequence_number = %sequence_number,
                    "Stored checkpoint is newer, skipping"
                );
                return Ok(SaveOutcome::Stale);
            }
        }

        checkpoints.insert(key.clone(), sequence_number.to_string());
        trace!(sequence_number = %sequence_number, "Checkpoint saved to memory");

        Ok(SaveOutcome::Saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_get() -> anyhow::Result<()> {
        let store = InMemoryCheckpointStore::new();
        let key = CheckpointKey::new("app", "stream", "shard-1");

        assert_eq!(store.get_checkpoint(&key).await?, None);
        assert_eq!(
            store.save_checkpoint_if_not_lower(&key, "100").await?,
            SaveOutcome::Saved
        );
        assert_eq!(store.get_checkpoint(&key).await?.as_deref(), Some("100"));

        Ok(())
    }

    #[tokio::test]
    async fn test_lower_sequence_is_rejected() -> anyhow::Result<()> {
        let store = InMemoryCheckpointStore::new();
        let key = CheckpointKey::new("app", "stream", "shard-1");

        store.save_checkpoint_if_not_lower(&key, "200").await?;
        assert_eq!(
            store.save_checkpoint_if_not_lower(&key, "99").await?,
            SaveOutcome::Stale
        );
        assert_eq!(store.get_checkpoint(&key).await?.as_deref(), Some("200"));

        // Equal values pass the guard, matching `#SN <= :sn`
        assert_eq!(
            store.save_checkpoint_if_not_lower(&key, "200").await?,
            SaveOutcome::Saved
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_keys_are_isolated() -> anyhow::Result<()> {
        let store = InMemoryCheckpointStore::new();

        store
            .save_checkpoint_if_not_lower(&CheckpointKey::new("app-a", "stream", "shard-1"), "5")
            .await?;
        store
            .save_checkpoint_if_not_lower(&CheckpointKey::new("app-b", "stream", "shard-1"), "7")
            .await?;

        let all = store.get_all_checkpoints().await;
        assert_eq!(all.len(), 2);
        assert_eq!(
            store
                .get_checkpoint(&CheckpointKey::new("app-a", "stream", "shard-1"))
                .await?
                .as_deref(),
            Some("5")
        );

        Ok(())
    }
}
