use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use marketsync_core::{PartitionKey, SequenceId};

use super::{MaterializedRow, ReadModelError, ReadModelStore, RowWrite};

#[derive(Debug)]
struct Slot<V> {
    cursor: SequenceId,
    row: Option<MaterializedRow<V>>,
}

/// In-memory materialized rows for tests/dev.
#[derive(Debug)]
pub struct InMemoryReadModelStore<V> {
    slots: RwLock<HashMap<PartitionKey, Slot<V>>>,
}

impl<V> Default for InMemoryReadModelStore<V> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> InMemoryReadModelStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled rows only, in no particular order.
    pub fn list_enabled(&self) -> Vec<MaterializedRow<V>> {
        self.slots
            .read()
            .map(|slots| {
                slots
                    .values()
                    .filter_map(|s| s.row.clone())
                    .filter(|r| r.is_enabled)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> ReadModelError {
    ReadModelError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl<V> ReadModelStore<V> for InMemoryReadModelStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn read_cursor(&self, unique_name: &PartitionKey) -> Result<SequenceId, ReadModelError> {
        let slots = self.slots.read().map_err(poisoned)?;
        Ok(slots.get(unique_name).map_or(0, |s| s.cursor))
    }

    async fn get(
        &self,
        unique_name: &PartitionKey,
    ) -> Result<Option<MaterializedRow<V>>, ReadModelError> {
        let slots = self.slots.read().map_err(poisoned)?;
        Ok(slots.get(unique_name).and_then(|s| s.row.clone()))
    }

    async fn commit(
        &self,
        unique_name: &PartitionKey,
        expected_cursor: SequenceId,
        write: RowWrite<V>,
        new_cursor: SequenceId,
    ) -> Result<(), ReadModelError> {
        let mut slots = self.slots.write().map_err(poisoned)?;
        let slot = slots.entry(unique_name.clone()).or_insert(Slot {
            cursor: 0,
            row: None,
        });
        if slot.cursor != expected_cursor {
            return Err(ReadModelError::StaleCursor {
                partition_key: unique_name.clone(),
                expected: expected_cursor,
                found: slot.cursor,
            });
        }

        let now = Utc::now();
        match write {
            RowWrite::Upsert(projected) => {
                slot.row = Some(MaterializedRow {
                    unique_name: unique_name.clone(),
                    last_applied_event_id: new_cursor,
                    is_enabled: true,
                    projected,
                    updated_time: now,
                });
            }
            RowWrite::Disable => {
                if let Some(row) = slot.row.as_mut() {
                    row.is_enabled = false;
                    row.updated_time = now;
                }
            }
            RowWrite::Keep => {}
        }
        if let Some(row) = slot.row.as_mut() {
            row.last_applied_event_id = new_cursor;
        }
        slot.cursor = new_cursor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PartitionKey {
        PartitionKey::parse("foo").unwrap()
    }

    #[tokio::test]
    async fn unseen_partition_has_cursor_zero_and_no_row() {
        let store = InMemoryReadModelStore::<String>::new();
        assert_eq!(store.read_cursor(&key()).await.unwrap(), 0);
        assert!(store.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_moves_row_and_cursor_together() {
        let store = InMemoryReadModelStore::new();
        store.commit(&key(), 0, RowWrite::Keep, 2).await.unwrap();
        assert_eq!(store.read_cursor(&key()).await.unwrap(), 2);
        assert!(store.get(&key()).await.unwrap().is_none());

        store
            .commit(&key(), 2, RowWrite::Upsert("v1".to_string()), 3)
            .await
            .unwrap();
        let row = store.get(&key()).await.unwrap().unwrap();
        assert!(row.is_enabled);
        assert_eq!(row.last_applied_event_id, 3);

        store.commit(&key(), 3, RowWrite::Disable, 4).await.unwrap();
        let row = store.get(&key()).await.unwrap().unwrap();
        assert!(!row.is_enabled);
        assert_eq!(row.projected, "v1");
        assert!(store.list_enabled().is_empty());
    }

    #[tokio::test]
    async fn stale_expected_cursor_is_rejected() {
        let store = InMemoryReadModelStore::new();
        store
            .commit(&key(), 0, RowWrite::Upsert(1u32), 1)
            .await
            .unwrap();
        let err = store
            .commit(&key(), 0, RowWrite::Upsert(2u32), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadModelError::StaleCursor { found: 1, .. }));
        assert_eq!(store.get(&key()).await.unwrap().unwrap().projected, 1);
    }
}
