use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use marketsync_core::{PartitionKey, SequenceId};

use super::authoring::{AuthoringCommit, AuthoringStore, ResourceRecord, stale_sequence};
use super::r#trait::{EventStore, EventStoreError, NewEvent, StoredEvent};
use crate::snapshot::{SnapshotRecord, SnapshotStore};

#[derive(Debug, Default)]
struct Partitions {
    events: HashMap<PartitionKey, Vec<StoredEvent>>,
    snapshots: HashMap<PartitionKey, Vec<SnapshotRecord>>,
    resources: HashMap<PartitionKey, ResourceRecord>,
}

impl Partitions {
    fn last_sequence(&self, partition_key: &PartitionKey) -> SequenceId {
        self.events
            .get(partition_key)
            .and_then(|log| log.last())
            .map(|e| e.sequence_id)
            .unwrap_or(0)
    }

    fn push(&mut self, event: NewEvent) -> StoredEvent {
        let next = self.last_sequence(&event.partition_key) + 1;
        let stored = event.into_stored(next);
        self.events
            .entry(stored.partition_key.clone())
            .or_default()
            .push(stored.clone());
        stored
    }

    fn save_snapshot(&mut self, snapshot: SnapshotRecord) {
        let list = self
            .snapshots
            .entry(snapshot.partition_key.clone())
            .or_default();
        list.push(snapshot);
        list.sort_by_key(|s| (s.last_applied_event_id, s.created_time));
    }
}

/// In-memory log, snapshot and resource store.
///
/// Intended for tests/dev. A single lock serializes every write, which also
/// serializes sequence assignment per partition.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Partitions>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Partitions>, EventStoreError> {
        self.inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Partitions>, EventStoreError> {
        self.inner
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: NewEvent) -> Result<StoredEvent, EventStoreError> {
        Ok(self.write()?.push(event))
    }

    async fn list_after(
        &self,
        partition_key: &PartitionKey,
        after: SequenceId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.read()?;
        let Some(log) = inner.events.get(partition_key) else {
            return Ok(vec![]);
        };
        // Ids are contiguous from 1, so the index of id `after + 1` is `after`.
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(log.len());
        Ok(log[start..].to_vec())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryEventStore {
    async fn latest(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<SnapshotRecord>, EventStoreError> {
        Ok(self
            .read()?
            .snapshots
            .get(partition_key)
            .and_then(|list| list.last())
            .cloned())
    }

    async fn save(&self, snapshot: SnapshotRecord) -> Result<(), EventStoreError> {
        self.write()?.save_snapshot(snapshot);
        Ok(())
    }

    async fn prune(
        &self,
        partition_key: &PartitionKey,
        keep: usize,
    ) -> Result<usize, EventStoreError> {
        let mut inner = self.write()?;
        let Some(list) = inner.snapshots.get_mut(partition_key) else {
            return Ok(0);
        };
        let excess = list.len().saturating_sub(keep);
        list.drain(..excess);
        Ok(excess)
    }
}

#[async_trait]
impl AuthoringStore for InMemoryEventStore {
    async fn resource(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<ResourceRecord>, EventStoreError> {
        Ok(self.read()?.resources.get(partition_key).cloned())
    }

    async fn commit(&self, commit: AuthoringCommit) -> Result<StoredEvent, EventStoreError> {
        let mut inner = self.write()?;
        let partition_key = commit.event.partition_key.clone();
        let current = inner.last_sequence(&partition_key);
        if current != commit.expected_last {
            return Err(stale_sequence(&partition_key, commit.expected_last, current));
        }

        let stored = inner.push(commit.event);
        inner.resources.insert(partition_key, commit.resource);
        if let Some(mut snapshot) = commit.snapshot {
            snapshot.last_applied_event_id = stored.sequence_id;
            inner.save_snapshot(snapshot);
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketsync_core::{EventId, LifecycleStatus, SnapshotId};

    fn key(s: &str) -> PartitionKey {
        PartitionKey::parse(s).unwrap()
    }

    fn new_event(partition: &str, event_type: &str) -> NewEvent {
        NewEvent {
            event_id: EventId::new(),
            partition_key: key(partition),
            event_type: event_type.into(),
            event_version: 1,
            content: serde_json::json!({ "offer_id": partition }),
            created_by: "dev".into(),
            created_time: Utc::now(),
        }
    }

    fn snapshot(partition: &str, last: SequenceId) -> SnapshotRecord {
        SnapshotRecord {
            snapshot_id: SnapshotId::new(),
            partition_key: key(partition),
            aggregate_type: "marketplace.offer".into(),
            content: serde_json::json!({}),
            last_applied_event_id: last,
            status: LifecycleStatus::Draft,
            created_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sequence_ids_are_per_partition_and_contiguous() {
        let store = InMemoryEventStore::new();
        for _ in 0..3 {
            store.append(new_event("foo", "a")).await.unwrap();
        }
        let bar = store.append(new_event("bar", "a")).await.unwrap();
        assert_eq!(bar.sequence_id, 1);

        let ids: Vec<_> = store
            .list_after(&key("foo"), 0)
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn list_after_returns_only_newer_events() {
        let store = InMemoryEventStore::new();
        for _ in 0..4 {
            store.append(new_event("foo", "a")).await.unwrap();
        }
        let tail = store.list_after(&key("foo"), 2).await.unwrap();
        assert_eq!(tail.iter().map(|e| e.sequence_id).collect::<Vec<_>>(), vec![3, 4]);
        assert!(store.list_after(&key("foo"), 4).await.unwrap().is_empty());
        assert!(store.list_after(&key("foo"), 99).await.unwrap().is_empty());
        assert!(store.list_after(&key("nope"), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_snapshot_is_highest_sequence_and_prune_keeps_newest() {
        let store = InMemoryEventStore::new();
        for last in [10, 1, 20, 5] {
            store.save(snapshot("foo", last)).await.unwrap();
        }
        assert_eq!(
            store.latest(&key("foo")).await.unwrap().unwrap().last_applied_event_id,
            20
        );

        assert_eq!(store.prune(&key("foo"), 2).await.unwrap(), 2);
        assert_eq!(store.prune(&key("foo"), 2).await.unwrap(), 0);
        assert_eq!(
            store.latest(&key("foo")).await.unwrap().unwrap().last_applied_event_id,
            20
        );
    }

    #[tokio::test]
    async fn commit_writes_event_resource_and_stamped_snapshot() {
        let store = InMemoryEventStore::new();
        let event = new_event("foo", "marketplace.offer.created");
        let resource = ResourceRecord::next(
            None,
            &event,
            "marketplace.offer",
            LifecycleStatus::Draft,
            true,
        );

        let stored = store
            .commit(AuthoringCommit {
                event,
                expected_last: 0,
                resource,
                snapshot: Some(snapshot("foo", 0)),
            })
            .await
            .unwrap();

        assert_eq!(stored.sequence_id, 1);
        assert!(store.resource(&key("foo")).await.unwrap().unwrap().is_active());
        assert_eq!(
            store.latest(&key("foo")).await.unwrap().unwrap().last_applied_event_id,
            1
        );
    }

    #[tokio::test]
    async fn stale_commit_is_a_conflict_and_leaves_nothing_behind() {
        let store = InMemoryEventStore::new();
        store.append(new_event("foo", "a")).await.unwrap();

        let event = new_event("foo", "b");
        let resource =
            ResourceRecord::next(None, &event, "marketplace.offer", LifecycleStatus::Draft, true);
        let err = store
            .commit(AuthoringCommit {
                event,
                expected_last: 0,
                resource,
                snapshot: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Conflict(_)));
        assert_eq!(store.list_after(&key("foo"), 0).await.unwrap().len(), 1);
        assert!(store.resource(&key("foo")).await.unwrap().is_none());
    }
}
