//! Compacted aggregate state.
//!
//! A snapshot is the serialized aggregate together with the sequence id of the
//! last event folded into it. Snapshots are an optimization: any of them can be
//! dropped and the aggregate rebuilt from an older one plus the log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use marketsync_core::{Aggregate, LifecycleStatus, PartitionKey, SequenceId, SnapshotId};
use marketsync_events::{CodecError, encode_content};

use crate::event_store::EventStoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub snapshot_id: SnapshotId,
    pub partition_key: PartitionKey,
    pub aggregate_type: String,
    pub content: JsonValue,
    pub last_applied_event_id: SequenceId,
    pub status: LifecycleStatus,
    pub created_time: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn capture<A>(aggregate: &A, last_applied_event_id: SequenceId) -> Result<Self, CodecError>
    where
        A: Aggregate + Serialize,
    {
        Ok(Self {
            snapshot_id: SnapshotId::new(),
            partition_key: aggregate.partition_key().clone(),
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            content: encode_content(A::AGGREGATE_TYPE, aggregate)?,
            last_applied_event_id,
            status: aggregate.status(),
            created_time: Utc::now(),
        })
    }

    pub fn restore<A: DeserializeOwned>(&self) -> Result<A, serde_json::Error> {
        serde_json::from_value(self.content.clone())
    }
}

/// Storage for snapshots, keyed by partition.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Snapshot with the highest `last_applied_event_id`.
    async fn latest(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<SnapshotRecord>, EventStoreError>;

    async fn save(&self, snapshot: SnapshotRecord) -> Result<(), EventStoreError>;

    /// Keep the `keep` newest snapshots of the partition, delete the rest.
    /// Returns how many were deleted.
    async fn prune(&self, partition_key: &PartitionKey, keep: usize)
    -> Result<usize, EventStoreError>;
}

#[async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn latest(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<SnapshotRecord>, EventStoreError> {
        (**self).latest(partition_key).await
    }

    async fn save(&self, snapshot: SnapshotRecord) -> Result<(), EventStoreError> {
        (**self).save(snapshot).await
    }

    async fn prune(
        &self,
        partition_key: &PartitionKey,
        keep: usize,
    ) -> Result<usize, EventStoreError> {
        (**self).prune(partition_key, keep).await
    }
}

/// When to compact: every `interval` events, keeping the `keep` newest snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    pub interval: u64,
    pub keep: usize,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            interval: 10,
            keep: 5,
        }
    }
}

impl SnapshotPolicy {
    /// An interval of 0 disables compaction.
    pub fn is_due(&self, last_snapshot: SequenceId, current: SequenceId) -> bool {
        self.interval > 0 && current.saturating_sub(last_snapshot) >= self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_marketplace::{Offer, OfferProperties};

    fn offer() -> Offer {
        Offer::new(
            PartitionKey::parse("foo").unwrap(),
            OfferProperties {
                display_name: "Foo".into(),
                description: String::new(),
                is_manual_activation: false,
            },
        )
    }

    #[test]
    fn capture_then_restore_yields_same_aggregate() {
        let snapshot = SnapshotRecord::capture(&offer(), 3).unwrap();
        assert_eq!(snapshot.aggregate_type, "marketplace.offer");
        assert_eq!(snapshot.last_applied_event_id, 3);
        assert_eq!(snapshot.status, LifecycleStatus::Draft);
        assert_eq!(snapshot.restore::<Offer>().unwrap(), offer());
    }

    #[test]
    fn policy_triggers_after_interval() {
        let policy = SnapshotPolicy::default();
        assert!(!policy.is_due(1, 10));
        assert!(policy.is_due(1, 11));
        assert!(!SnapshotPolicy { interval: 0, keep: 1 }.is_due(0, 500));
    }
}
