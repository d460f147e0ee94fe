//! Authoring-side storage: the log plus a resource row and snapshots, written together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use marketsync_core::{LifecycleStatus, PartitionKey, SequenceId};

use super::r#trait::{EventStore, EventStoreError, NewEvent, StoredEvent};
use crate::snapshot::{SnapshotRecord, SnapshotStore};

/// Lifecycle row of one authored resource.
///
/// Answers "is there an active aggregate here" without replaying the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub partition_key: PartitionKey,
    pub aggregate_type: String,
    pub status: LifecycleStatus,
    pub created_by: String,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
    pub deleted_time: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    /// Row after an event moved the resource to `status`.
    ///
    /// A genesis event (or a missing previous row) starts a new lifetime.
    pub fn next(
        previous: Option<&ResourceRecord>,
        event: &NewEvent,
        aggregate_type: &str,
        status: LifecycleStatus,
        genesis: bool,
    ) -> Self {
        let at = event.created_time;
        let (created_by, created_time) = match previous {
            Some(prev) if !genesis => (prev.created_by.clone(), prev.created_time),
            _ => (event.created_by.clone(), at),
        };
        Self {
            partition_key: event.partition_key.clone(),
            aggregate_type: aggregate_type.to_string(),
            status,
            created_by,
            created_time,
            last_updated_time: at,
            deleted_time: (status == LifecycleStatus::Deleted).then_some(at),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Everything one authoring command persists, in a single transaction.
#[derive(Debug, Clone)]
pub struct AuthoringCommit {
    pub event: NewEvent,
    /// Last sequence id the decision was made against; 0 for a partition without history.
    pub expected_last: SequenceId,
    pub resource: ResourceRecord,
    /// Written with `last_applied_event_id` set to the id assigned to `event`.
    pub snapshot: Option<SnapshotRecord>,
}

#[async_trait]
pub trait AuthoringStore: EventStore + SnapshotStore {
    async fn resource(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<ResourceRecord>, EventStoreError>;

    /// Append the event, upsert the resource row and save the optional snapshot atomically.
    ///
    /// Fails with `Conflict` when the partition moved past `expected_last`.
    async fn commit(&self, commit: AuthoringCommit) -> Result<StoredEvent, EventStoreError>;
}

#[async_trait]
impl<S> AuthoringStore for Arc<S>
where
    S: AuthoringStore + ?Sized,
{
    async fn resource(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<ResourceRecord>, EventStoreError> {
        (**self).resource(partition_key).await
    }

    async fn commit(&self, commit: AuthoringCommit) -> Result<StoredEvent, EventStoreError> {
        (**self).commit(commit).await
    }
}

pub(crate) fn stale_sequence(
    partition_key: &PartitionKey,
    expected: SequenceId,
    found: SequenceId,
) -> EventStoreError {
    EventStoreError::Conflict(format!(
        "partition '{partition_key}' is at #{found}, command was decided against #{expected}"
    ))
}
