//! Append-only event store boundary.
//!
//! This module defines the partitioned log, the authoring-side store built on it,
//! and an adapter that announces committed events to subscribed consumers.

pub mod authoring;
pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use authoring::{AuthoringCommit, AuthoringStore, ResourceRecord};
pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, NewEvent, StoredEvent};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use marketsync_core::{PartitionKey, SequenceId};

use crate::snapshot::{SnapshotRecord, SnapshotStore};
use crate::trigger::{EventStoreInfo, PartitionTrigger, TriggerSink};

/// Adapter that sends a [`PartitionTrigger`] to every subscriber after a successful write.
///
/// This ensures the ordering invariant: **publish happens only after the append commits**.
/// A failed send is logged and does not fail the write; the event is durable and the
/// consumer picks it up with the partition's next trigger. Each send is bounded by
/// `publish_timeout`, so a backed-up subscriber cannot stall the writer.
pub struct PublishingEventStore<S> {
    store: S,
    name: String,
    subscribers: Vec<(String, Arc<dyn TriggerSink>)>,
    publish_timeout: Duration,
}

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

impl<S> PublishingEventStore<S> {
    pub fn new(store: S, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            subscribers: Vec::new(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn subscribe(mut self, consumer: impl Into<String>, sink: Arc<dyn TriggerSink>) -> Self {
        self.subscribers.push((consumer.into(), sink));
        self
    }

    pub fn info(&self) -> EventStoreInfo {
        EventStoreInfo {
            name: self.name.clone(),
            subscribers: self.subscribers.iter().map(|(n, _)| n.clone()).collect(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Returns how many subscribers were reached.
    async fn publish(&self, event: &StoredEvent) -> usize {
        let mut delivered = 0;
        for (consumer, sink) in &self.subscribers {
            let trigger = PartitionTrigger {
                event_store: self.name.clone(),
                event_type: event.event_type.clone(),
                partition_key: event.partition_key.clone(),
                sequence_id: event.sequence_id,
                attempt: 0,
            };
            match tokio::time::timeout(self.publish_timeout, sink.send(trigger)).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => warn!(
                    event_store = %self.name,
                    consumer = %consumer,
                    partition_key = %event.partition_key,
                    sequence_id = event.sequence_id,
                    error = %err,
                    "trigger publication failed"
                ),
                Err(_) => warn!(
                    event_store = %self.name,
                    consumer = %consumer,
                    partition_key = %event.partition_key,
                    sequence_id = event.sequence_id,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "trigger publication timed out"
                ),
            }
        }
        delivered
    }
}

#[async_trait]
impl<S> EventStore for PublishingEventStore<S>
where
    S: EventStore,
{
    async fn append(&self, event: NewEvent) -> Result<StoredEvent, EventStoreError> {
        // 1) Append (durable step)
        let committed = self.store.append(event).await?;

        // 2) Announce to subscribers (best-effort; at-least-once acceptable)
        self.publish(&committed).await;

        Ok(committed)
    }

    async fn list_after(
        &self,
        partition_key: &PartitionKey,
        after: SequenceId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.list_after(partition_key, after).await
    }
}

#[async_trait]
impl<S> SnapshotStore for PublishingEventStore<S>
where
    S: SnapshotStore,
{
    async fn latest(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<SnapshotRecord>, EventStoreError> {
        self.store.latest(partition_key).await
    }

    async fn save(&self, snapshot: SnapshotRecord) -> Result<(), EventStoreError> {
        self.store.save(snapshot).await
    }

    async fn prune(
        &self,
        partition_key: &PartitionKey,
        keep: usize,
    ) -> Result<usize, EventStoreError> {
        self.store.prune(partition_key, keep).await
    }
}

#[async_trait]
impl<S> AuthoringStore for PublishingEventStore<S>
where
    S: AuthoringStore,
{
    async fn resource(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Option<ResourceRecord>, EventStoreError> {
        self.store.resource(partition_key).await
    }

    async fn commit(&self, commit: AuthoringCommit) -> Result<StoredEvent, EventStoreError> {
        let committed = self.store.commit(commit).await?;
        self.publish(&committed).await;
        Ok(committed)
    }
}
