use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use marketsync_core::{DecisionContext, ErrorKind, EventId, PartitionKey, SequenceId};
use marketsync_events::{CodecError, DecoderTable, EventCodec, EventEnvelope, EventMetadata};
use std::sync::Arc;

/// An event ready to be appended to a partition (no sequence id yet).
///
/// The event id is chosen before the append so that secret names derived from it
/// during the decision match the stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: EventId,
    pub partition_key: PartitionKey,
    pub event_type: String,
    pub event_version: u32,
    pub content: JsonValue,
    pub created_by: String,
    pub created_time: DateTime<Utc>,
}

impl NewEvent {
    /// Encode a typed event using the identifiers of the decision that produced it.
    pub fn from_typed<E: EventCodec>(event: &E, ctx: &DecisionContext) -> Result<Self, CodecError> {
        Ok(Self {
            event_id: ctx.event_id,
            partition_key: event.partition_key().clone(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            content: event.encode()?,
            created_by: ctx.author.clone(),
            created_time: ctx.occurred_at,
        })
    }

    /// Attach the sequence id the store assigned.
    pub fn into_stored(self, sequence_id: SequenceId) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            partition_key: self.partition_key,
            sequence_id,
            event_type: self.event_type,
            event_version: self.event_version,
            content: self.content,
            created_by: self.created_by,
            created_time: self.created_time,
        }
    }
}

/// An immutable record in the log.
///
/// Sequence ids start at 1 within each partition and have no gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub partition_key: PartitionKey,
    pub sequence_id: SequenceId,
    pub event_type: String,
    pub event_version: u32,
    pub content: JsonValue,
    pub created_by: String,
    pub created_time: DateTime<Utc>,
}

impl StoredEvent {
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            event_id: self.event_id,
            partition_key: self.partition_key.clone(),
            sequence_id: self.sequence_id,
            event_type: self.event_type.clone(),
            event_version: self.event_version,
            created_by: self.created_by.clone(),
            created_time: self.created_time,
        }
    }

    /// Envelope with the raw JSON content.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(self.metadata(), self.content.clone())
    }

    /// Decode the content through `table`, keyed by this event's type and version.
    pub fn decode<E: EventCodec>(
        &self,
        table: &DecoderTable<E>,
    ) -> Result<EventEnvelope<E>, CodecError> {
        let event = table.decode(&self.event_type, self.event_version, self.content.clone())?;
        Ok(EventEnvelope::new(self.metadata(), event))
    }
}

/// Event store operation error.
///
/// Storage failures only: the log never rejects an event because of its content.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Connection or storage failure; the operation may be retried.
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent writer got there first (stale expected sequence, unique violation).
    #[error("event store conflict: {0}")]
    Conflict(String),

    /// A stored row cannot be turned back into a record.
    #[error("corrupt event store row: {0}")]
    Corrupt(String),
}

impl EventStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::Unavailable(_) => ErrorKind::TransientIo,
            EventStoreError::Conflict(_) => ErrorKind::Conflict,
            EventStoreError::Corrupt(_) => ErrorKind::ServerInvariantViolation,
        }
    }
}

/// Append-only, partitioned event log.
///
/// ## Append Semantics
///
/// `append()` assigns the next sequence id of the event's partition and persists the
/// event atomically. Assignment is serialized per partition, so concurrent appends
/// produce contiguous ids that commit in id order.
///
/// ## Read Semantics
///
/// `list_after()` returns every event with `sequence_id > after`, ascending and
/// without gaps. An unknown partition or a partition with nothing newer yields an
/// empty vector.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<StoredEvent, EventStoreError>;

    async fn list_after(
        &self,
        partition_key: &PartitionKey,
        after: SequenceId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(&self, event: NewEvent) -> Result<StoredEvent, EventStoreError> {
        (**self).append(event).await
    }

    async fn list_after(
        &self,
        partition_key: &PartitionKey,
        after: SequenceId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).list_after(partition_key, after).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_marketplace::OfferEvent;
    use marketsync_marketplace::event::OfferDeleted;

    fn key() -> PartitionKey {
        PartitionKey::parse("foo").unwrap()
    }

    #[test]
    fn from_typed_uses_decision_identifiers() {
        let ctx = DecisionContext::new("dev@example.com");
        let event = OfferEvent::OfferDeleted(OfferDeleted { offer_id: key() });

        let new = NewEvent::from_typed(&event, &ctx).unwrap();
        assert_eq!(new.event_id, ctx.event_id);
        assert_eq!(new.partition_key, key());
        assert_eq!(new.event_type, "marketplace.offer.deleted");
        assert_eq!(new.created_by, "dev@example.com");
        assert_eq!(new.created_time, ctx.occurred_at);
    }

    #[test]
    fn stored_event_decodes_through_table() {
        let ctx = DecisionContext::new("dev");
        let event = OfferEvent::OfferDeleted(OfferDeleted { offer_id: key() });
        let stored = NewEvent::from_typed(&event, &ctx).unwrap().into_stored(4);

        let envelope = stored.decode(&OfferEvent::decoder_table()).unwrap();
        assert_eq!(envelope.sequence_id(), 4);
        assert_eq!(envelope.content(), &event);
        assert_eq!(stored.to_envelope().content(), &stored.content);
    }

    #[test]
    fn unknown_version_fails_to_decode() {
        let ctx = DecisionContext::new("dev");
        let event = OfferEvent::OfferDeleted(OfferDeleted { offer_id: key() });
        let mut stored = NewEvent::from_typed(&event, &ctx).unwrap().into_stored(1);
        stored.event_version = 9;

        assert!(matches!(
            stored.decode(&OfferEvent::decoder_table()),
            Err(CodecError::UnknownEventType { .. })
        ));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            EventStoreError::Unavailable("down".into()).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(EventStoreError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            EventStoreError::Corrupt("x".into()).kind(),
            ErrorKind::ServerInvariantViolation
        );
    }
}
