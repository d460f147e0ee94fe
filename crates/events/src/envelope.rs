use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marketsync_core::{EventId, PartitionKey, SequenceId};

/// Everything about a stored event except its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: EventId,
    pub partition_key: PartitionKey,
    /// Position within the partition, assigned by the event store (starts at 1).
    pub sequence_id: SequenceId,
    pub event_type: String,
    pub event_version: u32,
    pub created_by: String,
    pub created_time: DateTime<Utc>,
}

/// Envelope for one immutable mutation record.
///
/// `content` is either the raw JSON payload or the decoded event, see [`EventEnvelope::map`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    metadata: EventMetadata,
    content: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(metadata: EventMetadata, content: E) -> Self {
        Self { metadata, content }
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn event_id(&self) -> EventId {
        self.metadata.event_id
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.metadata.partition_key
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.metadata.sequence_id
    }

    pub fn event_type(&self) -> &str {
        &self.metadata.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.metadata.event_version
    }

    pub fn created_by(&self) -> &str {
        &self.metadata.created_by
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.metadata.created_time
    }

    pub fn content(&self) -> &E {
        &self.content
    }

    pub fn into_content(self) -> E {
        self.content
    }

    pub fn map<U>(self, f: impl FnOnce(E) -> U) -> EventEnvelope<U> {
        EventEnvelope {
            metadata: self.metadata,
            content: f(self.content),
        }
    }

    pub fn try_map<U, Err>(
        self,
        f: impl FnOnce(&EventMetadata, E) -> Result<U, Err>,
    ) -> Result<EventEnvelope<U>, Err> {
        let content = f(&self.metadata, self.content)?;
        Ok(EventEnvelope {
            metadata: self.metadata,
            content,
        })
    }
}
