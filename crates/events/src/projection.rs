use thiserror::Error;

use marketsync_core::{PartitionKey, SequenceId};

use crate::{Event, EventEnvelope};

/// Effect of one event on a partition's materialized row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowChange<R> {
    /// Overwrite the row with this value and mark it enabled.
    Upsert(R),
    /// Keep the row but mark it disabled (soft delete).
    Disable,
    /// The event does not affect this read model.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("envelope for partition '{found}' applied to cursor of '{expected}'")]
    PartitionMismatch {
        expected: PartitionKey,
        found: PartitionKey,
    },

    #[error("sequence gap: last applied {last}, next available {found}")]
    SequenceGap { last: SequenceId, found: SequenceId },

    /// The handler cannot interpret this event. Retrying will not help.
    #[error("projection rejected '{event_type}' #{sequence_id}: {reason}")]
    Rejected {
        event_type: String,
        sequence_id: SequenceId,
        reason: String,
    },
}

impl ProjectionError {
    pub fn rejected<E>(envelope: &EventEnvelope<E>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            event_type: envelope.event_type().to_string(),
            sequence_id: envelope.sequence_id(),
            reason: reason.into(),
        }
    }

    /// Whether the same input will fail the same way on every retry.
    pub fn is_poison(&self) -> bool {
        matches!(self, ProjectionError::Rejected { .. })
    }
}

/// A projection maps a partition's events onto one local read-model row.
///
/// Implementations are pure: they look at the current row and one event and say
/// what the row becomes. Because event content is full-state, a handler only
/// ever overwrites, so replays land on the same row.
///
/// Persistence is outside this crate; the runner collects the effects and the
/// caller commits them together with the cursor.
pub trait Projection {
    type Ev: Event;
    type Row: Clone + core::fmt::Debug;

    /// Stable name used to scope cursors and dead letters.
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        current: Option<&Self::Row>,
        envelope: &EventEnvelope<Self::Ev>,
    ) -> Result<RowChange<Self::Row>, ProjectionError>;
}
