//! Consumer-local materialized rows and their cursors.
//!
//! Each consumer owns one row per partition plus the sequence id it last applied.
//! Row and cursor always move together in one commit.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryReadModelStore;
pub use postgres::PostgresReadModelStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use marketsync_core::{ErrorKind, PartitionKey, SequenceId};
use marketsync_events::RowState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedRow<V> {
    pub unique_name: PartitionKey,
    pub last_applied_event_id: SequenceId,
    pub is_enabled: bool,
    pub projected: V,
    pub updated_time: DateTime<Utc>,
}

impl<V> MaterializedRow<V> {
    pub fn into_row_state(self) -> RowState<V> {
        RowState {
            row: Some(self.projected),
            is_enabled: self.is_enabled,
        }
    }
}

/// What a commit does to the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWrite<V> {
    Upsert(V),
    /// Keep the projected value, clear `is_enabled`.
    Disable,
    /// Only the cursor moves.
    Keep,
}

impl<V> RowWrite<V> {
    /// The write that persists `state`, or `Keep` when nothing changed.
    pub fn from_state(state: RowState<V>, dirty: bool) -> Self {
        match (dirty, state.row) {
            (false, _) | (true, None) => RowWrite::Keep,
            (true, Some(row)) if state.is_enabled => RowWrite::Upsert(row),
            (true, Some(_)) => RowWrite::Disable,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("read model unavailable: {0}")]
    Unavailable(String),

    /// Another writer advanced the cursor first.
    #[error("stale cursor for '{partition_key}': expected #{expected}, found #{found}")]
    StaleCursor {
        partition_key: PartitionKey,
        expected: SequenceId,
        found: SequenceId,
    },

    #[error("corrupt read model row: {0}")]
    Corrupt(String),
}

impl ReadModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadModelError::Unavailable(_) => ErrorKind::TransientIo,
            ReadModelError::StaleCursor { .. } => ErrorKind::Conflict,
            ReadModelError::Corrupt(_) => ErrorKind::ServerInvariantViolation,
        }
    }
}

/// Local materialized store of one consumer.
#[async_trait]
pub trait ReadModelStore<V>: Send + Sync {
    /// Last applied sequence id; 0 for a partition never seen.
    async fn read_cursor(&self, unique_name: &PartitionKey) -> Result<SequenceId, ReadModelError>;

    async fn get(
        &self,
        unique_name: &PartitionKey,
    ) -> Result<Option<MaterializedRow<V>>, ReadModelError>;

    /// Apply `write` and move the cursor to `new_cursor`, atomically.
    ///
    /// Fails with `StaleCursor` unless the stored cursor still equals `expected_cursor`.
    async fn commit(
        &self,
        unique_name: &PartitionKey,
        expected_cursor: SequenceId,
        write: RowWrite<V>,
        new_cursor: SequenceId,
    ) -> Result<(), ReadModelError>;
}

#[async_trait]
impl<V, S> ReadModelStore<V> for Arc<S>
where
    V: Send + 'static,
    S: ReadModelStore<V> + ?Sized,
{
    async fn read_cursor(&self, unique_name: &PartitionKey) -> Result<SequenceId, ReadModelError> {
        (**self).read_cursor(unique_name).await
    }

    async fn get(
        &self,
        unique_name: &PartitionKey,
    ) -> Result<Option<MaterializedRow<V>>, ReadModelError> {
        (**self).get(unique_name).await
    }

    async fn commit(
        &self,
        unique_name: &PartitionKey,
        expected_cursor: SequenceId,
        write: RowWrite<V>,
        new_cursor: SequenceId,
    ) -> Result<(), ReadModelError> {
        (**self)
            .commit(unique_name, expected_cursor, write, new_cursor)
            .await
    }
}
