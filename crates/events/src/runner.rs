//! Projection runner utilities (read model builders).
//!
//! Read models are **disposable**; events are the source of truth.
//! The runner folds a partition's events over a baseline row, enforcing
//! strict, gap-free ordering and skipping anything at or below the cursor.

use marketsync_core::{PartitionKey, SequenceId};
use tracing::{trace, warn};

use crate::{EventEnvelope, Projection, ProjectionError, RowChange};

/// Tracks projection progress for a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionCursor {
    partition_key: PartitionKey,
    last_applied: SequenceId,
}

impl PartitionCursor {
    pub fn new(partition_key: PartitionKey, last_applied: SequenceId) -> Self {
        Self {
            partition_key,
            last_applied,
        }
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    pub fn last_applied(&self) -> SequenceId {
        self.last_applied
    }
}

/// Projected value plus its soft-delete flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowState<R> {
    pub row: Option<R>,
    pub is_enabled: bool,
}

impl<R> RowState<R> {
    pub fn empty() -> Self {
        Self {
            row: None,
            is_enabled: false,
        }
    }
}

impl<R> Default for RowState<R> {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Already at or below the cursor.
    Skipped,
}

/// Runs envelopes through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<'p, P>
where
    P: Projection,
{
    projection: &'p P,
    cursor: PartitionCursor,
    state: RowState<P::Row>,
    dirty: bool,
}

impl<'p, P> ProjectionRunner<'p, P>
where
    P: Projection,
{
    /// Resume from a stored cursor and the row it belongs to.
    pub fn resume(projection: &'p P, cursor: PartitionCursor, baseline: RowState<P::Row>) -> Self {
        Self {
            projection,
            cursor,
            state: baseline,
            dirty: false,
        }
    }

    /// Start a partition from nothing.
    pub fn new(projection: &'p P, partition_key: PartitionKey) -> Self {
        Self::resume(projection, PartitionCursor::new(partition_key, 0), RowState::empty())
    }

    pub fn cursor(&self) -> &PartitionCursor {
        &self.cursor
    }

    pub fn state(&self) -> &RowState<P::Row> {
        &self.state
    }

    /// Whether any applied event changed the row.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Apply a single envelope, enforcing partition consistency and gap-free sequencing.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<ApplyOutcome, ProjectionError> {
        if envelope.partition_key() != &self.cursor.partition_key {
            warn!(
                projection = self.projection.name(),
                expected = %self.cursor.partition_key,
                found = %envelope.partition_key(),
                "event from another partition"
            );
            return Err(ProjectionError::PartitionMismatch {
                expected: self.cursor.partition_key.clone(),
                found: envelope.partition_key().clone(),
            });
        }

        let seq = envelope.sequence_id();
        if seq <= self.cursor.last_applied {
            trace!(
                partition_key = %self.cursor.partition_key,
                sequence_id = seq,
                cursor = self.cursor.last_applied,
                "skipping already applied event"
            );
            return Ok(ApplyOutcome::Skipped);
        }
        if seq != self.cursor.last_applied + 1 {
            warn!(
                partition_key = %self.cursor.partition_key,
                cursor = self.cursor.last_applied,
                found = seq,
                "sequence gap in projection input"
            );
            return Err(ProjectionError::SequenceGap {
                last: self.cursor.last_applied,
                found: seq,
            });
        }

        match self.projection.apply(self.state.row.as_ref(), envelope)? {
            RowChange::Upsert(row) => {
                self.state.row = Some(row);
                self.state.is_enabled = true;
                self.dirty = true;
            }
            RowChange::Disable => {
                if self.state.is_enabled {
                    self.state.is_enabled = false;
                    self.dirty = true;
                }
            }
            RowChange::Unchanged => {}
        }

        self.cursor.last_applied = seq;
        Ok(ApplyOutcome::Applied)
    }

    /// Apply many envelopes in order. Returns how many were applied (not skipped).
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<usize, ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut applied = 0;
        for env in envelopes {
            if self.apply(env)? == ApplyOutcome::Applied {
                applied += 1;
            }
        }
        Ok(applied)
    }

    pub fn into_parts(self) -> (PartitionCursor, RowState<P::Row>, bool) {
        (self.cursor, self.state, self.dirty)
    }

    /// Rebuild a partition's row from scratch by replaying its full history.
    pub fn rebuild_from_scratch<'a>(
        projection: &'p P,
        partition_key: PartitionKey,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(PartitionCursor, RowState<P::Row>), ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(projection, partition_key);
        runner.run(envelopes)?;
        Ok((runner.cursor, runner.state))
    }
}
