//! Authoring command pipeline.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the resource row; rehydrate the aggregate when it has history
//!   ↓
//! 2. Decide (pure; produces one full-state event plus secret side effects)
//!   ↓
//! 3. Write pending secrets
//!   ↓
//! 4. Commit event + resource row (+ genesis snapshot) in one transaction
//!   ↓
//! 5. Delete superseded secrets
//!   ↓
//! 6. Compact (optional snapshot + prune)
//! ```
//!
//! A rejected command leaves nothing behind: validation happens in step 2, before
//! any write. Steps 5 and 6 never fail the command once the event is committed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{Span, debug, instrument, warn};

use marketsync_core::{Aggregate, DecisionContext, DomainError, ErrorKind, PartitionKey, SecretWrite};
use marketsync_events::{CodecError, EventCodec};

use crate::builder::{AggregateBuilder, BuildError, Built};
use crate::event_store::{AuthoringCommit, AuthoringStore, EventStoreError, NewEvent, ResourceRecord, StoredEvent};
use crate::secrets::{SecretStore, SecretStoreError};
use crate::snapshot::{SnapshotPolicy, SnapshotRecord};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Domain validation, conflict or not-found (deterministic).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Rehydrating the current state failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Writing a pending secret failed; nothing was committed.
    #[error(transparent)]
    Secret(#[from] SecretStoreError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Domain(e) => e.kind(),
            DispatchError::Build(e) => e.kind(),
            DispatchError::Store(e) => e.kind(),
            DispatchError::Codec(e) => e.kind(),
            DispatchError::Secret(e) => e.kind(),
        }
    }
}

/// Result of a committed command.
#[derive(Debug, Clone)]
pub struct Executed<A> {
    pub event: StoredEvent,
    pub aggregate: A,
}

/// Reusable command execution engine for one aggregate type.
///
/// ## Concurrency
///
/// The commit is optimistic on the sequence id the decision was made against.
/// Two commands racing on one partition: one commits, the other gets `Conflict`
/// and may be retried from scratch.
pub struct AuthoringService<A, S, X>
where
    A: Aggregate,
{
    store: S,
    secrets: X,
    builder: AggregateBuilder<A>,
    policy: SnapshotPolicy,
}

impl<A, S, X> AuthoringService<A, S, X>
where
    A: Aggregate + Serialize + DeserializeOwned + Send + Sync,
    A::Command: Send + Sync,
    A::Event: EventCodec,
    S: AuthoringStore,
    X: SecretStore,
{
    pub fn new(store: S, secrets: X, policy: SnapshotPolicy) -> Self {
        Self {
            store,
            secrets,
            builder: AggregateBuilder::new(),
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn secrets(&self) -> &X {
        &self.secrets
    }

    #[instrument(
        skip(self, command),
        fields(
            aggregate_type = A::AGGREGATE_TYPE,
            partition_key = %A::target(&command),
            event_type = tracing::field::Empty,
            sequence_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn execute(
        &self,
        command: A::Command,
        author: &str,
    ) -> Result<Executed<A>, DispatchError> {
        let partition_key = A::target(&command).clone();

        // 1) Load history
        let resource = self.store.resource(&partition_key).await?;
        let current: Option<Built<A>> = match &resource {
            Some(_) => Some(self.builder.load(&self.store, &partition_key).await?),
            None => None,
        };
        let expected_last = current.as_ref().map_or(0, |b| b.last_applied);
        let state = current.as_ref().map(|b| b.aggregate.clone());

        // 2) Decide events
        let ctx = DecisionContext::new(author);
        let decision = A::handle(state.as_ref(), &command, &ctx)?;
        let genesis = A::is_genesis(&decision.event);
        let next = A::apply(state, &decision.event)?;
        let event = NewEvent::from_typed(&decision.event, &ctx)?;
        Span::current().record("event_type", event.event_type.as_str());

        // 3) Write secrets
        self.write_secrets(&decision.secret_writes).await?;

        // 4) Persist
        let record = ResourceRecord::next(
            resource.as_ref(),
            &event,
            A::AGGREGATE_TYPE,
            next.status(),
            genesis,
        );
        let snapshot = if genesis {
            Some(SnapshotRecord::capture(&next, 0)?)
        } else {
            None
        };
        let commit = AuthoringCommit {
            event,
            expected_last,
            resource: record,
            snapshot,
        };
        let stored = match self.store.commit(commit).await {
            Ok(stored) => stored,
            Err(err) => {
                self.discard_secrets(&decision.secret_writes).await;
                return Err(err.into());
            }
        };
        Span::current().record("sequence_id", stored.sequence_id);

        // 5) Drop superseded secrets (best-effort)
        for name in &decision.secret_deletes {
            if let Err(err) = self.secrets.delete(name).await {
                warn!(partition_key = %partition_key, secret = %name, error = %err, "failed to delete superseded secret");
            }
        }

        // 6) Compact
        if !genesis {
            let since = current.as_ref().map_or(0, |b| b.snapshot_last_applied);
            if self.policy.is_due(since, stored.sequence_id) {
                self.compact(&next, stored.sequence_id).await;
            }
        }

        Ok(Executed {
            event: stored,
            aggregate: next,
        })
    }

    /// Current state of an active aggregate.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE, partition_key = %partition_key), err)]
    pub async fn get(&self, partition_key: &PartitionKey) -> Result<A, DispatchError> {
        let not_found = || DomainError::not_found(format!("{} '{partition_key}'", A::AGGREGATE_TYPE));
        match self.store.resource(partition_key).await? {
            Some(resource) if resource.is_active() => {}
            _ => return Err(not_found().into()),
        }
        let built = self.builder.load(&self.store, partition_key).await?;
        if !built.aggregate.is_active() {
            return Err(not_found().into());
        }
        Ok(built.aggregate)
    }

    /// Full event history, deleted partitions included.
    pub async fn history(&self, partition_key: &PartitionKey) -> Result<Vec<StoredEvent>, DispatchError> {
        let events = self.store.list_after(partition_key, 0).await?;
        if events.is_empty() {
            return Err(DomainError::not_found(format!("no history for '{partition_key}'")).into());
        }
        Ok(events)
    }

    async fn write_secrets(&self, writes: &[SecretWrite]) -> Result<(), DispatchError> {
        for (i, write) in writes.iter().enumerate() {
            if let Err(err) = self.secrets.set(&write.name, &write.value).await {
                self.discard_secrets(&writes[..i]).await;
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Remove secrets written for a command that did not commit.
    async fn discard_secrets(&self, writes: &[SecretWrite]) {
        for write in writes {
            if let Err(err) = self.secrets.delete(&write.name).await {
                warn!(secret = %write.name, error = %err, "failed to remove orphaned secret");
            }
        }
    }

    async fn compact(&self, aggregate: &A, last_applied: marketsync_core::SequenceId) {
        let partition_key = aggregate.partition_key().clone();
        let result = async {
            let snapshot = SnapshotRecord::capture(aggregate, last_applied)
                .map_err(|e| EventStoreError::Corrupt(e.to_string()))?;
            self.store.save(snapshot).await?;
            self.store.prune(&partition_key, self.policy.keep).await
        }
        .await;
        match result {
            Ok(pruned) => debug!(partition_key = %partition_key, last_applied, pruned, "snapshot written"),
            Err(err) => warn!(partition_key = %partition_key, error = %err, "snapshot compaction failed"),
        }
    }
}
