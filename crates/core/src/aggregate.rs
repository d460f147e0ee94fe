//! Aggregate traits for event-sourced domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::id::{EventId, PartitionKey};
use crate::secret::SecretWrite;

/// Lifecycle shared by every aggregate: `Draft → Published → Deleted`.
///
/// `Deleted` is a soft marker; the partition keeps its full history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    Draft,
    Published,
    Deleted,
}

impl LifecycleStatus {
    pub fn is_active(self) -> bool {
        self != LifecycleStatus::Deleted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Draft => "Draft",
            LifecycleStatus::Published => "Published",
            LifecycleStatus::Deleted => "Deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Draft" => Some(LifecycleStatus::Draft),
            "Published" => Some(LifecycleStatus::Published),
            "Deleted" => Some(LifecycleStatus::Deleted),
            _ => None,
        }
    }
}

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Partition that owns this aggregate's history.
    fn partition_key(&self) -> &PartitionKey;

    fn status(&self) -> LifecycleStatus;

    fn is_active(&self) -> bool {
        self.status().is_active()
    }
}

/// Identifiers and metadata handed to `handle` by the caller.
///
/// Keeps `handle` pure: anything that would otherwise be generated (ids,
/// timestamps, secret names) comes in through here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionContext {
    pub event_id: EventId,
    pub author: String,
    pub occurred_at: DateTime<Utc>,
}

impl DecisionContext {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            event_id: EventId::new(),
            author: author.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Outcome of handling a command: the event plus side effects on the secret store
/// the caller must carry out around the append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision<E> {
    pub event: E,
    /// Written before the event is appended.
    pub secret_writes: Vec<SecretWrite>,
    /// Deleted after the event is committed.
    pub secret_deletes: Vec<String>,
}

impl<E> Decision<E> {
    pub fn new(event: E) -> Self {
        Self {
            event,
            secret_writes: Vec::new(),
            secret_deletes: Vec::new(),
        }
    }

    pub fn with_secret(mut self, write: SecretWrite) -> Self {
        self.secret_writes.push(write);
        self
    }

    pub fn with_secret_delete(mut self, name: impl Into<String>) -> Self {
        self.secret_deletes.push(name.into());
        self
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(state, cmd, ctx)` validates and returns one full-state event.
/// - **State evolution**: `apply(state, event)` overwrites the affected part of the state.
///
/// `state` is `None` for a partition with no history. Because events carry full
/// state, applying the same event twice yields the same result.
pub trait Aggregate: AggregateRoot + Clone + Sized {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;

    /// Stable aggregate type name (e.g. "marketplace.offer").
    const AGGREGATE_TYPE: &'static str;

    /// Partition a command targets.
    fn target(command: &Self::Command) -> &PartitionKey;

    /// Whether this event may start an aggregate from nothing (or over a deleted one).
    fn is_genesis(event: &Self::Event) -> bool;

    /// Evolve state by one event.
    ///
    /// Must fail with `InvariantViolation` when a non-genesis event arrives with no state.
    fn apply(state: Option<Self>, event: &Self::Event) -> DomainResult<Self>;

    /// Decide the event for a command. Must not perform IO.
    fn handle(
        state: Option<&Self>,
        command: &Self::Command,
        ctx: &DecisionContext,
    ) -> DomainResult<Decision<Self::Event>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_status_parses_its_own_names() {
        for status in [
            LifecycleStatus::Draft,
            LifecycleStatus::Published,
            LifecycleStatus::Deleted,
        ] {
            assert_eq!(LifecycleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LifecycleStatus::parse("draft"), None);
    }

    #[test]
    fn only_deleted_is_inactive() {
        assert!(LifecycleStatus::Draft.is_active());
        assert!(LifecycleStatus::Published.is_active());
        assert!(!LifecycleStatus::Deleted.is_active());
    }

    #[test]
    fn decision_collects_secret_side_effects() {
        let d = Decision::new(7u8)
            .with_secret(SecretWrite::new("whk-a", "v"))
            .with_secret_delete("whk-old");
        assert_eq!(d.event, 7);
        assert_eq!(d.secret_writes.len(), 1);
        assert_eq!(d.secret_deletes, vec!["whk-old".to_string()]);
    }
}
