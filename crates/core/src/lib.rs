//! `marketsync-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod secret;
pub mod validation;

pub use aggregate::{Aggregate, AggregateRoot, Decision, DecisionContext, LifecycleStatus};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{EventId, PartitionKey, SequenceId, SnapshotId};
pub use secret::{SecretRef, SecretWrite};
