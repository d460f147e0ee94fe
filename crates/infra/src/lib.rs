//! Infrastructure layer: event store, snapshots, authoring, and the consumer pipeline.
//!
//! Every storage seam is a trait with an in-memory backend for tests and a
//! Postgres (sqlx) backend for deployments.

pub mod builder;
pub mod command_dispatcher;
pub mod config;
pub mod dead_letter;
pub mod event_store;
pub mod lease;
pub mod read_model;
pub mod schema;
pub mod secrets;
pub mod snapshot;
pub mod sync;
pub mod trigger;
pub mod workers;
