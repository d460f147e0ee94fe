//! Consumer side: trigger-driven catch-up of local read models.

pub mod projections;
pub mod retry;
pub mod synchronizer;

pub use projections::{PublishedApplicationProjection, PublishedOfferProjection};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use synchronizer::{SyncError, SyncOutcome, Synchronizer, TriggerHandler};
