use marketsync_core::PartitionKey;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - **full-state**: content describes the complete resulting sub-entity, never a delta
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "marketplace.plan.created").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Partition whose history this event extends.
    fn partition_key(&self) -> &PartitionKey;
}
