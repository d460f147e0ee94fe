use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Span, debug, instrument, warn};

use marketsync_core::{ErrorKind, PartitionKey, SequenceId};
use marketsync_events::{DecoderTable, EventCodec, PartitionCursor, Projection, ProjectionRunner};

use crate::config::SyncConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::event_store::{EventStore, StoredEvent};
use crate::lease::{LeaseOutcome, PartitionLease};
use crate::read_model::{MaterializedRow, ReadModelStore, RowWrite};
use crate::trigger::PartitionTrigger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Events `from+1 ..= to` were applied and committed.
    Applied {
        from: SequenceId,
        to: SequenceId,
        applied: u64,
    },
    UpToDate { cursor: SequenceId },
    /// A pass for a later sequence id holds the partition.
    Superseded { in_flight: SequenceId },
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Nothing was committed; redelivering the trigger may succeed.
    #[error("transient sync failure on '{partition_key}': {reason}")]
    Transient {
        partition_key: PartitionKey,
        reason: String,
    },

    /// This event fails the same way every time.
    #[error("poison event '{event_type}' #{sequence_id} on '{partition_key}': {reason}")]
    Poison {
        partition_key: PartitionKey,
        sequence_id: SequenceId,
        event_type: String,
        reason: String,
    },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transient { .. } => ErrorKind::TransientIo,
            SyncError::Poison { .. } => ErrorKind::ServerInvariantViolation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }

    fn transient(partition_key: &PartitionKey, err: impl core::fmt::Display) -> Self {
        SyncError::Transient {
            partition_key: partition_key.clone(),
            reason: err.to_string(),
        }
    }

    fn poison(stored: &StoredEvent, err: impl core::fmt::Display) -> Self {
        SyncError::Poison {
            partition_key: stored.partition_key.clone(),
            sequence_id: stored.sequence_id,
            event_type: stored.event_type.clone(),
            reason: err.to_string(),
        }
    }
}

/// What a worker drives: one catch-up pass per trigger.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    fn consumer(&self) -> &str;

    async fn handle(&self, trigger: &PartitionTrigger) -> Result<SyncOutcome, SyncError>;

    /// Park a trigger the worker stopped retrying.
    async fn abandon(&self, trigger: &PartitionTrigger, error: &SyncError) -> Result<(), SyncError>;
}

/// Brings one consumer's read model up to date with an event store, one partition at a time.
pub struct Synchronizer<S, P, R>
where
    P: Projection,
{
    consumer: String,
    store: S,
    projection: P,
    read_model: R,
    leases: Arc<dyn PartitionLease>,
    dead_letters: Arc<dyn DeadLetterSink>,
    decoders: DecoderTable<P::Ev>,
    trigger_timeout: Duration,
}

impl<S, P, R> Synchronizer<S, P, R>
where
    S: EventStore,
    P: Projection + Send + Sync,
    P::Ev: EventCodec,
    P::Row: Send + Sync + 'static,
    R: ReadModelStore<P::Row>,
{
    pub fn new(
        config: &SyncConfig,
        store: S,
        projection: P,
        read_model: R,
        leases: Arc<dyn PartitionLease>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            consumer: config.consumer_name.clone(),
            store,
            projection,
            read_model,
            leases,
            dead_letters,
            decoders: P::Ev::decoder_table(),
            trigger_timeout: config.trigger_timeout,
        }
    }

    pub fn read_model(&self) -> &R {
        &self.read_model
    }

    pub fn projection_name(&self) -> &'static str {
        self.projection.name()
    }

    /// Catch partition `trigger.partition_key` up to the log.
    ///
    /// The trigger's sequence id only orders passes against each other; the pass
    /// always reads everything after the local cursor.
    #[instrument(
        skip(self, trigger),
        fields(
            consumer = %self.consumer,
            partition_key = %trigger.partition_key,
            sequence_id = trigger.sequence_id,
            attempt = trigger.attempt,
            applied = tracing::field::Empty
        ),
        err
    )]
    pub async fn trigger(&self, trigger: &PartitionTrigger) -> Result<SyncOutcome, SyncError> {
        let partition_key = &trigger.partition_key;

        // 1) Lease
        let lease = match self
            .leases
            .acquire(partition_key, trigger.sequence_id)
            .await
            .map_err(|e| SyncError::transient(partition_key, e))?
        {
            LeaseOutcome::Acquired(lease) => lease,
            LeaseOutcome::Superseded { in_flight } => {
                debug!(in_flight, "superseded by in-flight pass");
                return Ok(SyncOutcome::Superseded { in_flight });
            }
        };

        // 2) Catch up, bounded
        let result = match tokio::time::timeout(self.trigger_timeout, self.catch_up(partition_key)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::transient(
                partition_key,
                format!("pass exceeded {:?}", self.trigger_timeout),
            )),
        };

        // 3) Release, whatever happened
        if let Err(err) = self.leases.release(&lease).await {
            warn!(partition_key = %partition_key, error = %err, "failed to release partition lease");
        }

        // 4) Park poison
        if let Err(err @ SyncError::Poison { .. }) = &result {
            self.record_dead_letter(err).await?;
        }

        if let Ok(SyncOutcome::Applied { applied, .. }) = &result {
            Span::current().record("applied", *applied);
        }
        result
    }

    async fn catch_up(&self, partition_key: &PartitionKey) -> Result<SyncOutcome, SyncError> {
        let cursor = self
            .read_model
            .read_cursor(partition_key)
            .await
            .map_err(|e| SyncError::transient(partition_key, e))?;

        let events = self
            .store
            .list_after(partition_key, cursor)
            .await
            .map_err(|e| SyncError::transient(partition_key, e))?;
        if events.is_empty() {
            return Ok(SyncOutcome::UpToDate { cursor });
        }

        let baseline = self
            .read_model
            .get(partition_key)
            .await
            .map_err(|e| SyncError::transient(partition_key, e))?
            .map(MaterializedRow::into_row_state)
            .unwrap_or_default();

        let (to, write) = self.fold(partition_key, cursor, baseline, &events)?;
        if to == cursor {
            return Ok(SyncOutcome::UpToDate { cursor });
        }

        self.read_model
            .commit(partition_key, cursor, write, to)
            .await
            .map_err(|e| SyncError::transient(partition_key, e))?;

        Ok(SyncOutcome::Applied {
            from: cursor,
            to,
            applied: to - cursor,
        })
    }

    fn fold(
        &self,
        partition_key: &PartitionKey,
        cursor: SequenceId,
        baseline: marketsync_events::RowState<P::Row>,
        events: &[StoredEvent],
    ) -> Result<(SequenceId, RowWrite<P::Row>), SyncError> {
        let mut runner = ProjectionRunner::resume(
            &self.projection,
            PartitionCursor::new(partition_key.clone(), cursor),
            baseline,
        );

        for stored in events {
            if stored.sequence_id <= cursor {
                continue;
            }
            let envelope = stored
                .decode(&self.decoders)
                .map_err(|e| SyncError::poison(stored, e))?;
            runner.apply(&envelope).map_err(|e| {
                if e.is_poison() {
                    SyncError::poison(stored, e)
                } else {
                    SyncError::transient(partition_key, e)
                }
            })?;
        }

        let (cursor, state, dirty) = runner.into_parts();
        Ok((cursor.last_applied(), RowWrite::from_state(state, dirty)))
    }

    async fn record_dead_letter(&self, err: &SyncError) -> Result<(), SyncError> {
        let SyncError::Poison {
            partition_key,
            sequence_id,
            event_type,
            reason,
        } = err
        else {
            return Ok(());
        };
        warn!(
            consumer = %self.consumer,
            partition_key = %partition_key,
            sequence_id,
            event_type = %event_type,
            reason = %reason,
            "dead-lettering poison event"
        );
        self.dead_letters
            .record(DeadLetter {
                consumer: self.consumer.clone(),
                partition_key: partition_key.clone(),
                sequence_id: *sequence_id,
                event_type: event_type.clone(),
                reason: reason.clone(),
                recorded_at: Utc::now(),
            })
            .await
            .map_err(|e| SyncError::transient(partition_key, e))
    }
}

#[async_trait]
impl<S, P, R> TriggerHandler for Synchronizer<S, P, R>
where
    S: EventStore,
    P: Projection + Send + Sync,
    P::Ev: EventCodec,
    P::Row: Send + Sync + 'static,
    R: ReadModelStore<P::Row>,
{
    fn consumer(&self) -> &str {
        &self.consumer
    }

    async fn handle(&self, trigger: &PartitionTrigger) -> Result<SyncOutcome, SyncError> {
        self.trigger(trigger).await
    }

    async fn abandon(&self, trigger: &PartitionTrigger, error: &SyncError) -> Result<(), SyncError> {
        match error {
            SyncError::Poison { .. } => self.record_dead_letter(error).await,
            SyncError::Transient { reason, .. } => {
                let letter = SyncError::Poison {
                    partition_key: trigger.partition_key.clone(),
                    sequence_id: trigger.sequence_id,
                    event_type: trigger.event_type.clone(),
                    reason: format!("gave up after {} attempts: {reason}", trigger.attempt + 1),
                };
                self.record_dead_letter(&letter).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::InMemoryDeadLetterSink;
    use crate::event_store::{InMemoryEventStore, NewEvent};
    use crate::lease::{LeaseTimings, LocalLeaseMap};
    use crate::read_model::InMemoryReadModelStore;
    use crate::sync::PublishedOfferProjection;
    use marketsync_core::{DecisionContext, EventId, LifecycleStatus};
    use marketsync_marketplace::event::{OfferDeleted, OfferReplaced};
    use marketsync_marketplace::{Offer, OfferEvent, OfferProperties};
    use serde_json::json;

    type OfferSync = Synchronizer<Arc<InMemoryEventStore>, PublishedOfferProjection, Arc<InMemoryReadModelStore<Offer>>>;

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        rows: Arc<InMemoryReadModelStore<Offer>>,
        dead_letters: Arc<InMemoryDeadLetterSink>,
        sync: OfferSync,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEventStore::new());
        let rows = Arc::new(InMemoryReadModelStore::new());
        let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
        let config = SyncConfig {
            trigger_timeout: Duration::from_secs(5),
            ..SyncConfig::for_consumer("gallery")
        };
        let sync = Synchronizer::new(
            &config,
            store.clone(),
            PublishedOfferProjection,
            rows.clone(),
            Arc::new(LocalLeaseMap::new(LeaseTimings::default())),
            dead_letters.clone(),
        );
        Fixture {
            store,
            rows,
            dead_letters,
            sync,
        }
    }

    fn key() -> PartitionKey {
        PartitionKey::parse("foo").unwrap()
    }

    fn offer(display_name: &str, status: LifecycleStatus) -> Offer {
        Offer::new(
            key(),
            OfferProperties {
                display_name: display_name.into(),
                description: String::new(),
                is_manual_activation: false,
            },
        )
        .with_status(status)
    }

    async fn append(store: &InMemoryEventStore, event: OfferEvent) -> StoredEvent {
        let new = NewEvent::from_typed(&event, &DecisionContext::new("tester")).unwrap();
        store.append(new).await.unwrap()
    }

    fn trigger_for(stored: &StoredEvent) -> PartitionTrigger {
        PartitionTrigger {
            event_store: "offers".into(),
            event_type: stored.event_type.clone(),
            partition_key: stored.partition_key.clone(),
            sequence_id: stored.sequence_id,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn applies_everything_after_the_cursor_in_one_commit() {
        let f = fixture();
        append(&f.store, OfferEvent::OfferCreated(OfferReplaced { offer: offer("Foo", LifecycleStatus::Draft) })).await;
        let last = append(&f.store, OfferEvent::OfferPublished(OfferReplaced { offer: offer("Foo", LifecycleStatus::Published) })).await;

        let outcome = f.sync.trigger(&trigger_for(&last)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Applied { from: 0, to: 2, applied: 2 });

        let row = f.rows.get(&key()).await.unwrap().unwrap();
        assert!(row.is_enabled);
        assert_eq!(row.last_applied_event_id, 2);

        // A duplicate finds nothing new.
        let again = f.sync.trigger(&trigger_for(&last)).await.unwrap();
        assert_eq!(again, SyncOutcome::UpToDate { cursor: 2 });
    }

    #[tokio::test]
    async fn stale_trigger_still_catches_up_to_the_head() {
        let f = fixture();
        let first = append(&f.store, OfferEvent::OfferPublished(OfferReplaced { offer: offer("Foo", LifecycleStatus::Published) })).await;
        append(&f.store, OfferEvent::OfferDeleted(OfferDeleted { offer_id: key() })).await;

        let outcome = f.sync.trigger(&trigger_for(&first)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Applied { from: 0, to: 2, applied: 2 });
        assert!(!f.rows.get(&key()).await.unwrap().unwrap().is_enabled);
    }

    #[tokio::test]
    async fn undecodable_content_is_dead_lettered_and_cursor_stays() {
        let f = fixture();
        append(&f.store, OfferEvent::OfferPublished(OfferReplaced { offer: offer("Foo", LifecycleStatus::Published) })).await;
        let bad = f
            .store
            .append(NewEvent {
                event_id: EventId::new(),
                partition_key: key(),
                event_type: "marketplace.offer.published".into(),
                event_version: 1,
                content: json!({ "not": "an offer" }),
                created_by: "tester".into(),
                created_time: Utc::now(),
            })
            .await
            .unwrap();

        let err = f.sync.trigger(&trigger_for(&bad)).await.unwrap_err();
        assert!(matches!(err, SyncError::Poison { sequence_id: 2, .. }));
        assert!(!err.is_retryable());
        assert_eq!(f.rows.read_cursor(&key()).await.unwrap(), 0);

        let letters = f.dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].consumer, "gallery");
        assert_eq!(letters[0].sequence_id, 2);
    }

    #[tokio::test]
    async fn unknown_version_is_poison() {
        let f = fixture();
        let stored = f
            .store
            .append(NewEvent {
                event_id: EventId::new(),
                partition_key: key(),
                event_type: "marketplace.offer.published".into(),
                event_version: 99,
                content: json!({}),
                created_by: "tester".into(),
                created_time: Utc::now(),
            })
            .await
            .unwrap();
        let err = f.sync.trigger(&trigger_for(&stored)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerInvariantViolation);
    }

    #[tokio::test]
    async fn abandoning_a_transient_failure_records_it() {
        let f = fixture();
        let trigger = PartitionTrigger {
            event_store: "offers".into(),
            event_type: "marketplace.offer.published".into(),
            partition_key: key(),
            sequence_id: 7,
            attempt: 4,
        };
        let err = SyncError::transient(&key(), "database down");
        f.sync.abandon(&trigger, &err).await.unwrap();

        let letters = f.dead_letters.letters();
        assert_eq!(letters[0].sequence_id, 7);
        assert!(letters[0].reason.contains("gave up after 5 attempts"));
    }
}
