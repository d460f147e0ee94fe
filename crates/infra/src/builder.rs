//! Aggregate rehydration from a snapshot plus the tail of the log.

use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use thiserror::Error;

use marketsync_core::{Aggregate, DomainError, ErrorKind, PartitionKey, SequenceId};
use marketsync_events::{CodecError, DecoderTable, EventCodec};

use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::snapshot::{SnapshotRecord, SnapshotStore};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no history for '{0}'")]
    NotFound(PartitionKey),

    #[error("empty history")]
    EmptyHistory,

    #[error("'{0}' has events but no snapshot")]
    MissingSnapshot(PartitionKey),

    #[error("out of order: expected #{expected}, found #{found}")]
    OutOfOrder {
        expected: SequenceId,
        found: SequenceId,
    },

    #[error("event of '{found}' in the history of '{expected}'")]
    PartitionMismatch {
        expected: PartitionKey,
        found: PartitionKey,
    },

    #[error("history starts with non-genesis event '{event_type}' #{sequence_id}")]
    NotGenesis {
        event_type: String,
        sequence_id: SequenceId,
    },

    #[error("unreadable snapshot of '{partition_key}': {reason}")]
    CorruptSnapshot {
        partition_key: PartitionKey,
        reason: String,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::NotFound(_) | BuildError::EmptyHistory => ErrorKind::NotFound,
            BuildError::Store(e) => e.kind(),
            BuildError::Codec(e) => e.kind(),
            // Stored history contradicting the aggregate is never the caller's fault.
            BuildError::Domain(_) => ErrorKind::ServerInvariantViolation,
            BuildError::MissingSnapshot(_)
            | BuildError::OutOfOrder { .. }
            | BuildError::PartitionMismatch { .. }
            | BuildError::NotGenesis { .. }
            | BuildError::CorruptSnapshot { .. } => ErrorKind::ServerInvariantViolation,
        }
    }
}

/// A rehydrated aggregate and how far into the log it reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Built<A> {
    pub aggregate: A,
    /// Sequence id of the last event folded in.
    pub last_applied: SequenceId,
    /// `last_applied_event_id` of the snapshot the build started from (0 without one).
    pub snapshot_last_applied: SequenceId,
}

/// Folds stored events over an optional snapshot baseline.
///
/// Deterministic: the same baseline and slice always produce the same aggregate.
pub struct AggregateBuilder<A: Aggregate> {
    table: DecoderTable<A::Event>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Default for AggregateBuilder<A>
where
    A: Aggregate + DeserializeOwned,
    A::Event: EventCodec,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> AggregateBuilder<A>
where
    A: Aggregate + DeserializeOwned,
    A::Event: EventCodec,
{
    pub fn new() -> Self {
        Self {
            table: <A::Event as EventCodec>::decoder_table(),
            _aggregate: PhantomData,
        }
    }

    pub fn decoder_table(&self) -> &DecoderTable<A::Event> {
        &self.table
    }

    /// Fold `events` over `snapshot`.
    ///
    /// Events at or below the snapshot are skipped. Without a snapshot the first
    /// applied event must be a genesis event.
    pub fn build(
        &self,
        snapshot: Option<&SnapshotRecord>,
        events: &[StoredEvent],
    ) -> Result<Built<A>, BuildError> {
        let (mut state, mut cursor, partition) = match snapshot {
            Some(s) => {
                let aggregate: A = s.restore().map_err(|e| BuildError::CorruptSnapshot {
                    partition_key: s.partition_key.clone(),
                    reason: e.to_string(),
                })?;
                (Some(aggregate), s.last_applied_event_id, Some(s.partition_key.clone()))
            }
            None => (None, 0, None),
        };
        let snapshot_last_applied = cursor;
        let partition = match (partition, events.first()) {
            (Some(p), _) => p,
            (None, Some(first)) => first.partition_key.clone(),
            (None, None) => return Err(BuildError::EmptyHistory),
        };

        for stored in events {
            if stored.partition_key != partition {
                return Err(BuildError::PartitionMismatch {
                    expected: partition,
                    found: stored.partition_key.clone(),
                });
            }
            if stored.sequence_id <= cursor {
                continue;
            }
            if stored.sequence_id != cursor + 1 {
                return Err(BuildError::OutOfOrder {
                    expected: cursor + 1,
                    found: stored.sequence_id,
                });
            }

            let event = stored.decode(&self.table)?.into_content();
            if state.is_none() && !A::is_genesis(&event) {
                return Err(BuildError::NotGenesis {
                    event_type: stored.event_type.clone(),
                    sequence_id: stored.sequence_id,
                });
            }
            state = Some(A::apply(state, &event)?);
            cursor = stored.sequence_id;
        }

        match state {
            Some(aggregate) => Ok(Built {
                aggregate,
                last_applied: cursor,
                snapshot_last_applied,
            }),
            None => Err(BuildError::NotFound(partition)),
        }
    }

    /// Latest snapshot plus everything after it.
    pub async fn load<S>(&self, store: &S, partition_key: &PartitionKey) -> Result<Built<A>, BuildError>
    where
        S: EventStore + SnapshotStore + ?Sized,
    {
        let Some(snapshot) = store.latest(partition_key).await? else {
            return if store.list_after(partition_key, 0).await?.is_empty() {
                Err(BuildError::NotFound(partition_key.clone()))
            } else {
                Err(BuildError::MissingSnapshot(partition_key.clone()))
            };
        };
        let tail = store
            .list_after(partition_key, snapshot.last_applied_event_id)
            .await?;
        self.build(Some(&snapshot), &tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, NewEvent};
    use marketsync_core::{AggregateRoot, DecisionContext, LifecycleStatus};
    use marketsync_marketplace::{Offer, OfferCommand, OfferProperties, PlanMode, PlanProperties};

    fn key() -> PartitionKey {
        PartitionKey::parse("foo").unwrap()
    }

    fn props(name: &str) -> OfferProperties {
        OfferProperties {
            display_name: name.into(),
            description: String::new(),
            is_manual_activation: false,
        }
    }

    fn plan_props() -> PlanProperties {
        PlanProperties {
            display_name: "Basic".into(),
            description: String::new(),
            mode: PlanMode::Saas,
            on_subscribe: vec![],
            on_update: vec![],
            on_suspend: vec![],
            on_delete: vec![],
            on_purge: vec![],
            application_name: None,
        }
    }

    /// Run commands through handle/apply and return the stored log.
    fn history(commands: &[OfferCommand]) -> Vec<StoredEvent> {
        let mut state: Option<Offer> = None;
        let mut log = Vec::new();
        for (i, cmd) in commands.iter().enumerate() {
            let ctx = DecisionContext::new("dev");
            let decision = Offer::handle(state.as_ref(), cmd, &ctx).unwrap();
            state = Some(Offer::apply(state, &decision.event).unwrap());
            log.push(
                NewEvent::from_typed(&decision.event, &ctx)
                    .unwrap()
                    .into_stored(i as SequenceId + 1),
            );
        }
        log
    }

    fn foo_lifecycle() -> Vec<StoredEvent> {
        history(&[
            OfferCommand::CreateOffer {
                offer_id: key(),
                properties: props("Foo"),
            },
            OfferCommand::UpdateOffer {
                offer_id: key(),
                properties: props("Foo v2"),
            },
            OfferCommand::CreatePlan {
                offer_id: key(),
                plan_id: "basic".into(),
                properties: plan_props(),
            },
            OfferCommand::PublishOffer { offer_id: key() },
        ])
    }

    #[test]
    fn build_from_scratch_folds_the_whole_log() {
        let builder = AggregateBuilder::<Offer>::new();
        let built = builder.build(None, &foo_lifecycle()).unwrap();

        assert_eq!(built.last_applied, 4);
        assert_eq!(built.snapshot_last_applied, 0);
        assert_eq!(built.aggregate.properties().display_name, "Foo v2");
        assert_eq!(built.aggregate.status(), LifecycleStatus::Published);
    }

    #[test]
    fn snapshot_plus_tail_matches_full_replay() {
        let builder = AggregateBuilder::<Offer>::new();
        let log = foo_lifecycle();
        let at_two = builder.build(None, &log[..2]).unwrap();
        let snapshot = SnapshotRecord::capture(&at_two.aggregate, 2).unwrap();

        let resumed = builder.build(Some(&snapshot), &log).unwrap();
        assert_eq!(resumed.aggregate, builder.build(None, &log).unwrap().aggregate);
        assert_eq!(resumed.snapshot_last_applied, 2);
    }

    #[test]
    fn non_genesis_first_event_is_an_invariant_violation() {
        let builder = AggregateBuilder::<Offer>::new();
        let log = foo_lifecycle();
        let err = builder.build(None, &log[1..]).unwrap_err();
        assert!(matches!(err, BuildError::NotGenesis { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::ServerInvariantViolation);
    }

    #[test]
    fn gaps_are_rejected() {
        let builder = AggregateBuilder::<Offer>::new();
        let mut log = foo_lifecycle();
        log.remove(1);
        let err = builder.build(None, &log).unwrap_err();
        assert!(matches!(err, BuildError::OutOfOrder { expected: 2, found: 3 }));
    }

    #[test]
    fn foreign_events_are_rejected() {
        let builder = AggregateBuilder::<Offer>::new();
        let mut log = foo_lifecycle();
        log[2].partition_key = PartitionKey::parse("bar").unwrap();
        assert!(matches!(
            builder.build(None, &log),
            Err(BuildError::PartitionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn load_distinguishes_missing_history_from_missing_snapshot() {
        let store = InMemoryEventStore::new();
        let builder = AggregateBuilder::<Offer>::new();

        let err = builder.load(&store, &key()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        for event in foo_lifecycle() {
            let new = NewEvent {
                event_id: event.event_id,
                partition_key: event.partition_key,
                event_type: event.event_type,
                event_version: event.event_version,
                content: event.content,
                created_by: event.created_by,
                created_time: event.created_time,
            };
            store.append(new).await.unwrap();
        }
        let err = builder.load(&store, &key()).await.unwrap_err();
        assert!(matches!(err, BuildError::MissingSnapshot(_)));
    }

    #[tokio::test]
    async fn load_uses_latest_snapshot_and_tail() {
        let store = InMemoryEventStore::new();
        let builder = AggregateBuilder::<Offer>::new();
        let log = foo_lifecycle();
        for event in &log {
            let decoded = event.decode(builder.decoder_table()).unwrap();
            let ctx = DecisionContext {
                event_id: event.event_id,
                author: event.created_by.clone(),
                occurred_at: event.created_time,
            };
            store
                .append(NewEvent::from_typed(decoded.content(), &ctx).unwrap())
                .await
                .unwrap();
        }
        let at_one = builder.build(None, &log[..1]).unwrap();
        store
            .save(SnapshotRecord::capture(&at_one.aggregate, 1).unwrap())
            .await
            .unwrap();

        let loaded = builder.load(&store, &key()).await.unwrap();
        assert_eq!(loaded.last_applied, 4);
        assert_eq!(loaded.snapshot_last_applied, 1);
        assert!(loaded.aggregate.plan("basic").is_some());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Rename(String),
            CreatePlan(u8),
            DeletePlan(u8),
            Publish,
        }

        fn step() -> impl Strategy<Value = Step> {
            prop_oneof![
                "[A-Za-z]{1,12}".prop_map(Step::Rename),
                (0u8..4).prop_map(Step::CreatePlan),
                (0u8..4).prop_map(Step::DeletePlan),
                Just(Step::Publish),
            ]
        }

        /// Commands that the aggregate accepts; rejected ones are dropped.
        fn accepted_history(steps: &[Step]) -> Vec<StoredEvent> {
            let mut state: Option<Offer> = None;
            let mut log = Vec::new();
            let mut commands = vec![OfferCommand::CreateOffer {
                offer_id: key(),
                properties: props("Start"),
            }];
            commands.extend(steps.iter().map(|s| match s {
                Step::Rename(name) => OfferCommand::UpdateOffer {
                    offer_id: key(),
                    properties: props(name),
                },
                Step::CreatePlan(n) => OfferCommand::CreatePlan {
                    offer_id: key(),
                    plan_id: format!("plan-{n}"),
                    properties: plan_props(),
                },
                Step::DeletePlan(n) => OfferCommand::DeletePlan {
                    offer_id: key(),
                    plan_id: format!("plan-{n}"),
                },
                Step::Publish => OfferCommand::PublishOffer { offer_id: key() },
            }));
            for cmd in &commands {
                let ctx = DecisionContext::new("prop");
                let Ok(decision) = Offer::handle(state.as_ref(), cmd, &ctx) else {
                    continue;
                };
                state = Some(Offer::apply(state, &decision.event).unwrap());
                let seq = log.len() as SequenceId + 1;
                log.push(NewEvent::from_typed(&decision.event, &ctx).unwrap().into_stored(seq));
            }
            log
        }

        proptest! {
            #[test]
            fn replay_from_any_snapshot_matches_full_replay(
                steps in proptest::collection::vec(step(), 0..25),
                cut in 1usize..26,
            ) {
                let builder = AggregateBuilder::<Offer>::new();
                let log = accepted_history(&steps);
                let cut = cut.min(log.len());

                let full = builder.build(None, &log).unwrap();
                let prefix = builder.build(None, &log[..cut]).unwrap();
                let snapshot = SnapshotRecord::capture(&prefix.aggregate, cut as SequenceId).unwrap();
                let resumed = builder.build(Some(&snapshot), &log[cut..]).unwrap();

                prop_assert_eq!(
                    serde_json::to_vec(&resumed.aggregate).unwrap(),
                    serde_json::to_vec(&full.aggregate).unwrap()
                );
                prop_assert_eq!(resumed.last_applied, full.last_applied);
            }
        }
    }
}
