//! Downstream views fed by the synchronizer.
//!
//! Both keep only what consumers see: the last published document per partition,
//! disabled (not removed) once the resource is deleted.

use marketsync_applications::{Application, ApplicationEvent};
use marketsync_core::AggregateRoot;
use marketsync_core::LifecycleStatus;
use marketsync_events::{EventEnvelope, Projection, ProjectionError, RowChange};
use marketsync_marketplace::{Offer, OfferEvent};

/// Published offers, as a storefront would list them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishedOfferProjection;

impl Projection for PublishedOfferProjection {
    type Ev = OfferEvent;
    type Row = Offer;

    fn name(&self) -> &'static str {
        "published-offers"
    }

    fn apply(
        &self,
        _current: Option<&Offer>,
        envelope: &EventEnvelope<OfferEvent>,
    ) -> Result<RowChange<Offer>, ProjectionError> {
        match envelope.content() {
            OfferEvent::OfferPublished(e) => {
                ensure_same_partition(envelope, e.offer.partition_key())?;
                Ok(RowChange::Upsert(e.offer.clone()))
            }
            // A template rewrite of a live offer goes straight out.
            OfferEvent::OfferUpdatedFromTemplate(e) if e.offer.status() == LifecycleStatus::Published => {
                ensure_same_partition(envelope, e.offer.partition_key())?;
                Ok(RowChange::Upsert(e.offer.clone()))
            }
            OfferEvent::OfferDeleted(_) => Ok(RowChange::Disable),
            _ => Ok(RowChange::Unchanged),
        }
    }
}

/// Published applications with their APIs, as request routing needs them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishedApplicationProjection;

impl Projection for PublishedApplicationProjection {
    type Ev = ApplicationEvent;
    type Row = Application;

    fn name(&self) -> &'static str {
        "published-applications"
    }

    fn apply(
        &self,
        _current: Option<&Application>,
        envelope: &EventEnvelope<ApplicationEvent>,
    ) -> Result<RowChange<Application>, ProjectionError> {
        match envelope.content() {
            ApplicationEvent::ApplicationPublished(e) => {
                ensure_same_partition(envelope, e.application.partition_key())?;
                Ok(RowChange::Upsert(e.application.clone()))
            }
            ApplicationEvent::ApplicationDeleted(_) => Ok(RowChange::Disable),
            _ => Ok(RowChange::Unchanged),
        }
    }
}

fn ensure_same_partition<E>(
    envelope: &EventEnvelope<E>,
    content_key: &marketsync_core::PartitionKey,
) -> Result<(), ProjectionError> {
    if content_key != envelope.partition_key() {
        return Err(ProjectionError::rejected(
            envelope,
            format!("content names '{content_key}'"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketsync_core::{EventId, PartitionKey, SequenceId};
    use marketsync_events::{Event, EventMetadata, ProjectionRunner};
    use marketsync_marketplace::OfferProperties;
    use marketsync_marketplace::event::{OfferDeleted, OfferReplaced};

    fn key(s: &str) -> PartitionKey {
        PartitionKey::parse(s).unwrap()
    }

    fn env(seq: SequenceId, ev: OfferEvent) -> EventEnvelope<OfferEvent> {
        EventEnvelope::new(
            EventMetadata {
                event_id: EventId::new(),
                partition_key: key("foo"),
                sequence_id: seq,
                event_type: ev.event_type().to_string(),
                event_version: ev.version(),
                created_by: "tester".into(),
                created_time: Utc::now(),
            },
            ev,
        )
    }

    fn offer(id: &str, display_name: &str, status: LifecycleStatus) -> Offer {
        Offer::new(
            key(id),
            OfferProperties {
                display_name: display_name.into(),
                description: String::new(),
                is_manual_activation: false,
            },
        )
        .with_status(status)
    }

    #[test]
    fn drafts_stay_invisible_until_published() {
        let events = vec![
            env(1, OfferEvent::OfferCreated(OfferReplaced { offer: offer("foo", "Foo", LifecycleStatus::Draft) })),
            env(2, OfferEvent::OfferPublished(OfferReplaced { offer: offer("foo", "Foo", LifecycleStatus::Published) })),
        ];
        let projection = PublishedOfferProjection;

        let mut runner = ProjectionRunner::new(&projection, key("foo"));
        runner.apply(&events[0]).unwrap();
        assert!(runner.state().row.is_none());
        assert!(!runner.is_dirty());

        runner.apply(&events[1]).unwrap();
        let state = runner.state();
        assert!(state.is_enabled);
        assert_eq!(state.row.as_ref().unwrap().status(), LifecycleStatus::Published);
    }

    #[test]
    fn delete_disables_and_template_updates_of_live_offers_upsert() {
        let projection = PublishedOfferProjection;
        let events = vec![
            env(1, OfferEvent::OfferPublished(OfferReplaced { offer: offer("foo", "Foo", LifecycleStatus::Published) })),
            env(2, OfferEvent::OfferUpdatedFromTemplate(OfferReplaced { offer: offer("foo", "Foo v2", LifecycleStatus::Published) })),
            env(3, OfferEvent::OfferDeleted(OfferDeleted { offer_id: key("foo") })),
        ];
        let (cursor, state) =
            ProjectionRunner::rebuild_from_scratch(&projection, key("foo"), &events).unwrap();
        assert_eq!(cursor.last_applied(), 3);
        assert!(!state.is_enabled);
        assert_eq!(state.row.unwrap().properties().display_name, "Foo v2");
    }

    #[test]
    fn foreign_content_is_rejected_as_poison() {
        let projection = PublishedOfferProjection;
        let bad = env(1, OfferEvent::OfferPublished(OfferReplaced { offer: offer("bar", "Bar", LifecycleStatus::Published) }));
        let err = projection.apply(None, &bad).unwrap_err();
        assert!(err.is_poison());
    }
}
