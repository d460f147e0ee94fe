use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use marketsync_core::{Aggregate, DecisionContext, PartitionKey};
use marketsync_events::{EventCodec, ProjectionRunner};
use marketsync_infra::builder::AggregateBuilder;
use marketsync_infra::event_store::{NewEvent, StoredEvent};
use marketsync_infra::snapshot::SnapshotRecord;
use marketsync_infra::sync::PublishedOfferProjection;
use marketsync_marketplace::{
    Offer, OfferCommand, OfferEvent, OfferProperties, PlanMode, PlanProperties,
};

fn props(i: usize) -> OfferProperties {
    OfferProperties {
        display_name: format!("Offer rev {i}"),
        description: "benchmark offer".to_string(),
        is_manual_activation: false,
    }
}

fn plan(i: usize) -> PlanProperties {
    PlanProperties {
        display_name: format!("Plan {i}"),
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

/// Decide and apply `count` commands on one offer, returning the stored history.
fn history(count: usize) -> Vec<StoredEvent> {
    let offer_id = PartitionKey::parse("bench-offer").unwrap();
    let mut state: Option<Offer> = None;
    let mut events = Vec::with_capacity(count);

    for i in 0..count {
        let command = match i {
            0 => OfferCommand::CreateOffer { offer_id: offer_id.clone(), properties: props(i) },
            1 => OfferCommand::CreatePlan { offer_id: offer_id.clone(), plan_id: "basic".into(), properties: plan(i) },
            _ if i % 7 == 0 => OfferCommand::PublishOffer { offer_id: offer_id.clone() },
            _ if i % 2 == 0 => OfferCommand::UpdatePlan { offer_id: offer_id.clone(), plan_id: "basic".into(), properties: plan(i) },
            _ => OfferCommand::UpdateOffer { offer_id: offer_id.clone(), properties: props(i) },
        };
        let ctx = DecisionContext::new("bench");
        let decision = Offer::handle(state.as_ref(), &command, &ctx).unwrap();
        state = Some(Offer::apply(state, &decision.event).unwrap());
        let stored = NewEvent::from_typed(&decision.event, &ctx)
            .unwrap()
            .into_stored(i as u64 + 1);
        events.push(stored);
    }
    events
}

fn bench_aggregate_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_replay");
    let builder = AggregateBuilder::<Offer>::new();

    for count in [10usize, 100, 1000] {
        let events = history(count);
        let tail_len = 5.min(count);
        let split = count - tail_len;
        let at_split = builder.build(None, &events[..split.max(1)]).unwrap();
        let snapshot = SnapshotRecord::capture(&at_split.aggregate, at_split.last_applied).unwrap();
        let tail = &events[at_split.last_applied as usize..];

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("from_scratch", count), &events, |b, events| {
            b.iter(|| builder.build(None, black_box(events)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("from_snapshot", count), &tail, |b, tail| {
            b.iter(|| builder.build(Some(black_box(&snapshot)), black_box(tail)).unwrap())
        });
    }

    group.finish();
}

fn bench_projection_catch_up(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_catch_up");
    let table = <OfferEvent as EventCodec>::decoder_table();
    let projection = PublishedOfferProjection;

    for count in [10usize, 100, 1000] {
        let events = history(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("decode_and_apply", count), &events, |b, events| {
            b.iter(|| {
                let envelopes: Vec<_> = events.iter().map(|e| e.decode(&table).unwrap()).collect();
                let partition = envelopes[0].partition_key().clone();
                ProjectionRunner::rebuild_from_scratch(&projection, partition, &envelopes).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate_replay, bench_projection_catch_up);
criterion_main!(benches);
