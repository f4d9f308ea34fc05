//! Sync state machine benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use easync_bench::{email_item, populated_backend};
use easync_engine::{coalesce, EngineConfig, SyncStateMachine};
use easync_protocol::{CollectionRequest, SyncRequest, Unfiltered};
use easync_state::{ChangeOp, InMemoryStateStore};

fn request(key: &str) -> SyncRequest {
    SyncRequest {
        collections: vec![CollectionRequest {
            sync_key: key.into(),
            collection_id: "inbox".into(),
            ..CollectionRequest::default()
        }],
        ..SyncRequest::default()
    }
}

/// Benchmark initial turns, which deliver a full snapshot.
fn bench_initial_turn(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_turn");

    for items in [10usize, 100, 500] {
        let backend = Arc::new(populated_backend("inbox", items, 256));
        let config = EngineConfig::new().with_window_size(512);
        group.bench_with_input(BenchmarkId::from_parameter(items), &items, |b, _| {
            b.iter_batched(
                || {
                    SyncStateMachine::new(
                        config.clone(),
                        Arc::new(InMemoryStateStore::new()),
                        Arc::clone(&backend),
                        Arc::clone(&backend),
                    )
                },
                |machine| {
                    let output = machine.process("dev", &request("0"), &Unfiltered).unwrap();
                    black_box(output.body);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark a steady stream of incremental turns, one new item each.
fn bench_incremental_turn(c: &mut Criterion) {
    c.bench_function("incremental_turn", |b| {
        let backend = Arc::new(populated_backend("inbox", 100, 256));
        let machine = SyncStateMachine::new(
            EngineConfig::default(),
            Arc::new(InMemoryStateStore::new()),
            Arc::clone(&backend),
            Arc::clone(&backend),
        );
        let output = machine.process("dev", &request("0"), &Unfiltered).unwrap();
        let mut key = output.response.collections[0].sync_key.clone();
        let mut n = 0u64;

        b.iter(|| {
            n += 1;
            backend.add("inbox", &format!("new-{n}"), email_item(256));
            let output = machine.process("dev", &request(&key), &Unfiltered).unwrap();
            key = output.response.collections[0].sync_key.clone();
            black_box(output.body);
        });
    });
}

/// Benchmark resends, which replay the stored turn.
fn bench_resend(c: &mut Criterion) {
    c.bench_function("resend", |b| {
        let backend = Arc::new(populated_backend("inbox", 100, 256));
        let machine = SyncStateMachine::new(
            EngineConfig::default(),
            Arc::new(InMemoryStateStore::new()),
            Arc::clone(&backend),
            Arc::clone(&backend),
        );
        let first = machine.process("dev", &request("0"), &Unfiltered).unwrap();
        let key = first.response.collections[0].sync_key.clone();
        backend.add("inbox", "extra", email_item(256));
        machine.process("dev", &request(&key), &Unfiltered).unwrap();

        b.iter(|| {
            let output = machine.process("dev", black_box(&request(&key)), &Unfiltered).unwrap();
            black_box(output.body);
        });
    });
}

/// Benchmark folding change batches with heavy item overlap.
fn bench_coalesce(c: &mut Criterion) {
    let older: Vec<ChangeOp> = (0..500)
        .map(|i| ChangeOp::add(format!("item-{}", i % 100), email_item(64)))
        .collect();
    let newer: Vec<ChangeOp> = (0..500)
        .map(|i| match i % 3 {
            0 => ChangeOp::change(format!("item-{}", i % 150), email_item(64)),
            1 => ChangeOp::delete(format!("item-{}", i % 150)),
            _ => ChangeOp::add(format!("other-{i}"), email_item(64)),
        })
        .collect();

    c.bench_function("coalesce_1000", |b| {
        b.iter_batched(
            || (older.clone(), newer.clone()),
            |(older, newer)| black_box(coalesce(older, newer)),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark request parsing.
fn bench_parse_request(c: &mut Criterion) {
    use easync_wbxml::codepage::{airsync, page};
    use easync_wbxml::{encode, push_text_element, WbxmlEvent};

    let mut events = vec![
        WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTIONS),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTION),
    ];
    push_text_element(&mut events, page::AIRSYNC, airsync::SYNC_KEY, "42");
    push_text_element(&mut events, page::AIRSYNC, airsync::COLLECTION_ID, "inbox");
    events.push(WbxmlEvent::start(page::AIRSYNC, airsync::COMMANDS));
    for i in 0..50 {
        events.push(WbxmlEvent::start(page::AIRSYNC, airsync::ADD));
        push_text_element(&mut events, page::AIRSYNC, airsync::CLIENT_ID, &format!("c{i}"));
        events.push(WbxmlEvent::start(page::AIRSYNC, airsync::APPLICATION_DATA));
        events.extend(email_item(256));
        events.extend([WbxmlEvent::EndTag, WbxmlEvent::EndTag]);
    }
    events.extend([
        WbxmlEvent::EndTag,
        WbxmlEvent::EndTag,
        WbxmlEvent::EndTag,
        WbxmlEvent::EndTag,
    ]);
    let body = encode(&events, 0).unwrap();

    c.bench_function("parse_request_50_adds", |b| {
        b.iter(|| black_box(SyncRequest::from_wbxml(black_box(&body)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_initial_turn,
    bench_incremental_turn,
    bench_resend,
    bench_coalesce,
    bench_parse_request
);
criterion_main!(benches);
