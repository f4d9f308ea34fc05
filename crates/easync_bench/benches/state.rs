//! Sync state store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use easync_bench::email_item;
use easync_state::{
    ChangeOp, FileStateStore, InMemoryStateStore, StateStore, SyncKey, TurnRecord,
};
use tempfile::tempdir;

/// One begin/commit cycle, carrying `held` pending changes.
fn cycle<S: StateStore>(store: &S, key: &mut SyncKey, held: &[ChangeOp]) {
    let begun = store
        .try_begin("dev", "inbox", key, key.increment())
        .unwrap();
    let next = begun
        .advanced(0, held.to_vec(), TurnRecord::default())
        .unwrap();
    *key = next.current_key.clone();
    store.commit("dev", "inbox", next).unwrap();
}

/// Benchmark the begin/commit pair on both stores.
fn bench_turn_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("turn_cycle");
    let held: Vec<ChangeOp> = (0..20)
        .map(|i| ChangeOp::add(format!("item-{i}"), email_item(256)))
        .collect();

    group.bench_function("memory", |b| {
        let store = InMemoryStateStore::new();
        let mut key = SyncKey::initial();
        b.iter(|| cycle(&store, &mut key, black_box(&held)));
    });

    group.bench_function("file", |b| {
        let dir = tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        let mut key = SyncKey::initial();
        b.iter(|| cycle(&store, &mut key, black_box(&held)));
    });

    group.finish();
}

/// Benchmark reading a record.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    let dir = tempdir().unwrap();
    let file = FileStateStore::open(dir.path()).unwrap();
    let memory = InMemoryStateStore::new();
    let mut key = SyncKey::initial();
    cycle(&file, &mut key, &[]);
    let mut key = SyncKey::initial();
    cycle(&memory, &mut key, &[]);

    group.bench_function("memory", |b| {
        b.iter(|| black_box(memory.get("dev", "inbox").unwrap()));
    });
    group.bench_function("file", |b| {
        b.iter(|| black_box(file.get("dev", "inbox").unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_turn_cycle, bench_get);
criterion_main!(benches);
