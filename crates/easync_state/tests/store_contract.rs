//! Behaviour every `StateStore` backend must share.

use std::sync::{Arc, Barrier};
use std::thread;

use easync_state::{
    ChangeOp, FileStateStore, InMemoryStateStore, StateStore, SyncKey, SyncState, TurnRecord,
};

fn full_turn(store: &dyn StateStore, presented: &SyncKey, pending: SyncKey) -> SyncState {
    let state = store.try_begin("dev", "inbox", presented, pending).unwrap();
    let next = state
        .advanced(
            state.last_server_anchor + 1,
            Vec::new(),
            TurnRecord {
                changes: vec![ChangeOp::delete("s1")],
                ..TurnRecord::default()
            },
        )
        .unwrap();
    store.commit("dev", "inbox", next.clone()).unwrap();
    next
}

fn key_chain(store: &dyn StateStore) {
    let s1 = full_turn(store, &SyncKey::initial(), SyncKey::counter(1));
    let s2 = full_turn(store, &s1.current_key, s1.current_key.increment());
    assert_eq!(s2.current_key, SyncKey::counter(2));
    assert_eq!(s2.previous_key, Some(SyncKey::counter(1)));
    assert_eq!(s2.version_counter, 2);

    // Superseded keys cannot open a turn.
    assert!(store
        .try_begin("dev", "inbox", &SyncKey::counter(1), SyncKey::counter(3))
        .unwrap_err()
        .is_conflict());

    // Reset from "0" continues the counter.
    let s3 = full_turn(store, &SyncKey::initial(), SyncKey::counter(3));
    assert_eq!(s3.previous_key, Some(SyncKey::counter(2)));
    assert_eq!(store.get("dev", "inbox").unwrap().unwrap(), s3);
}

fn mutual_exclusion(store: Arc<dyn StateStore>) {
    full_turn(store.as_ref(), &SyncKey::initial(), SyncKey::counter(1));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store
                    .try_begin("dev", "inbox", &SyncKey::counter(1), SyncKey::counter(2))
                    .is_ok()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn memory_key_chain() {
    key_chain(&InMemoryStateStore::new());
}

#[test]
fn file_key_chain() {
    let dir = tempfile::tempdir().unwrap();
    key_chain(&FileStateStore::open(dir.path()).unwrap());
}

#[test]
fn memory_mutual_exclusion() {
    mutual_exclusion(Arc::new(InMemoryStateStore::new()));
}

#[test]
fn file_mutual_exclusion() {
    let dir = tempfile::tempdir().unwrap();
    mutual_exclusion(Arc::new(FileStateStore::open(dir.path()).unwrap()));
}
