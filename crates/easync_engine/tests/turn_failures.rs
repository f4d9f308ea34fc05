//! Turns that fail part way, and how retries recover from them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use easync_engine::{
    ChangeBatch, ChangeLog, EngineConfig, EngineError, MemoryBackend, SourceError, SourceResult,
    SyncOutput, SyncStateMachine,
};
use easync_protocol::{
    ClientCommand, CollectionOptions, CollectionRequest, SyncRequest, SyncStatus, Unfiltered,
};
use easync_state::{
    ChangeKind, InMemoryStateStore, ReplyKind, StateStore, StoreError, StoreResult, SyncKey,
    SyncState,
};
use easync_wbxml::{push_text_element, WbxmlEvent};

/// Fails one numbered `changes_since` call.
struct FlakyLog {
    inner: Arc<MemoryBackend>,
    calls: AtomicUsize,
    fail_call: usize,
}

impl ChangeLog for FlakyLog {
    fn changes_since(&self, collection_id: &str, anchor: u64) -> SourceResult<ChangeBatch> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_call {
            return Err(SourceError::Unavailable(format!("call {call} dropped")));
        }
        self.inner.changes_since(collection_id, anchor)
    }

    fn full_snapshot(&self, collection_id: &str) -> SourceResult<ChangeBatch> {
        self.inner.full_snapshot(collection_id)
    }
}

/// Fails every commit while `fail` is set.
#[derive(Default)]
struct FailingCommits {
    inner: InMemoryStateStore,
    fail: AtomicBool,
}

impl StateStore for FailingCommits {
    fn get(&self, device_id: &str, collection_id: &str) -> StoreResult<Option<SyncState>> {
        self.inner.get(device_id, collection_id)
    }

    fn try_begin(
        &self,
        device_id: &str,
        collection_id: &str,
        presented: &SyncKey,
        pending: SyncKey,
    ) -> StoreResult<SyncState> {
        self.inner
            .try_begin(device_id, collection_id, presented, pending)
    }

    fn commit(
        &self,
        device_id: &str,
        collection_id: &str,
        new_state: SyncState,
    ) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("disk full".into()));
        }
        self.inner.commit(device_id, collection_id, new_state)
    }

    fn release(&self, device_id: &str, collection_id: &str) -> StoreResult<()> {
        self.inner.release(device_id, collection_id)
    }

    fn reset_stale(&self, max_age: Duration) -> StoreResult<usize> {
        self.inner.reset_stale(max_age)
    }

    fn unlink(&self, device_id: &str, collection_id: &str) -> StoreResult<bool> {
        self.inner.unlink(device_id, collection_id)
    }

    fn unlink_device(&self, device_id: &str) -> StoreResult<usize> {
        self.inner.unlink_device(device_id)
    }

    fn list(&self, device_id: &str) -> StoreResult<Vec<SyncState>> {
        self.inner.list(device_id)
    }
}

fn subject(text: &str) -> Vec<WbxmlEvent> {
    let mut events = Vec::new();
    push_text_element(&mut events, easync_wbxml::codepage::page::EMAIL, 0x14, text);
    events
}

fn request(key: &str, commands: Vec<ClientCommand>) -> SyncRequest {
    SyncRequest {
        collections: vec![CollectionRequest {
            sync_key: key.into(),
            collection_id: "C1".into(),
            commands,
            ..CollectionRequest::default()
        }],
        ..SyncRequest::default()
    }
}

fn add(client_id: &str) -> ClientCommand {
    ClientCommand::Add {
        client_id: client_id.into(),
        class: None,
        data: subject("from device"),
    }
}

type FlakyMachine = SyncStateMachine<InMemoryStateStore, FlakyLog, MemoryBackend>;

fn flaky(fail_call: usize) -> (FlakyMachine, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let log = FlakyLog {
        inner: Arc::clone(&backend),
        calls: AtomicUsize::new(0),
        fail_call,
    };
    let machine = SyncStateMachine::new(
        EngineConfig::default(),
        Arc::new(InMemoryStateStore::new()),
        Arc::new(log),
        Arc::clone(&backend),
    );
    (machine, backend)
}

#[test]
fn change_log_failure_before_import_touches_nothing() {
    let (machine, backend) = flaky(1);
    machine.process("D1", &request("0", Vec::new()), &Unfiltered).unwrap();

    let err = machine
        .process("D1", &request("1", vec![add("cli-1")]), &Unfiltered)
        .unwrap_err();
    assert!(matches!(err, EngineError::ChangeLog(_)));
    assert!(err.is_retryable());
    assert_eq!(backend.item_count("C1"), 0);

    let out = machine
        .process("D1", &request("1", vec![add("cli-1")]), &Unfiltered)
        .unwrap();
    let c = &out.response.collections[0];
    assert_eq!(c.sync_key, "2");
    assert_eq!(c.replies[0].status, SyncStatus::Success.code());
    assert_eq!(backend.item_count("C1"), 1);
}

#[test]
fn retried_add_is_imported_once() {
    let (machine, backend) = flaky(2);
    machine.process("D1", &request("0", Vec::new()), &Unfiltered).unwrap();

    let err = machine
        .process("D1", &request("1", vec![add("cli-1")]), &Unfiltered)
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(backend.item_count("C1"), 1);
    let stored = machine.store().get("D1", "C1").unwrap().unwrap();
    assert_eq!(stored.current_key, SyncKey::counter(1));
    assert!(!stored.is_in_progress());

    let out = machine
        .process("D1", &request("1", vec![add("cli-1")]), &Unfiltered)
        .unwrap();
    let c = &out.response.collections[0];
    assert_eq!(c.sync_key, "2");
    assert_eq!(c.replies.len(), 1);
    assert_eq!(c.replies[0].kind, ReplyKind::Add);
    assert_eq!(c.replies[0].status, SyncStatus::Success.code());
    let server_id = c.replies[0].server_id.clone().unwrap();
    assert_eq!(backend.item("C1", &server_id), Some(subject("from device")));
    assert!(c.commands.is_empty());
    assert_eq!(backend.item_count("C1"), 1);
}

#[test]
fn failed_commit_keeps_key_and_retry_replays_turn() {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(FailingCommits::default());
    let machine = SyncStateMachine::new(
        EngineConfig::default(),
        Arc::clone(&store),
        Arc::clone(&backend),
        Arc::clone(&backend),
    );
    machine.process("D1", &request("0", Vec::new()), &Unfiltered).unwrap();
    backend.add("C1", "m1", subject("one"));

    store.fail.store(true, Ordering::SeqCst);
    let err = machine
        .process("D1", &request("1", vec![add("cli-1")]), &Unfiltered)
        .unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));
    assert!(!err.is_retryable());

    let stored = store.get("D1", "C1").unwrap().unwrap();
    assert_eq!(stored.current_key, SyncKey::counter(1));
    assert_eq!(stored.previous_key, None);
    assert_eq!(stored.version_counter, 1);
    assert!(!stored.is_in_progress());
    assert!(stored.pending_changes.is_empty());

    store.fail.store(false, Ordering::SeqCst);
    let out: SyncOutput = machine
        .process("D1", &request("1", vec![add("cli-1")]), &Unfiltered)
        .unwrap();
    let c = &out.response.collections[0];
    assert_eq!(c.sync_key, "2");
    let ids: Vec<&str> = c.commands.iter().map(|op| op.item_id.as_str()).collect();
    assert_eq!(ids, vec!["m1"]);
    assert_eq!(backend.item_count("C1"), 2);

    let resend = machine
        .process("D1", &request("1", vec![add("cli-1")]), &Unfiltered)
        .unwrap();
    assert_eq!(resend.body, out.body);
    assert_eq!(backend.item_count("C1"), 2);
}

#[test]
fn encoding_failure_leaves_turn_in_progress() {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(InMemoryStateStore::new());
    let machine = SyncStateMachine::new(
        EngineConfig::new().with_stale_timeout(Duration::ZERO),
        Arc::clone(&store),
        Arc::clone(&backend),
        Arc::clone(&backend),
    );
    machine.process("D1", &request("0", Vec::new()), &Unfiltered).unwrap();
    backend.add("C1", "bad", vec![WbxmlEvent::Text(b"nul\0inside".to_vec())]);

    let err = machine
        .process("D1", &request("1", Vec::new()), &Unfiltered)
        .unwrap_err();
    assert!(matches!(err, EngineError::Wbxml(_)));
    let stored = store.get("D1", "C1").unwrap().unwrap();
    assert!(stored.is_in_progress());
    assert_eq!(stored.current_key, SyncKey::counter(1));

    let err = machine
        .process("D1", &request("1", Vec::new()), &Unfiltered)
        .unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));

    assert_eq!(machine.reset_stale().unwrap(), 1);
    backend.delete("C1", "bad");
    let out = machine
        .process("D1", &request("1", Vec::new()), &Unfiltered)
        .unwrap();
    let c = &out.response.collections[0];
    assert_eq!(c.sync_key, "1");
    assert!(c.commands.is_empty());
}

#[test]
fn repeated_collection_is_rejected_before_any_turn() {
    let backend = Arc::new(MemoryBackend::new());
    let machine = SyncStateMachine::new(
        EngineConfig::default(),
        Arc::new(InMemoryStateStore::new()),
        Arc::clone(&backend),
        backend,
    );
    let mut twice = request("0", Vec::new());
    twice.collections.push(twice.collections[0].clone());

    for _ in 0..2 {
        let err = machine.process("D1", &twice, &Unfiltered).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }
    assert!(machine.store().get("D1", "C1").unwrap().is_none());
}

mod conflicts {
    use super::*;

    type Machine = SyncStateMachine<InMemoryStateStore, MemoryBackend, MemoryBackend>;

    /// Item `a` delivered, then changed upstream.
    fn diverged() -> (Machine, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let machine = SyncStateMachine::new(
            EngineConfig::default(),
            Arc::new(InMemoryStateStore::new()),
            Arc::clone(&backend),
            Arc::clone(&backend),
        );
        backend.add("C1", "a", subject("original"));
        machine.process("D1", &request("0", Vec::new()), &Unfiltered).unwrap();
        backend.change("C1", "a", subject("server edit"));
        (machine, backend)
    }

    fn with_conflict(mut request: SyncRequest, conflict: Option<u32>) -> SyncRequest {
        request.collections[0].options = CollectionOptions {
            conflict,
            ..CollectionOptions::default()
        };
        request
    }

    fn change_a() -> ClientCommand {
        ClientCommand::Change {
            server_id: "a".into(),
            data: subject("device edit"),
        }
    }

    #[test]
    fn server_wins_by_default() {
        let (machine, backend) = diverged();
        let out = machine
            .process("D1", &request("1", vec![change_a()]), &Unfiltered)
            .unwrap();
        let c = &out.response.collections[0];
        assert_eq!(c.replies.len(), 1);
        assert_eq!(c.replies[0].kind, ReplyKind::Change);
        assert_eq!(c.replies[0].status, SyncStatus::Conflict.code());
        assert_eq!(c.commands.len(), 1);
        assert_eq!(c.commands[0].kind, ChangeKind::Change);
        assert_eq!(c.commands[0].payload, Some(subject("server edit")));
        assert_eq!(backend.item("C1", "a"), Some(subject("server edit")));
    }

    #[test]
    fn client_wins_when_asked() {
        let (machine, backend) = diverged();
        let req = with_conflict(request("1", vec![change_a()]), Some(0));
        let out = machine.process("D1", &req, &Unfiltered).unwrap();
        let c = &out.response.collections[0];
        assert!(c.replies.is_empty());
        assert!(c.commands.is_empty());
        assert_eq!(backend.item("C1", "a"), Some(subject("device edit")));
    }

    #[test]
    fn deleted_on_device_changed_on_server_is_resent() {
        let (machine, backend) = diverged();
        let req = with_conflict(
            request("1", vec![ClientCommand::Delete { server_id: "a".into() }]),
            Some(1),
        );
        let out = machine.process("D1", &req, &Unfiltered).unwrap();
        let c = &out.response.collections[0];
        assert_eq!(c.replies[0].kind, ReplyKind::Delete);
        assert_eq!(c.replies[0].status, SyncStatus::Conflict.code());
        assert_eq!(c.commands.len(), 1);
        assert_eq!(c.commands[0].kind, ChangeKind::Add);
        assert_eq!(c.commands[0].payload, Some(subject("server edit")));
        assert_eq!(backend.item_count("C1"), 1);
    }

    #[test]
    fn delete_on_both_sides_is_quiet() {
        let (machine, backend) = diverged();
        backend.delete("C1", "a");
        let out = machine
            .process(
                "D1",
                &request("1", vec![ClientCommand::Delete { server_id: "a".into() }]),
                &Unfiltered,
            )
            .unwrap();
        let c = &out.response.collections[0];
        assert!(c.replies.is_empty());
        assert!(c.commands.is_empty());
        assert_eq!(c.sync_key, "2");
    }
}
