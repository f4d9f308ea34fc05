//! End-to-end turns over the wire format and both state stores.

use std::sync::Arc;
use std::thread;

use easync_engine::{EngineConfig, EngineError, MemoryBackend, SyncOutput, SyncStateMachine};
use easync_protocol::{
    ClientCommand, CollectionRequest, CollectionResponse, SyncRequest, SyncStatus, Unfiltered,
};
use easync_state::{
    ChangeKind, FileStateStore, InMemoryStateStore, KeyStyle, ReplyKind, StateStore, SyncKey,
};
use easync_wbxml::codepage::{airsync, page};
use easync_wbxml::{encode, push_text_element, WbxmlEvent};

type Machine<S> = SyncStateMachine<S, MemoryBackend, MemoryBackend>;

fn setup<S: StateStore>(store: S, config: EngineConfig) -> (Machine<S>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let machine = SyncStateMachine::new(
        config,
        Arc::new(store),
        Arc::clone(&backend),
        Arc::clone(&backend),
    );
    (machine, backend)
}

fn subject(text: &str) -> Vec<WbxmlEvent> {
    let mut events = Vec::new();
    push_text_element(&mut events, page::EMAIL, 0x14, text);
    events
}

fn collection(key: &str, id: &str) -> CollectionRequest {
    CollectionRequest {
        class: Some("Email".into()),
        sync_key: key.into(),
        collection_id: id.into(),
        ..CollectionRequest::default()
    }
}

fn request(key: &str) -> SyncRequest {
    SyncRequest {
        collections: vec![collection(key, "C1")],
        ..SyncRequest::default()
    }
}

fn wire_request(key: &str) -> Vec<u8> {
    let mut events = vec![
        WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTIONS),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTION),
    ];
    push_text_element(&mut events, page::AIRSYNC, airsync::SYNC_KEY, key);
    push_text_element(&mut events, page::AIRSYNC, airsync::COLLECTION_ID, "C1");
    events.extend([WbxmlEvent::EndTag, WbxmlEvent::EndTag, WbxmlEvent::EndTag]);
    encode(&events, page::AIRSYNC).unwrap()
}

fn first(output: &SyncOutput) -> &CollectionResponse {
    &output.response.collections[0]
}

fn sync<S: StateStore>(machine: &Machine<S>, request: &SyncRequest) -> SyncOutput {
    machine.process("D1", request, &Unfiltered).unwrap()
}

#[test]
fn three_request_scenario() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    backend.add("C1", "a", subject("a"));
    backend.add("C1", "b", subject("b"));
    backend.add("C1", "c", subject("c"));

    let first_out = machine.process_wbxml("D1", &wire_request("0"), &Unfiltered).unwrap();
    let c = first(&first_out);
    assert_eq!(c.sync_key, "1");
    assert_eq!(c.commands.len(), 3);
    assert!(c.commands.iter().all(|op| op.kind == ChangeKind::Add));

    backend.change("C1", "b", subject("b2"));
    let second = machine.process_wbxml("D1", &wire_request("1"), &Unfiltered).unwrap();
    let c = first(&second);
    assert_eq!(c.sync_key, "2");
    assert_eq!(c.commands.len(), 1);
    assert_eq!(c.commands[0].kind, ChangeKind::Change);
    assert_eq!(c.commands[0].item_id, "b");

    let stored = machine.store().get("D1", "C1").unwrap().unwrap();
    assert_eq!(stored.current_key, SyncKey::counter(2));
    assert_eq!(stored.previous_key, Some(SyncKey::counter(1)));

    let third = machine.process_wbxml("D1", &wire_request("1"), &Unfiltered).unwrap();
    assert_eq!(third.body, second.body);
    assert_eq!(third.response, second.response);
    assert_eq!(machine.store().get("D1", "C1").unwrap().unwrap(), stored);
}

#[test]
fn repeated_resends_are_identical() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    sync(&machine, &request("0"));
    backend.add("C1", "x", subject("x"));
    let original = sync(&machine, &request("1"));

    backend.add("C1", "y", subject("y"));
    for _ in 0..5 {
        let again = sync(&machine, &request("1"));
        assert_eq!(again.body, original.body);
    }
    assert_eq!(machine.stats().resends, 5);

    let next = sync(&machine, &request("2"));
    assert_eq!(first(&next).commands.len(), 1);
    assert_eq!(first(&next).commands[0].item_id, "y");
}

#[test]
fn keys_older_than_previous_are_invalid() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    sync(&machine, &request("0"));
    for (i, item) in ["p", "q", "r"].iter().enumerate() {
        backend.add("C1", item, subject(item));
        sync(&machine, &request(&(i + 1).to_string()));
    }
    let stored = machine.store().get("D1", "C1").unwrap().unwrap();
    assert_eq!(stored.current_key, SyncKey::counter(4));

    for stale in ["1", "2"] {
        let out = sync(&machine, &request(stale));
        assert_eq!(first(&out).status, SyncStatus::InvalidSyncKey);
        assert_eq!(first(&out).sync_key, "0");
        assert!(first(&out).commands.is_empty());
    }
    assert_eq!(machine.store().get("D1", "C1").unwrap().unwrap(), stored);
}

#[test]
fn window_pages_with_more_available() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    for i in 0..5 {
        backend.add("C1", &format!("m{i}"), subject("m"));
    }
    let mut req = request("0");
    req.collections[0].window_size = Some(2);

    let mut key = "0".to_string();
    let mut seen = Vec::new();
    loop {
        req.collections[0].sync_key = key.clone();
        let out = sync(&machine, &req);
        let c = first(&out);
        assert!(c.commands.len() <= 2);
        seen.extend(c.commands.iter().map(|op| op.item_id.clone()));
        key = c.sync_key.clone();
        if !c.more_available {
            break;
        }
    }
    assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(key, "3");
}

#[test]
fn client_commands_are_imported_and_not_mirrored() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    backend.add("C1", "old", subject("old"));
    sync(&machine, &request("0"));

    backend.add("C1", "upstream", subject("up"));
    let mut req = request("1");
    req.collections[0].commands = vec![
        ClientCommand::Add {
            client_id: "c-1".into(),
            class: None,
            data: subject("from device"),
        },
        ClientCommand::Change {
            server_id: "old".into(),
            data: subject("edited"),
        },
        ClientCommand::Delete {
            server_id: "missing".into(),
        },
        ClientCommand::Fetch {
            server_id: "upstream".into(),
        },
    ];
    let out = sync(&machine, &req);
    let c = first(&out);

    let add = &c.replies[0];
    assert_eq!(add.kind, ReplyKind::Add);
    assert_eq!(add.client_id.as_deref(), Some("c-1"));
    assert_eq!(add.status, 1);
    let server_id = add.server_id.clone().unwrap();
    assert_eq!(backend.item("C1", &server_id), Some(subject("from device")));
    assert_eq!(backend.item("C1", "old"), Some(subject("edited")));

    let delete = &c.replies[1];
    assert_eq!(delete.kind, ReplyKind::Delete);
    assert_eq!(delete.status, SyncStatus::ObjectNotFound.code());

    let fetch = &c.replies[2];
    assert_eq!(fetch.kind, ReplyKind::Fetch);
    assert_eq!(fetch.data, Some(subject("up")));
    assert_eq!(c.replies.len(), 3);

    let ids: Vec<&str> = c.commands.iter().map(|op| op.item_id.as_str()).collect();
    assert_eq!(ids, vec!["upstream"]);

    let after = sync(&machine, &request("2"));
    assert!(first(&after).commands.is_empty());
    assert_eq!(first(&after).sync_key, "2");
}

#[test]
fn conflict_advances_no_collection() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    let both = SyncRequest {
        collections: vec![collection("0", "C1"), collection("0", "C2")],
        ..SyncRequest::default()
    };
    sync(&machine, &both);
    backend.add("C1", "a", subject("a"));
    backend.add("C2", "b", subject("b"));

    machine
        .store()
        .try_begin("D1", "C2", &SyncKey::counter(1), SyncKey::counter(2))
        .unwrap();
    let next = SyncRequest {
        collections: vec![collection("1", "C1"), collection("1", "C2")],
        ..SyncRequest::default()
    };
    let err = machine.process("D1", &next, &Unfiltered).unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));
    assert!(err.is_retryable());

    let c1 = machine.store().get("D1", "C1").unwrap().unwrap();
    assert_eq!(c1.current_key, SyncKey::counter(1));
    assert!(!c1.is_in_progress());

    machine.store().release("D1", "C2").unwrap();
    let out = sync(&machine, &next);
    let keys: Vec<&str> = out
        .response
        .collections
        .iter()
        .map(|c| c.sync_key.as_str())
        .collect();
    assert_eq!(keys, vec!["2", "2"]);
}

#[test]
fn guid_keys() {
    let config = EngineConfig::new().with_key_style(KeyStyle::Guid);
    let (machine, backend) = setup(InMemoryStateStore::new(), config);
    let out = sync(&machine, &request("0"));
    let key: SyncKey = first(&out).sync_key.parse().unwrap();
    assert!(key.guid().is_some());
    assert_eq!(key.counter_value(), 1);

    backend.add("C1", "a", subject("a"));
    let out = sync(&machine, &request(&key.to_string()));
    let next: SyncKey = first(&out).sync_key.parse().unwrap();
    assert_eq!(next.guid(), key.guid());
    assert_eq!(next.counter_value(), 2);

    let reset = sync(&machine, &request("0"));
    let fresh: SyncKey = first(&reset).sync_key.parse().unwrap();
    assert_ne!(fresh.guid(), key.guid());
    let out = sync(&machine, &request(&key.to_string()));
    assert_eq!(first(&out).status, SyncStatus::InvalidSyncKey);
}

#[test]
fn counter_continues_after_reset() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    sync(&machine, &request("0"));
    backend.add("C1", "a", subject("a"));
    sync(&machine, &request("1"));

    let out = sync(&machine, &request("0"));
    assert_eq!(first(&out).sync_key, "3");
    assert_eq!(first(&out).commands.len(), 1);
    let out = sync(&machine, &request("2"));
    assert_eq!(first(&out).status, SyncStatus::InvalidSyncKey);
}

#[test]
fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    backend.add("C1", "a", subject("a"));
    let open = || {
        SyncStateMachine::new(
            EngineConfig::default(),
            Arc::new(FileStateStore::open(dir.path()).unwrap()),
            Arc::clone(&backend),
            Arc::clone(&backend),
        )
    };

    let first_run = open();
    sync(&first_run, &request("0"));
    backend.change("C1", "a", subject("a2"));
    let original = sync(&first_run, &request("1"));
    drop(first_run);

    let second_run = open();
    let replay = sync(&second_run, &request("1"));
    assert_eq!(replay.body, original.body);
}

#[test]
fn racing_devices_commit_once() {
    let (machine, backend) = setup(InMemoryStateStore::new(), EngineConfig::default());
    sync(&machine, &request("0"));
    backend.add("C1", "a", subject("a"));
    let machine = Arc::new(machine);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let machine = Arc::clone(&machine);
            thread::spawn(move || machine.process("D1", &request("1"), &Unfiltered))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for result in &results {
        match result {
            Ok(out) => assert_eq!(first(out).sync_key, "2"),
            Err(e) => assert!(matches!(e, EngineError::StateConflict(_))),
        }
    }
    let stored = machine.store().get("D1", "C1").unwrap().unwrap();
    assert_eq!(stored.version_counter, 2);
    assert_eq!(machine.stats().turns_committed, 2);
}
