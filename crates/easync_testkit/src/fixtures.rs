//! Test fixtures, request builders and response inspection.
//!
//! Fixtures wire a state machine or a server to a [`MemoryBackend`] and
//! either store. The store is held as `dyn StateStore` so tests can run
//! the same scenario against both.

use std::path::PathBuf;
use std::sync::Arc;

use easync_engine::{EngineConfig, MemoryBackend, SyncStateMachine};
use easync_server::{ServerConfig, SyncServer, TransportRequest, TransportResponse};
use easync_state::{FileStateStore, InMemoryStateStore, StateStore};
use easync_wbxml::codepage::{airsync, airsync_base, page};
use easync_wbxml::{decode_all, encode, push_text_element, WbxmlEvent};
use tempfile::TempDir;

/// State machine type used by the fixtures.
pub type TestMachine = SyncStateMachine<dyn StateStore, MemoryBackend, MemoryBackend>;

/// Server type used by the fixtures.
pub type TestServer = SyncServer<dyn StateStore, MemoryBackend, MemoryBackend>;

fn memory_store() -> Arc<dyn StateStore> {
    Arc::new(InMemoryStateStore::new())
}

fn file_store() -> (Arc<dyn StateStore>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = FileStateStore::open(temp_dir.path()).expect("Failed to open file store");
    (Arc::new(store), temp_dir)
}

/// A state machine with its backend and automatic cleanup.
pub struct MachineFixture {
    /// The state machine.
    pub machine: TestMachine,
    /// Change log and importer behind the machine.
    pub backend: Arc<MemoryBackend>,
    _temp_dir: Option<TempDir>,
}

impl MachineFixture {
    /// Machine over an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with(EngineConfig::default())
    }

    /// Machine over an in-memory store with a custom configuration.
    pub fn memory_with(config: EngineConfig) -> Self {
        Self::build(config, memory_store(), None)
    }

    /// Machine over a file store in a temporary directory.
    pub fn file() -> Self {
        let (store, temp_dir) = file_store();
        Self::build(EngineConfig::default(), store, Some(temp_dir))
    }

    fn build(config: EngineConfig, store: Arc<dyn StateStore>, temp_dir: Option<TempDir>) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let machine =
            SyncStateMachine::new(config, store, Arc::clone(&backend), Arc::clone(&backend));
        Self {
            machine,
            backend,
            _temp_dir: temp_dir,
        }
    }

    /// Directory of the file store, if file-based.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }
}

/// A server with its backend and automatic cleanup.
pub struct ServerFixture {
    /// The server.
    pub server: Arc<TestServer>,
    /// Change log and importer behind the server.
    pub backend: Arc<MemoryBackend>,
    _temp_dir: Option<TempDir>,
}

impl ServerFixture {
    /// Server over an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with(ServerConfig::default())
    }

    /// Server over an in-memory store with a custom configuration.
    pub fn memory_with(config: ServerConfig) -> Self {
        Self::build(config, memory_store(), None)
    }

    /// Server over a file store in a temporary directory.
    pub fn file() -> Self {
        let (store, temp_dir) = file_store();
        Self::build(ServerConfig::default(), store, Some(temp_dir))
    }

    fn build(config: ServerConfig, store: Arc<dyn StateStore>, temp_dir: Option<TempDir>) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let server = SyncServer::new(config, store, Arc::clone(&backend), Arc::clone(&backend));
        Self {
            server: Arc::new(server),
            backend,
            _temp_dir: temp_dir,
        }
    }

    /// Send one request body for a device.
    pub fn post(&self, device_id: &str, body: Vec<u8>) -> TransportResponse {
        self.server.handle(&TransportRequest::new(device_id, body))
    }

    /// Add `count` items named `item-<n>` to a collection.
    pub fn seed(&self, collection_id: &str, count: usize) {
        seed(&self.backend, collection_id, count);
    }
}

/// Add `count` items named `item-<n>` to a collection.
pub fn seed(backend: &MemoryBackend, collection_id: &str, count: usize) {
    for i in 0..count {
        let id = format!("item-{i}");
        backend.add(collection_id, &id, email_payload(&id, "body"));
    }
}

/// An `Email` item payload: subject plus a plain text body.
pub fn email_payload(subject: &str, body: &str) -> Vec<WbxmlEvent> {
    let mut events = Vec::new();
    push_text_element(&mut events, page::EMAIL, 0x14, subject);
    events.push(WbxmlEvent::start(page::AIRSYNC_BASE, airsync_base::BODY));
    push_text_element(&mut events, page::AIRSYNC_BASE, airsync_base::TYPE, "1");
    push_text_element(&mut events, page::AIRSYNC_BASE, airsync_base::DATA, body);
    events.push(WbxmlEvent::EndTag);
    events
}

#[derive(Debug, Clone, Default)]
struct CollectionDraft {
    children: Vec<WbxmlEvent>,
    commands: Vec<WbxmlEvent>,
}

/// Builds `AirSync:Sync` request documents.
///
/// Commands and options apply to the most recently added collection.
#[derive(Debug, Clone, Default)]
pub struct SyncRequestBuilder {
    collections: Vec<CollectionDraft>,
    window_size: Option<u32>,
}

impl SyncRequestBuilder {
    /// Empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collection with a sync key.
    #[must_use]
    pub fn collection(mut self, sync_key: &str, collection_id: &str) -> Self {
        let mut children = Vec::new();
        push_text_element(&mut children, page::AIRSYNC, airsync::SYNC_KEY, sync_key);
        push_text_element(&mut children, page::AIRSYNC, airsync::COLLECTION_ID, collection_id);
        self.collections.push(CollectionDraft {
            children,
            commands: Vec::new(),
        });
        self
    }

    /// Sets `GetChanges`.
    #[must_use]
    pub fn get_changes(self, get: bool) -> Self {
        self.child(airsync::GET_CHANGES, if get { "1" } else { "0" })
    }

    /// Sets the collection `WindowSize`.
    #[must_use]
    pub fn window_size(self, size: u32) -> Self {
        self.child(airsync::WINDOW_SIZE, &size.to_string())
    }

    /// Sets the request-level `WindowSize`.
    #[must_use]
    pub fn global_window_size(mut self, size: u32) -> Self {
        self.window_size = Some(size);
        self
    }

    /// Adds a `BodyPreference` option.
    #[must_use]
    pub fn body_preference(mut self, body_type: u32, truncation_size: Option<u32>) -> Self {
        if let Some(draft) = self.collections.last_mut() {
            let events = &mut draft.children;
            let base = page::AIRSYNC_BASE;
            events.push(WbxmlEvent::start(page::AIRSYNC, airsync::OPTIONS));
            events.push(WbxmlEvent::start(base, airsync_base::BODY_PREFERENCE));
            push_text_element(events, base, airsync_base::TYPE, &body_type.to_string());
            if let Some(size) = truncation_size {
                let size = size.to_string();
                push_text_element(events, base, airsync_base::TRUNCATION_SIZE, &size);
            }
            events.extend([WbxmlEvent::EndTag, WbxmlEvent::EndTag]);
        }
        self
    }

    /// Adds a client `Add`.
    #[must_use]
    pub fn add(self, client_id: &str, data: Vec<WbxmlEvent>) -> Self {
        self.command(airsync::ADD, airsync::CLIENT_ID, client_id, Some(data))
    }

    /// Adds a client `Change`.
    #[must_use]
    pub fn change(self, server_id: &str, data: Vec<WbxmlEvent>) -> Self {
        self.command(airsync::CHANGE, airsync::SERVER_ID, server_id, Some(data))
    }

    /// Adds a client `Delete`.
    #[must_use]
    pub fn delete(self, server_id: &str) -> Self {
        self.command(airsync::DELETE, airsync::SERVER_ID, server_id, None)
    }

    /// Adds a client `Fetch`.
    #[must_use]
    pub fn fetch(self, server_id: &str) -> Self {
        self.command(airsync::FETCH, airsync::SERVER_ID, server_id, None)
    }

    fn child(mut self, token: u8, text: &str) -> Self {
        if let Some(draft) = self.collections.last_mut() {
            push_text_element(&mut draft.children, page::AIRSYNC, token, text);
        }
        self
    }

    fn command(mut self, kind: u8, id_token: u8, id: &str, data: Option<Vec<WbxmlEvent>>) -> Self {
        if let Some(draft) = self.collections.last_mut() {
            let events = &mut draft.commands;
            events.push(WbxmlEvent::start(page::AIRSYNC, kind));
            push_text_element(events, page::AIRSYNC, id_token, id);
            if let Some(data) = data {
                events.push(WbxmlEvent::start(page::AIRSYNC, airsync::APPLICATION_DATA));
                events.extend(data);
                events.push(WbxmlEvent::EndTag);
            }
            events.push(WbxmlEvent::EndTag);
        }
        self
    }

    /// The request as an event sequence.
    pub fn events(&self) -> Vec<WbxmlEvent> {
        let mut events = vec![
            WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
            WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTIONS),
        ];
        for draft in &self.collections {
            events.push(WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTION));
            events.extend(draft.children.iter().cloned());
            if !draft.commands.is_empty() {
                events.push(WbxmlEvent::start(page::AIRSYNC, airsync::COMMANDS));
                events.extend(draft.commands.iter().cloned());
                events.push(WbxmlEvent::EndTag);
            }
            events.push(WbxmlEvent::EndTag);
        }
        events.push(WbxmlEvent::EndTag);
        if let Some(size) = self.window_size {
            push_text_element(&mut events, page::AIRSYNC, airsync::WINDOW_SIZE, &size.to_string());
        }
        events.push(WbxmlEvent::EndTag);
        events
    }

    /// The request as a WBXML document.
    pub fn build(&self) -> Vec<u8> {
        encode(&self.events(), page::AIRSYNC).expect("Failed to encode request")
    }
}

/// One collection of a decoded `Sync` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionView {
    /// `SyncKey` text.
    pub sync_key: String,
    /// `CollectionId` text.
    pub collection_id: String,
    /// `Status` value.
    pub status: u16,
    /// `MoreAvailable` was present.
    pub more_available: bool,
    /// Server ids of `Commands/Add`, in order.
    pub adds: Vec<String>,
    /// Server ids of `Commands/Change`.
    pub changes: Vec<String>,
    /// Server ids of `Commands/Delete` and `Commands/SoftDelete`.
    pub deletes: Vec<String>,
    /// `(ClientId, ServerId, Status)` of each reply under `Responses`.
    pub replies: Vec<(Option<String>, Option<String>, u16)>,
}

/// A decoded `Sync` response, reduced to what tests assert on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseView {
    /// Request-level `Status`, when present.
    pub status: Option<u16>,
    /// Collections in order.
    pub collections: Vec<CollectionView>,
}

impl ResponseView {
    /// Decode a response body.
    ///
    /// # Panics
    ///
    /// Panics if `body` is not valid WBXML.
    pub fn parse(body: &[u8]) -> Self {
        let events = decode_all(body, page::AIRSYNC).expect("Response is not valid WBXML");
        let mut view = ResponseView::default();
        let mut path: Vec<(u8, u8)> = Vec::new();
        let mut reply = (None, None, 0u16);

        for event in events {
            match event {
                WbxmlEvent::StartTag {
                    codepage,
                    token,
                    has_content,
                    ..
                } => {
                    path.push((codepage, token));
                    if (codepage, token) == (page::AIRSYNC, airsync::COLLECTION)
                        && path.len() == 3
                    {
                        view.collections.push(CollectionView::default());
                    }
                    if (codepage, token) == (page::AIRSYNC, airsync::MORE_AVAILABLE) {
                        if let Some(c) = view.collections.last_mut() {
                            c.more_available = true;
                        }
                    }
                    if !has_content {
                        path.pop();
                    }
                }
                WbxmlEvent::EndTag => {
                    path.pop();
                    let in_responses = path.last() == Some(&(page::AIRSYNC, airsync::RESPONSES));
                    if path.len() == 4 && in_responses {
                        if let Some(c) = view.collections.last_mut() {
                            c.replies.push(std::mem::take(&mut reply));
                        }
                    }
                }
                WbxmlEvent::Text(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    view.apply_text(&path, text, &mut reply);
                }
                _ => {}
            }
        }
        view
    }

    fn apply_text(
        &mut self,
        path: &[(u8, u8)],
        text: String,
        reply: &mut (Option<String>, Option<String>, u16),
    ) {
        let Some(&(_, leaf)) = path.last() else {
            return;
        };
        if path.len() == 2 && leaf == airsync::STATUS {
            self.status = text.parse().ok();
            return;
        }
        let Some(c) = self.collections.last_mut() else {
            return;
        };
        match (path.len(), leaf) {
            (4, airsync::SYNC_KEY) => c.sync_key = text,
            (4, airsync::COLLECTION_ID) => c.collection_id = text,
            (4, airsync::STATUS) => c.status = text.parse().unwrap_or_default(),
            (6, airsync::CLIENT_ID) if parent(&path[..5]) == Some(airsync::RESPONSES) => {
                reply.0 = Some(text);
            }
            (6, airsync::SERVER_ID) if parent(&path[..5]) == Some(airsync::RESPONSES) => {
                reply.1 = Some(text);
            }
            (6, airsync::STATUS) if parent(&path[..5]) == Some(airsync::RESPONSES) => {
                reply.2 = text.parse().unwrap_or_default();
            }
            (6, airsync::SERVER_ID) if parent(&path[..5]) == Some(airsync::COMMANDS) => {
                match path[4].1 {
                    airsync::ADD => c.adds.push(text),
                    airsync::CHANGE => c.changes.push(text),
                    airsync::DELETE | airsync::SOFT_DELETE => c.deletes.push(text),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// The only collection.
    ///
    /// # Panics
    ///
    /// Panics unless the response has exactly one collection.
    pub fn single(&self) -> &CollectionView {
        assert_eq!(self.collections.len(), 1, "expected one collection");
        &self.collections[0]
    }
}

/// Token of the element enclosing the last entry of `path`.
fn parent(path: &[(u8, u8)]) -> Option<u8> {
    path.len().checked_sub(2).map(|i| path[i].1)
}
