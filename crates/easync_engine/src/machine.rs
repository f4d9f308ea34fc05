//! The per-collection sync state machine.
//!
//! A collection moves `Uninitialized -> Synced(key) -> InProgress(key,
//! pending) -> Synced(pending)`. A resend of the previous key loops on
//! `Synced(key)` and replays the stored turn.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use easync_protocol::{
    ClientCommand, CollectionRequest, CollectionResponse, ConflictResolution, ResponseFilter,
    SyncRequest, SyncResponse, SyncStatus,
};
use easync_state::{
    ChangeKind, ChangeOp, ClientReply, ReplyKind, StateStore, SyncKey, SyncState, TurnRecord,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::source::{ChangeImporter, ChangeLog, SourceError};

/// How a presented key relates to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    /// `"0"`: start over with a full snapshot.
    Initial,
    /// The current key: compute the next turn.
    Current,
    /// The previous key: the client lost the last response.
    Previous,
    /// Anything else.
    Invalid,
}

impl Presented {
    /// Classify `presented` against the stored record.
    pub fn classify(state: Option<&SyncState>, presented: &SyncKey) -> Self {
        if presented.is_initial() {
            return Presented::Initial;
        }
        match state {
            Some(s) if s.current_key == *presented => Presented::Current,
            Some(s) if s.previous_key.as_ref() == Some(presented) => Presented::Previous,
            _ => Presented::Invalid,
        }
    }
}

/// Statistics about processed turns.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Turns that advanced a key.
    pub turns_committed: u64,
    /// Turns released without advancing.
    pub noop_turns: u64,
    /// Replayed responses.
    pub resends: u64,
    /// Collections answered with status 3.
    pub invalid_keys: u64,
    /// Requests refused because a turn was in progress.
    pub conflicts: u64,
    /// Server changes delivered.
    pub changes_sent: u64,
    /// Client commands applied.
    pub commands_imported: u64,
}

/// A processed request.
#[derive(Debug, Clone)]
pub struct SyncOutput {
    /// Structured response.
    pub response: SyncResponse,
    /// Encoded response body.
    pub body: Vec<u8>,
}

/// What to do with a collection's record once the body is encoded.
#[derive(Debug)]
enum Settle {
    Nothing,
    Release,
    Commit(SyncState),
}

struct Turn<'r> {
    request: &'r CollectionRequest,
    begun: SyncState,
    initial: bool,
}

enum Slot<'r> {
    Ready(CollectionResponse),
    Begun(Turn<'r>),
}

/// Client commands of one collection, applied against the server changes
/// still waiting for the device.
struct Import<'a> {
    device_id: &'a str,
    collection_id: &'a str,
    resolution: ConflictResolution,
    queue: &'a mut Vec<ChangeOp>,
    touched: &'a mut HashSet<String>,
}

impl Import<'_> {
    fn queued(&self, item_id: &str) -> Option<ChangeKind> {
        self.queue
            .iter()
            .find(|op| op.item_id == item_id)
            .map(|op| op.kind)
    }

    /// The server holds a conflicting change and wins.
    fn server_wins(&self, item_id: &str, conflicting: impl Fn(ChangeKind) -> bool) -> bool {
        self.resolution == ConflictResolution::ServerWins
            && self.queued(item_id).is_some_and(conflicting)
    }

    /// The device dropped an item the server kept: send it again in full.
    fn restore(&mut self, item_id: &str) {
        for op in self.queue.iter_mut().filter(|op| op.item_id == item_id) {
            op.kind = ChangeKind::Add;
        }
    }

    fn conflict(&self, kind: ReplyKind, server_id: &str) -> ClientReply {
        debug!(
            device_id = %self.device_id,
            collection_id = %self.collection_id,
            %server_id,
            "conflict, server change wins"
        );
        reply(kind, None, Some(server_id.to_string()), SyncStatus::Conflict)
    }
}

/// Runs `Sync` requests against a state store and a backend.
///
/// Each collection of a request opens a turn with
/// [`StateStore::try_begin`]. The turn is committed only after the whole
/// response has been encoded, so the key a client receives is always the
/// key the store holds.
pub struct SyncStateMachine<S: ?Sized, L: ?Sized, I: ?Sized> {
    config: EngineConfig,
    store: Arc<S>,
    changes: Arc<L>,
    importer: Arc<I>,
    stats: RwLock<EngineStats>,
}

impl<S, L, I> SyncStateMachine<S, L, I>
where
    S: StateStore + ?Sized,
    L: ChangeLog + ?Sized,
    I: ChangeImporter + ?Sized,
{
    /// Creates a state machine.
    pub fn new(config: EngineConfig, store: Arc<S>, changes: Arc<L>, importer: Arc<I>) -> Self {
        Self {
            config,
            store,
            changes,
            importer,
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the state store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Clear turns older than the configured stale timeout.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be scanned.
    pub fn reset_stale(&self) -> EngineResult<usize> {
        let reset = self.store.reset_stale(self.config.stale_timeout)?;
        if reset > 0 {
            warn!(reset, "reset stale sync turns");
        }
        Ok(reset)
    }

    /// Parse a WBXML request body and process it.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for a malformed body, otherwise as
    /// [`SyncStateMachine::process`].
    pub fn process_wbxml(
        &self,
        device_id: &str,
        body: &[u8],
        filters: &dyn ResponseFilter,
    ) -> EngineResult<SyncOutput> {
        let request = SyncRequest::from_wbxml(body)?;
        self.process(device_id, &request, filters)
    }

    /// Process a request for one device.
    ///
    /// Collections with an invalid key are answered with status 3 and key
    /// `"0"`; they do not fail the request.
    ///
    /// # Errors
    ///
    /// - `Protocol` if a collection appears twice.
    /// - `StateConflict` if any collection has a turn in progress. No
    ///   collection is advanced.
    /// - `ChangeLog`/`Import` if the backend fails. Begun turns are
    ///   released.
    /// - `Wbxml` if the response cannot be encoded. Begun turns stay in
    ///   progress until the stale reset clears them.
    /// - `Storage` if a commit fails.
    pub fn process(
        &self,
        device_id: &str,
        request: &SyncRequest,
        filters: &dyn ResponseFilter,
    ) -> EngineResult<SyncOutput> {
        request.check_unique_collections()?;
        let mut opened: Vec<&str> = Vec::new();
        let mut slots = Vec::with_capacity(request.collections.len());
        for collection in &request.collections {
            match self.open(device_id, collection) {
                Ok(slot) => {
                    if matches!(slot, Slot::Begun(_)) {
                        opened.push(&collection.collection_id);
                    }
                    slots.push(slot);
                }
                Err(e) => {
                    self.release_all(device_id, opened);
                    return Err(e);
                }
            }
        }

        let mut responses = Vec::with_capacity(slots.len());
        let mut settles = Vec::with_capacity(slots.len());
        for slot in slots {
            let planned = match slot {
                Slot::Ready(response) => Ok((response, Settle::Nothing)),
                Slot::Begun(turn) => self.compute(device_id, turn, request.window_size),
            };
            match planned {
                Ok((response, settle)) => {
                    settles.push((response.collection_id.clone(), settle));
                    responses.push(response);
                }
                Err(e) => {
                    self.release_all(device_id, opened);
                    return Err(e);
                }
            }
        }

        let response = SyncResponse {
            status: None,
            collections: responses,
        };
        let body = response.to_wbxml(filters).map_err(|e| {
            warn!(%device_id, error = %e, "response encoding failed, turns left in progress");
            EngineError::from(e)
        })?;

        self.settle(device_id, settles)?;
        Ok(SyncOutput { response, body })
    }

    fn open<'r>(&self, device_id: &str, request: &'r CollectionRequest) -> EngineResult<Slot<'r>> {
        let collection_id = request.collection_id.as_str();
        let Ok(presented) = request.sync_key.parse::<SyncKey>() else {
            return Ok(Slot::Ready(self.invalid(device_id, request)));
        };
        let state = self.store.get(device_id, collection_id)?;

        let (pending, initial) = match (Presented::classify(state.as_ref(), &presented), state) {
            (Presented::Initial, state) => {
                let existing = state.as_ref().map(|s| &s.current_key);
                (SyncKey::after_reset(existing, self.config.key_style), true)
            }
            (Presented::Current, Some(state)) => (state.current_key.increment(), false),
            (Presented::Previous, Some(state)) => {
                return self.replay(device_id, request, state).map(Slot::Ready)
            }
            _ => return Ok(Slot::Ready(self.invalid(device_id, request))),
        };

        let begun = self
            .store
            .try_begin(device_id, collection_id, &presented, pending)
            .map_err(|e| {
                if e.is_conflict() {
                    self.stats.write().conflicts += 1;
                    warn!(%device_id, %collection_id, error = %e, "sync turn refused");
                }
                EngineError::from(e)
            })?;
        debug!(
            %device_id,
            %collection_id,
            presented = %presented,
            initial,
            "sync turn begun"
        );
        Ok(Slot::Begun(Turn {
            request,
            begun,
            initial,
        }))
    }

    fn invalid(&self, device_id: &str, request: &CollectionRequest) -> CollectionResponse {
        let err = EngineError::invalid_key(&request.collection_id, &request.sync_key);
        warn!(%device_id, error = %err, "client must resync");
        self.stats.write().invalid_keys += 1;
        CollectionResponse::status_only(
            request.class.clone(),
            SyncKey::initial().to_string(),
            request.collection_id.clone(),
            SyncStatus::InvalidSyncKey,
        )
    }

    fn replay(
        &self,
        device_id: &str,
        request: &CollectionRequest,
        state: SyncState,
    ) -> EngineResult<CollectionResponse> {
        if state.is_in_progress() {
            self.stats.write().conflicts += 1;
            return Err(EngineError::StateConflict(format!(
                "resend for {device_id}/{} while a turn is in progress",
                request.collection_id
            )));
        }
        debug!(
            %device_id,
            collection_id = %request.collection_id,
            key = %state.current_key,
            "replaying last turn"
        );
        self.stats.write().resends += 1;
        let turn = state.last_turn.unwrap_or_default();
        Ok(CollectionResponse {
            class: request.class.clone(),
            sync_key: state.current_key.to_string(),
            collection_id: request.collection_id.clone(),
            status: SyncStatus::Success,
            replies: turn.replies,
            commands: turn.changes,
            more_available: turn.more_available,
            send_commands: false,
        })
    }

    fn compute(
        &self,
        device_id: &str,
        turn: Turn<'_>,
        request_window: Option<u32>,
    ) -> EngineResult<(CollectionResponse, Settle)> {
        let Turn {
            request,
            begun,
            initial,
        } = turn;
        let collection_id = request.collection_id.as_str();
        let commands: &[ClientCommand] = if initial && !request.commands.is_empty() {
            warn!(%device_id, %collection_id, "ignoring client commands sent with key 0");
            &[]
        } else {
            &request.commands
        };

        let batch = if initial {
            self.changes.full_snapshot(collection_id)
        } else {
            self.changes
                .changes_since(collection_id, begun.last_server_anchor)
        }
        .map_err(|e| EngineError::ChangeLog(e.to_string()))?;
        let mut anchor = batch.anchor;
        let mut queue = if initial {
            batch.ops
        } else {
            coalesce(begun.pending_changes.clone(), batch.ops)
        };

        let mut replies = Vec::new();
        let mut touched = HashSet::new();
        if !commands.is_empty() {
            let mut import = Import {
                device_id,
                collection_id,
                resolution: request.options.conflict_resolution(),
                queue: &mut queue,
                touched: &mut touched,
            };
            for command in commands {
                if let Some(reply) = self.import(&mut import, command)? {
                    replies.push(reply);
                }
            }
            self.stats.write().commands_imported += commands.len() as u64;

            if !touched.is_empty() {
                // Journal entries written by the imports, and anything that
                // raced them.
                let after = self
                    .changes
                    .changes_since(collection_id, anchor)
                    .map_err(|e| EngineError::ChangeLog(e.to_string()))?;
                anchor = after.anchor;
                queue = coalesce(queue, after.ops);
            }
        }
        queue.retain(|op| !touched.contains(&op.item_id));

        let window = if request.wants_changes() {
            self.config
                .effective_window(request.window_size.or(request_window))
        } else {
            0
        };
        let held = queue.split_off(window.min(queue.len()));
        let delivered = queue;
        let more_available = request.wants_changes() && !held.is_empty();

        if !initial && request.commands.is_empty() && delivered.is_empty() && !more_available {
            debug!(%device_id, %collection_id, "nothing to send, keeping key");
            let response = CollectionResponse {
                class: request.class.clone(),
                sync_key: begun.current_key.to_string(),
                collection_id: request.collection_id.clone(),
                status: SyncStatus::Success,
                replies: Vec::new(),
                commands: Vec::new(),
                more_available: false,
                send_commands: false,
            };
            return Ok((response, Settle::Release));
        }

        let record = TurnRecord {
            changes: delivered.clone(),
            replies: replies.clone(),
            more_available,
        };
        let mut next = begun
            .advanced(anchor, held, record)
            .ok_or_else(|| EngineError::StateConflict("begun turn has no pending key".into()))?;
        if initial {
            next.previous_key = None;
        }

        debug!(
            %device_id,
            %collection_id,
            key = %next.current_key,
            delivered = delivered.len(),
            held = next.pending_changes.len(),
            replies = replies.len(),
            "sync turn computed"
        );
        let response = CollectionResponse {
            class: request.class.clone(),
            sync_key: next.current_key.to_string(),
            collection_id: request.collection_id.clone(),
            status: SyncStatus::Success,
            replies,
            commands: delivered,
            more_available,
            send_commands: false,
        };
        Ok((response, Settle::Commit(next)))
    }

    fn import(
        &self,
        at: &mut Import<'_>,
        command: &ClientCommand,
    ) -> EngineResult<Option<ClientReply>> {
        let collection_id = at.collection_id;
        match command {
            ClientCommand::Add {
                client_id, data, ..
            } => {
                let known = self
                    .importer
                    .find_client_add(at.device_id, collection_id, client_id);
                let imported = match known {
                    Ok(Some(server_id)) => {
                        debug!(
                            device_id = %at.device_id,
                            %collection_id,
                            %client_id,
                            %server_id,
                            "client add already imported"
                        );
                        Ok(server_id)
                    }
                    Ok(None) => {
                        self.importer
                            .import_add(at.device_id, collection_id, client_id, data)
                    }
                    Err(e) => Err(e),
                };
                let client_id = Some(client_id.clone());
                match imported {
                    Ok(server_id) => {
                        at.touched.insert(server_id.clone());
                        let status = SyncStatus::Success;
                        Ok(Some(reply(ReplyKind::Add, client_id, Some(server_id), status)))
                    }
                    Err(e) => Ok(Some(reply(ReplyKind::Add, client_id, None, item_status(e)?))),
                }
            }
            ClientCommand::Change { server_id, data } => {
                if at.server_wins(server_id, |kind| kind != ChangeKind::Add) {
                    return Ok(Some(at.conflict(ReplyKind::Change, server_id)));
                }
                match self.importer.import_change(collection_id, server_id, data) {
                    Ok(()) => {
                        at.touched.insert(server_id.clone());
                        Ok(None)
                    }
                    Err(e) => {
                        let status = item_status(e)?;
                        Ok(Some(reply(ReplyKind::Change, None, Some(server_id.clone()), status)))
                    }
                }
            }
            ClientCommand::Delete { server_id } => {
                if at.queued(server_id).is_some_and(ChangeKind::is_delete) {
                    at.touched.insert(server_id.clone());
                    return Ok(None);
                }
                if at.server_wins(server_id, |kind| kind == ChangeKind::Change) {
                    at.restore(server_id);
                    return Ok(Some(at.conflict(ReplyKind::Delete, server_id)));
                }
                match self.importer.import_delete(collection_id, server_id) {
                    Ok(()) => {
                        at.touched.insert(server_id.clone());
                        Ok(None)
                    }
                    Err(e) => {
                        let status = item_status(e)?;
                        Ok(Some(reply(ReplyKind::Delete, None, Some(server_id.clone()), status)))
                    }
                }
            }
            ClientCommand::Fetch { server_id } => {
                let (status, data) = match self.importer.fetch(collection_id, server_id) {
                    Ok(Some(data)) => (SyncStatus::Success, Some(data)),
                    Ok(None) => (SyncStatus::ObjectNotFound, None),
                    Err(e) => (item_status(e)?, None),
                };
                Ok(Some(ClientReply {
                    data,
                    ..reply(ReplyKind::Fetch, None, Some(server_id.clone()), status)
                }))
            }
        }
    }

    fn settle(&self, device_id: &str, settles: Vec<(String, Settle)>) -> EngineResult<()> {
        let mut remaining = settles.into_iter();
        while let Some((collection_id, settle)) = remaining.next() {
            let result = match settle {
                Settle::Nothing => Ok(()),
                Settle::Release => {
                    self.stats.write().noop_turns += 1;
                    self.store.release(device_id, &collection_id)
                }
                Settle::Commit(state) => {
                    let delivered = state.last_turn.as_ref().map_or(0, |t| t.changes.len());
                    self.store.commit(device_id, &collection_id, state).map(|()| {
                        let mut stats = self.stats.write();
                        stats.turns_committed += 1;
                        stats.changes_sent += delivered as u64;
                    })
                }
            };
            if let Err(e) = result {
                warn!(%device_id, %collection_id, error = %e, "commit failed, releasing turns");
                let rest = remaining.filter(|(_, s)| !matches!(s, Settle::Nothing));
                let unsettled = std::iter::once(collection_id).chain(rest.map(|(c, _)| c));
                self.release_all(device_id, unsettled);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn release_all<C>(&self, device_id: &str, collections: impl IntoIterator<Item = C>)
    where
        C: AsRef<str>,
    {
        for collection_id in collections {
            let collection_id = collection_id.as_ref();
            if let Err(e) = self.store.release(device_id, collection_id) {
                warn!(%device_id, %collection_id, error = %e, "release failed");
            }
        }
    }
}

fn reply(
    kind: ReplyKind,
    client_id: Option<String>,
    server_id: Option<String>,
    status: SyncStatus,
) -> ClientReply {
    ClientReply {
        kind,
        client_id,
        server_id,
        status: status.code(),
        data: None,
    }
}

/// Map a per-item backend error to an AirSync status. `Unavailable`
/// aborts the turn.
fn item_status(err: SourceError) -> EngineResult<SyncStatus> {
    match err {
        SourceError::NotFound(_) => Ok(SyncStatus::ObjectNotFound),
        SourceError::Rejected(_) => Ok(SyncStatus::ConversionError),
        SourceError::Unavailable(message) => Err(EngineError::Import(message)),
    }
}

/// Append `newer` to `older`, folding operations on the same item into one.
///
/// The folded operation keeps the position of the first one. An `Add`
/// stays an `Add` when the item changes again and disappears when the item
/// is deleted before delivery.
pub fn coalesce(older: Vec<ChangeOp>, newer: Vec<ChangeOp>) -> Vec<ChangeOp> {
    let mut slots: Vec<Option<ChangeOp>> = Vec::with_capacity(older.len() + newer.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for op in older.into_iter().chain(newer) {
        let Some(at) = index.get(&op.item_id).copied() else {
            index.insert(op.item_id.clone(), slots.len());
            slots.push(Some(op));
            continue;
        };
        let undelivered_add = slots[at]
            .as_ref()
            .is_some_and(|prev| prev.kind == ChangeKind::Add);
        slots[at] = match op.kind {
            ChangeKind::Add | ChangeKind::Change if undelivered_add => Some(ChangeOp {
                kind: ChangeKind::Add,
                ..op
            }),
            ChangeKind::Delete | ChangeKind::SoftDelete if undelivered_add => {
                index.remove(&op.item_id);
                None
            }
            _ => Some(op),
        };
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryBackend;
    use easync_protocol::Unfiltered;
    use easync_state::InMemoryStateStore;
    use easync_wbxml::WbxmlEvent;

    type Machine = SyncStateMachine<InMemoryStateStore, MemoryBackend, MemoryBackend>;

    fn machine(config: EngineConfig) -> (Machine, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let machine = SyncStateMachine::new(
            config,
            Arc::new(InMemoryStateStore::new()),
            Arc::clone(&backend),
            Arc::clone(&backend),
        );
        (machine, backend)
    }

    fn payload(text: &str) -> Vec<WbxmlEvent> {
        vec![
            WbxmlEvent::start(2, 0x14),
            WbxmlEvent::text(text),
            WbxmlEvent::EndTag,
        ]
    }

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

    fn run(machine: &Machine, request: &SyncRequest) -> CollectionResponse {
        let output = machine.process("dev", request, &Unfiltered).unwrap();
        output.response.collections.into_iter().next().unwrap()
    }

    #[test]
    fn classify_keys() {
        let mut state = SyncState::new("dev", "inbox");
        state.current_key = SyncKey::counter(4);
        state.previous_key = Some(SyncKey::counter(3));

        let classify = |key: u64| Presented::classify(Some(&state), &SyncKey::counter(key));
        assert_eq!(classify(0), Presented::Initial);
        assert_eq!(classify(4), Presented::Current);
        assert_eq!(classify(3), Presented::Previous);
        assert_eq!(classify(2), Presented::Invalid);
        assert_eq!(classify(5), Presented::Invalid);
        assert_eq!(
            Presented::classify(None, &SyncKey::counter(1)),
            Presented::Invalid
        );
    }

    #[test]
    fn coalesce_folds_per_item() {
        let older = vec![
            ChangeOp::add("a", payload("a1")),
            ChangeOp::change("b", payload("b1")),
            ChangeOp::add("c", payload("c1")),
        ];
        let newer = vec![
            ChangeOp::change("a", payload("a2")),
            ChangeOp::delete("b"),
            ChangeOp::delete("c"),
            ChangeOp::add("d", payload("d1")),
        ];
        assert_eq!(
            coalesce(older, newer),
            vec![
                ChangeOp::add("a", payload("a2")),
                ChangeOp::delete("b"),
                ChangeOp::add("d", payload("d1")),
            ]
        );
    }

    #[test]
    fn coalesce_restarts_after_dropped_add() {
        let ops = coalesce(
            Vec::new(),
            vec![
                ChangeOp::add("a", payload("1")),
                ChangeOp::delete("a"),
                ChangeOp::add("a", payload("2")),
            ],
        );
        assert_eq!(ops, vec![ChangeOp::add("a", payload("2"))]);
    }

    #[test]
    fn initial_turn_sends_snapshot() {
        let (machine, backend) = machine(EngineConfig::default());
        backend.add("inbox", "m1", payload("one"));
        backend.add("inbox", "m2", payload("two"));

        let c = run(&machine, &request("0"));
        assert_eq!(c.sync_key, "1");
        assert_eq!(c.status, SyncStatus::Success);
        assert_eq!(c.commands.len(), 2);

        let stored = machine.store().get("dev", "inbox").unwrap().unwrap();
        assert_eq!(stored.current_key, SyncKey::counter(1));
        assert_eq!(stored.previous_key, None);
        assert!(!stored.is_in_progress());
        assert_eq!(stored.last_server_anchor, 2);
    }

    #[test]
    fn noop_turn_keeps_key() {
        let (machine, _backend) = machine(EngineConfig::default());
        run(&machine, &request("0"));

        let c = run(&machine, &request("1"));
        assert_eq!(c.sync_key, "1");
        assert!(c.commands.is_empty());
        let stored = machine.store().get("dev", "inbox").unwrap().unwrap();
        assert_eq!(stored.version_counter, 1);
        assert!(!stored.is_in_progress());
        assert_eq!(machine.stats().noop_turns, 1);
    }

    #[test]
    fn invalid_key_is_status_three() {
        let (machine, _backend) = machine(EngineConfig::default());
        let c = run(&machine, &request("5"));
        assert_eq!(c.status, SyncStatus::InvalidSyncKey);
        assert_eq!(c.sync_key, "0");
        assert!(machine.store().get("dev", "inbox").unwrap().is_none());

        let c = run(&machine, &request("not a key"));
        assert_eq!(c.status, SyncStatus::InvalidSyncKey);
        assert_eq!(machine.stats().invalid_keys, 2);
    }

    #[test]
    fn changelog_failure_releases_turn() {
        let (machine, backend) = machine(EngineConfig::default());
        run(&machine, &request("0"));
        backend.set_unavailable(true);
        let err = machine.process("dev", &request("1"), &Unfiltered).unwrap_err();
        assert!(matches!(err, EngineError::ChangeLog(_)));
        assert!(err.is_retryable());

        let stored = machine.store().get("dev", "inbox").unwrap().unwrap();
        assert!(!stored.is_in_progress());
        assert_eq!(stored.current_key, SyncKey::counter(1));
    }

    #[test]
    fn resend_during_turn_conflicts() {
        let (machine, backend) = machine(EngineConfig::default());
        run(&machine, &request("0"));
        backend.add("inbox", "m1", payload("one"));
        run(&machine, &request("1"));

        machine
            .store()
            .try_begin("dev", "inbox", &SyncKey::counter(2), SyncKey::counter(3))
            .unwrap();
        let err = machine.process("dev", &request("1"), &Unfiltered).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
        let err = machine.process("dev", &request("2"), &Unfiltered).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
        assert_eq!(machine.stats().conflicts, 2);
    }
}
