//! Per-collection sync state and the records it carries.

use easync_wbxml::WbxmlEvent;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::key::SyncKey;

/// Kind of a server-side change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// New item.
    Add,
    /// Modified item.
    Change,
    /// Removed item.
    Delete,
    /// Item aged out of the client's filter window.
    SoftDelete,
}

impl ChangeKind {
    /// `Delete` or `SoftDelete`.
    pub fn is_delete(self) -> bool {
        matches!(self, ChangeKind::Delete | ChangeKind::SoftDelete)
    }
}

/// One change to deliver to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOp {
    /// What happened.
    pub kind: ChangeKind,
    /// Server id of the item.
    pub item_id: String,
    /// Inner content of `AirSync:ApplicationData`, when the kind carries
    /// data.
    pub payload: Option<Vec<WbxmlEvent>>,
}

impl ChangeOp {
    /// An `Add` with payload.
    pub fn add(item_id: impl Into<String>, payload: Vec<WbxmlEvent>) -> Self {
        Self {
            kind: ChangeKind::Add,
            item_id: item_id.into(),
            payload: Some(payload),
        }
    }

    /// A `Change` with payload.
    pub fn change(item_id: impl Into<String>, payload: Vec<WbxmlEvent>) -> Self {
        Self {
            kind: ChangeKind::Change,
            item_id: item_id.into(),
            payload: Some(payload),
        }
    }

    /// A `Delete`.
    pub fn delete(item_id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            item_id: item_id.into(),
            payload: None,
        }
    }

    /// A `SoftDelete`.
    pub fn soft_delete(item_id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::SoftDelete,
            item_id: item_id.into(),
            payload: None,
        }
    }
}

/// Which client command a reply answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyKind {
    /// `Responses/Add`.
    Add,
    /// `Responses/Change`.
    Change,
    /// `Responses/Delete`.
    Delete,
    /// `Responses/Fetch`.
    Fetch,
}

/// Server answer to one client command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReply {
    /// Command answered.
    pub kind: ReplyKind,
    /// Client-assigned id (adds only).
    pub client_id: Option<String>,
    /// Server id of the item.
    pub server_id: Option<String>,
    /// AirSync status code.
    pub status: u16,
    /// `ApplicationData` content (fetches only).
    pub data: Option<Vec<WbxmlEvent>>,
}

/// Everything returned to the client together with a key, so a resend can
/// be answered identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Server changes delivered.
    pub changes: Vec<ChangeOp>,
    /// Replies to client commands.
    pub replies: Vec<ClientReply>,
    /// Whether `MoreAvailable` was sent.
    pub more_available: bool,
}

impl TurnRecord {
    /// True if the turn carried nothing.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.replies.is_empty() && !self.more_available
    }
}

/// Lifecycle phase of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No turn has ever completed.
    Uninitialized,
    /// Waiting for the next request.
    Synced,
    /// A turn is being computed.
    InProgress,
}

/// Sync state for one `(device, collection)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Owning device.
    pub device_id: String,
    /// Collection (folder) id.
    pub collection_id: String,
    /// Key the client must present next.
    pub current_key: SyncKey,
    /// Key before `current_key`; presenting it replays `last_turn`.
    pub previous_key: Option<SyncKey>,
    /// Key being issued by the turn in progress.
    pub pending_key: Option<SyncKey>,
    /// Unix milliseconds when the running turn began.
    pub in_progress_since: Option<u64>,
    /// High-water mark of delivered server changes.
    pub last_server_anchor: u64,
    /// Changes computed but held back by the window size.
    pub pending_changes: Vec<ChangeOp>,
    /// What was returned together with `current_key`.
    pub last_turn: Option<TurnRecord>,
    /// Incremented on every commit.
    pub version_counter: u64,
}

impl SyncState {
    /// Fresh record with key `"0"`.
    pub fn new(device_id: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            collection_id: collection_id.into(),
            current_key: SyncKey::initial(),
            previous_key: None,
            pending_key: None,
            in_progress_since: None,
            last_server_anchor: 0,
            pending_changes: Vec::new(),
            last_turn: None,
            version_counter: 0,
        }
    }

    /// True while a turn is running.
    pub fn is_in_progress(&self) -> bool {
        self.pending_key.is_some()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        if self.is_in_progress() {
            Phase::InProgress
        } else if self.version_counter == 0 {
            Phase::Uninitialized
        } else {
            Phase::Synced
        }
    }

    /// Build the state a successful turn commits.
    ///
    /// `self` must be the in-progress snapshot returned by `try_begin`.
    #[must_use]
    pub fn advanced(
        &self,
        anchor: u64,
        pending_changes: Vec<ChangeOp>,
        turn: TurnRecord,
    ) -> Option<SyncState> {
        let new_key = self.pending_key.clone()?;
        Some(SyncState {
            device_id: self.device_id.clone(),
            collection_id: self.collection_id.clone(),
            previous_key: Some(self.current_key.clone()),
            current_key: new_key,
            pending_key: None,
            in_progress_since: None,
            last_server_anchor: anchor,
            pending_changes,
            last_turn: Some(turn),
            version_counter: self.version_counter + 1,
        })
    }

    pub(crate) fn mark_in_progress(&mut self, pending: SyncKey) {
        self.pending_key = Some(pending);
        self.in_progress_since = Some(now_millis());
    }

    pub(crate) fn clear_in_progress(&mut self) {
        self.pending_key = None;
        self.in_progress_since = None;
    }

    pub(crate) fn is_stale(&self, now: u64, max_age_ms: u64) -> bool {
        self.in_progress_since
            .is_some_and(|since| now.saturating_sub(since) >= max_age_ms)
    }
}

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
