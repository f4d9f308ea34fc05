//! Collaborators that own the collection contents.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use easync_state::{ChangeKind, ChangeOp};
use easync_wbxml::WbxmlEvent;
use parking_lot::RwLock;
use thiserror::Error;

/// Result type for backend operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors reported by a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The item does not exist.
    #[error("item not found: {0}")]
    NotFound(String),

    /// The item was understood but refused.
    #[error("item rejected: {0}")]
    Rejected(String),

    /// The backend cannot be reached. Aborts the turn.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Ordered changes plus the anchor that covers them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Changes in delivery order.
    pub ops: Vec<ChangeOp>,
    /// Opaque high-water mark to pass to the next `changes_since`.
    pub anchor: u64,
}

/// Source of server-side changes.
pub trait ChangeLog: Send + Sync {
    /// Changes after `anchor`, oldest first.
    ///
    /// # Errors
    ///
    /// Any error aborts the turn and releases it.
    fn changes_since(&self, collection_id: &str, anchor: u64) -> SourceResult<ChangeBatch>;

    /// Every live item of the collection as `Add` operations.
    ///
    /// # Errors
    ///
    /// Any error aborts the turn and releases it.
    fn full_snapshot(&self, collection_id: &str) -> SourceResult<ChangeBatch>;
}

/// Sink for changes made on the device.
pub trait ChangeImporter: Send + Sync {
    /// Store a new item, returning its server id.
    ///
    /// The importer must remember `client_id` for the device, so that
    /// [`ChangeImporter::find_client_add`] recognises the same `Add` when a
    /// failed turn is retried.
    ///
    /// # Errors
    ///
    /// `NotFound`/`Rejected` become a per-item status; `Unavailable` aborts
    /// the turn.
    fn import_add(
        &self,
        device_id: &str,
        collection_id: &str,
        client_id: &str,
        data: &[WbxmlEvent],
    ) -> SourceResult<String>;

    /// Server id of an item already imported for this device's
    /// `client_id`, if any.
    ///
    /// # Errors
    ///
    /// As for [`ChangeImporter::import_add`].
    fn find_client_add(
        &self,
        device_id: &str,
        collection_id: &str,
        client_id: &str,
    ) -> SourceResult<Option<String>>;

    /// Replace an item's content.
    ///
    /// # Errors
    ///
    /// As for [`ChangeImporter::import_add`].
    fn import_change(
        &self,
        collection_id: &str,
        server_id: &str,
        data: &[WbxmlEvent],
    ) -> SourceResult<()>;

    /// Remove an item.
    ///
    /// # Errors
    ///
    /// As for [`ChangeImporter::import_add`].
    fn import_delete(&self, collection_id: &str, server_id: &str) -> SourceResult<()>;

    /// Full content of an item, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// As for [`ChangeImporter::import_add`].
    fn fetch(&self, collection_id: &str, server_id: &str) -> SourceResult<Option<Vec<WbxmlEvent>>>;
}

#[derive(Debug, Default)]
struct Journal {
    seq: u64,
    entries: Vec<(u64, String, ChangeOp)>,
    items: BTreeMap<(String, String), Vec<WbxmlEvent>>,
    client_adds: BTreeMap<(String, String, String), String>,
    next_id: u64,
}

impl Journal {
    fn record(&mut self, collection_id: &str, op: ChangeOp) -> u64 {
        let key = (collection_id.to_string(), op.item_id.clone());
        match (&op.kind, &op.payload) {
            (ChangeKind::Add | ChangeKind::Change, Some(payload)) => {
                self.items.insert(key, payload.clone());
            }
            (ChangeKind::Delete | ChangeKind::SoftDelete, _) => {
                self.items.remove(&key);
            }
            _ => {}
        }
        self.seq += 1;
        self.entries.push((self.seq, collection_id.to_string(), op));
        self.seq
    }

    fn contains(&self, collection_id: &str, item_id: &str) -> bool {
        self.items
            .contains_key(&(collection_id.to_string(), item_id.to_string()))
    }
}

/// An in-memory backend for tests and demos.
///
/// Every mutation, whether made through [`MemoryBackend::add`] and friends
/// or imported from a device, is journaled with a global sequence number
/// that serves as the anchor.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    journal: RwLock<Journal>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an item upstream.
    pub fn add(&self, collection_id: &str, item_id: &str, payload: Vec<WbxmlEvent>) -> u64 {
        self.journal
            .write()
            .record(collection_id, ChangeOp::add(item_id, payload))
    }

    /// Modify an item upstream.
    pub fn change(&self, collection_id: &str, item_id: &str, payload: Vec<WbxmlEvent>) -> u64 {
        self.journal
            .write()
            .record(collection_id, ChangeOp::change(item_id, payload))
    }

    /// Delete an item upstream.
    pub fn delete(&self, collection_id: &str, item_id: &str) -> u64 {
        self.journal
            .write()
            .record(collection_id, ChangeOp::delete(item_id))
    }

    /// Current content of an item.
    pub fn item(&self, collection_id: &str, item_id: &str) -> Option<Vec<WbxmlEvent>> {
        self.journal
            .read()
            .items
            .get(&(collection_id.to_string(), item_id.to_string()))
            .cloned()
    }

    /// Number of live items in a collection.
    pub fn item_count(&self, collection_id: &str) -> usize {
        self.journal
            .read()
            .items
            .keys()
            .filter(|(c, _)| c == collection_id)
            .count()
    }

    /// Latest sequence number.
    pub fn anchor(&self) -> u64 {
        self.journal.read().seq
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> SourceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SourceError::Unavailable("memory backend offline".into()))
        } else {
            Ok(())
        }
    }
}

impl ChangeLog for MemoryBackend {
    fn changes_since(&self, collection_id: &str, anchor: u64) -> SourceResult<ChangeBatch> {
        self.check_available()?;
        let journal = self.journal.read();
        let ops = journal
            .entries
            .iter()
            .filter(|(seq, c, _)| *seq > anchor && c == collection_id)
            .map(|(_, _, op)| op.clone())
            .collect();
        Ok(ChangeBatch {
            ops,
            anchor: journal.seq.max(anchor),
        })
    }

    fn full_snapshot(&self, collection_id: &str) -> SourceResult<ChangeBatch> {
        self.check_available()?;
        let journal = self.journal.read();
        let ops = journal
            .items
            .iter()
            .filter(|((c, _), _)| c == collection_id)
            .map(|((_, item), payload)| ChangeOp::add(item.clone(), payload.clone()))
            .collect();
        Ok(ChangeBatch {
            ops,
            anchor: journal.seq,
        })
    }
}

impl ChangeImporter for MemoryBackend {
    fn import_add(
        &self,
        device_id: &str,
        collection_id: &str,
        client_id: &str,
        data: &[WbxmlEvent],
    ) -> SourceResult<String> {
        self.check_available()?;
        if data.is_empty() {
            return Err(SourceError::Rejected(format!("{client_id} has no content")));
        }
        let mut journal = self.journal.write();
        journal.next_id += 1;
        let server_id = format!("{collection_id}:{}", journal.next_id);
        journal.record(collection_id, ChangeOp::add(server_id.clone(), data.to_vec()));
        journal.client_adds.insert(
            client_key(device_id, collection_id, client_id),
            server_id.clone(),
        );
        Ok(server_id)
    }

    fn find_client_add(
        &self,
        device_id: &str,
        collection_id: &str,
        client_id: &str,
    ) -> SourceResult<Option<String>> {
        self.check_available()?;
        let journal = self.journal.read();
        Ok(journal
            .client_adds
            .get(&client_key(device_id, collection_id, client_id))
            .filter(|server_id| journal.contains(collection_id, server_id))
            .cloned())
    }

    fn import_change(
        &self,
        collection_id: &str,
        server_id: &str,
        data: &[WbxmlEvent],
    ) -> SourceResult<()> {
        self.check_available()?;
        let mut journal = self.journal.write();
        if !journal.contains(collection_id, server_id) {
            return Err(SourceError::NotFound(server_id.to_string()));
        }
        journal.record(collection_id, ChangeOp::change(server_id, data.to_vec()));
        Ok(())
    }

    fn import_delete(&self, collection_id: &str, server_id: &str) -> SourceResult<()> {
        self.check_available()?;
        let mut journal = self.journal.write();
        if !journal.contains(collection_id, server_id) {
            return Err(SourceError::NotFound(server_id.to_string()));
        }
        journal.record(collection_id, ChangeOp::delete(server_id));
        Ok(())
    }

    fn fetch(&self, collection_id: &str, server_id: &str) -> SourceResult<Option<Vec<WbxmlEvent>>> {
        self.check_available()?;
        Ok(self.item(collection_id, server_id))
    }
}

fn client_key(device_id: &str, collection_id: &str, client_id: &str) -> (String, String, String) {
    (
        device_id.to_string(),
        collection_id.to_string(),
        client_id.to_string(),
    )
}
