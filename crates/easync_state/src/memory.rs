//! In-memory sync state store.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StoreResult;
use crate::key::SyncKey;
use crate::state::{now_millis, SyncState};
use crate::store::{begin_turn, check_commit, committed, StateStore};

type RecordKey = (String, String);

/// An in-memory state store.
///
/// All records live behind one mutex, which makes every operation
/// trivially atomic. Suitable for tests and single-process servers that
/// do not need state to survive restarts.
///
/// # Example
///
/// ```rust
/// use easync_state::{InMemoryStateStore, StateStore, SyncKey};
///
/// let store = InMemoryStateStore::new();
/// let state = store
///     .try_begin("dev", "inbox", &SyncKey::initial(), SyncKey::counter(1))
///     .unwrap();
/// assert!(state.is_in_progress());
/// assert!(store.try_begin("dev", "inbox", &SyncKey::initial(), SyncKey::counter(2)).is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: Mutex<BTreeMap<RecordKey, SyncState>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn record_key(device_id: &str, collection_id: &str) -> RecordKey {
    (device_id.to_string(), collection_id.to_string())
}

impl StateStore for InMemoryStateStore {
    fn get(&self, device_id: &str, collection_id: &str) -> StoreResult<Option<SyncState>> {
        Ok(self
            .records
            .lock()
            .get(&record_key(device_id, collection_id))
            .cloned())
    }

    fn try_begin(
        &self,
        device_id: &str,
        collection_id: &str,
        presented: &SyncKey,
        pending: SyncKey,
    ) -> StoreResult<SyncState> {
        let mut records = self.records.lock();
        let key = record_key(device_id, collection_id);
        let mut state = records
            .get(&key)
            .cloned()
            .unwrap_or_else(|| SyncState::new(device_id, collection_id));
        begin_turn(&mut state, presented, pending)?;
        records.insert(key, state.clone());
        debug!(device_id, collection_id, "turn started");
        Ok(state)
    }

    fn commit(
        &self,
        device_id: &str,
        collection_id: &str,
        new_state: SyncState,
    ) -> StoreResult<()> {
        let mut records = self.records.lock();
        let key = record_key(device_id, collection_id);
        let stored = records.get(&key).ok_or_else(|| {
            crate::StoreError::conflict(device_id, collection_id, "no such record")
        })?;
        check_commit(stored, &new_state)?;
        records.insert(key, committed(new_state));
        Ok(())
    }

    fn release(&self, device_id: &str, collection_id: &str) -> StoreResult<()> {
        if let Some(state) = self
            .records
            .lock()
            .get_mut(&record_key(device_id, collection_id))
        {
            state.clear_in_progress();
        }
        Ok(())
    }

    fn reset_stale(&self, max_age: Duration) -> StoreResult<usize> {
        let now = now_millis();
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let mut count = 0;
        for state in self.records.lock().values_mut() {
            if state.is_stale(now, max_age_ms) {
                state.clear_in_progress();
                count += 1;
            }
        }
        Ok(count)
    }

    fn unlink(&self, device_id: &str, collection_id: &str) -> StoreResult<bool> {
        Ok(self
            .records
            .lock()
            .remove(&record_key(device_id, collection_id))
            .is_some())
    }

    fn unlink_device(&self, device_id: &str) -> StoreResult<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|(device, _), _| device != device_id);
        Ok(before - records.len())
    }

    fn list(&self, device_id: &str) -> StoreResult<Vec<SyncState>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|((device, _), _)| device == device_id)
            .map(|(_, state)| state.clone())
            .collect())
    }
}
