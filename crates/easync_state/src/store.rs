//! The sync state store trait.

use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::key::SyncKey;
use crate::state::SyncState;

/// Durable, per-`(device, collection)` sync state with compare-and-swap
/// turn semantics.
///
/// # Invariants
///
/// - At most one turn per key is in progress at a time
/// - `commit` only succeeds for the turn that `try_begin` opened, and only
///   with `version_counter` exactly one above the stored value
/// - Records are removed only by `unlink`/`unlink_device`
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryStateStore`] - For tests and single-process servers
/// - [`super::FileStateStore`] - One CBOR file per record, locked across
///   processes
pub trait StateStore: Send + Sync {
    /// Read the record for a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot load the record.
    fn get(&self, device_id: &str, collection_id: &str) -> StoreResult<Option<SyncState>>;

    /// Atomically validate `presented` and mark the record in progress with
    /// `pending` as the key being issued.
    ///
    /// `"0"` always matches and creates the record when absent. Any other
    /// key must equal `current_key`.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if a turn is already in progress, if the
    /// presented key does not match, or if `pending` would reuse a live key.
    fn try_begin(
        &self,
        device_id: &str,
        collection_id: &str,
        presented: &SyncKey,
        pending: SyncKey,
    ) -> StoreResult<SyncState>;

    /// Atomically replace the record and clear the in-progress mark.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if the stored record is not in progress with
    /// `new_state.current_key` pending, or if `version_counter` does not
    /// directly follow the stored one. Returns `Storage`/`Io` if the write
    /// fails; the stored record is then unchanged.
    fn commit(&self, device_id: &str, collection_id: &str, new_state: SyncState)
        -> StoreResult<()>;

    /// Clear the in-progress mark without advancing.
    ///
    /// Releasing a record that is not in progress is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot write the record.
    fn release(&self, device_id: &str, collection_id: &str) -> StoreResult<()>;

    /// Clear every in-progress mark older than `max_age`. Returns how many
    /// records were reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot scan or write records.
    fn reset_stale(&self, max_age: Duration) -> StoreResult<usize>;

    /// Delete one record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot delete the record.
    fn unlink(&self, device_id: &str, collection_id: &str) -> StoreResult<bool>;

    /// Delete every record of a device. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot delete the records.
    fn unlink_device(&self, device_id: &str) -> StoreResult<usize>;

    /// All records of a device, ordered by collection id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot scan the records.
    fn list(&self, device_id: &str) -> StoreResult<Vec<SyncState>>;
}

/// Shared `try_begin` rules. Mutates `state` into its in-progress form.
pub(crate) fn begin_turn(
    state: &mut SyncState,
    presented: &SyncKey,
    pending: SyncKey,
) -> StoreResult<()> {
    let (device, collection) = (state.device_id.clone(), state.collection_id.clone());
    if state.is_in_progress() {
        return Err(StoreError::conflict(&device, &collection, "turn in progress"));
    }
    if !presented.is_initial() && *presented != state.current_key {
        return Err(StoreError::conflict(
            &device,
            &collection,
            format!("presented key {presented} is not current {}", state.current_key),
        ));
    }
    let reused = pending == state.current_key
        || state.previous_key.as_ref() == Some(&pending)
        || pending.is_initial();
    if reused {
        return Err(StoreError::conflict(
            &device,
            &collection,
            format!("pending key {pending} is already issued"),
        ));
    }
    state.mark_in_progress(pending);
    Ok(())
}

/// Shared `commit` rules.
pub(crate) fn check_commit(stored: &SyncState, new_state: &SyncState) -> StoreResult<()> {
    let conflict = |reason: String| {
        StoreError::conflict(&stored.device_id, &stored.collection_id, reason)
    };
    match &stored.pending_key {
        None => return Err(conflict("no turn in progress".into())),
        Some(pending) if *pending != new_state.current_key => {
            return Err(conflict(format!(
                "commit key {} is not pending key {pending}",
                new_state.current_key
            )));
        }
        Some(_) => {}
    }
    if new_state.version_counter != stored.version_counter + 1 {
        return Err(conflict(format!(
            "version {} does not follow {}",
            new_state.version_counter, stored.version_counter
        )));
    }
    Ok(())
}

/// Normalize a committed record: no in-progress mark survives a commit.
pub(crate) fn committed(mut new_state: SyncState) -> SyncState {
    new_state.clear_in_progress();
    new_state
}
