//! File-backed sync state store.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::key::SyncKey;
use crate::state::{now_millis, SyncState};
use crate::store::{begin_turn, check_commit, committed, StateStore};

const STATE_EXT: &str = "state";
const LOCK_EXT: &str = "lock";
const TEMP_EXT: &str = "state.tmp";

/// On-disk record format version.
const FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: u16,
    state: SyncState,
}

/// A file-backed state store.
///
/// Layout: `<root>/<hex device id>/<hex collection id>.state`, one CBOR
/// record per key. Every read-modify-write holds an exclusive `fs2` lock
/// on the key's `.lock` file, so `try_begin` and `commit` stay atomic
/// across processes sharing the directory.
///
/// Lock files are created by the first write to a key and never removed,
/// so every process locks the same file for a key. Reads of a key that has
/// no record create nothing.
///
/// # Durability
///
/// Records are written with write-then-rename: temporary file, `sync_all`,
/// rename over the record, then fsync of the directory. A crash leaves
/// either the old or the new record, never a mix.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
}

/// Holds a key's lock file; the lock is released on drop.
struct KeyLock {
    file: File,
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileStateStore {
    /// Opens or creates a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, device_id: &str) -> PathBuf {
        self.root.join(encode_component(device_id))
    }

    fn record_path(&self, device_id: &str, collection_id: &str, ext: &str) -> PathBuf {
        self.device_dir(device_id)
            .join(format!("{}.{ext}", encode_component(collection_id)))
    }

    fn has_record(&self, device_id: &str, collection_id: &str) -> StoreResult<bool> {
        Ok(self
            .record_path(device_id, collection_id, STATE_EXT)
            .try_exists()?)
    }

    fn lock(&self, device_id: &str, collection_id: &str) -> StoreResult<KeyLock> {
        fs::create_dir_all(self.device_dir(device_id))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.record_path(device_id, collection_id, LOCK_EXT))?;
        file.lock_exclusive()?;
        Ok(KeyLock { file })
    }

    fn load(&self, path: &Path) -> StoreResult<Option<SyncState>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope = ciborium::de::from_reader(BufReader::new(file))
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))?;
        if envelope.format != FORMAT_VERSION {
            return Err(StoreError::Corrupted(format!(
                "{}: unsupported format {}",
                path.display(),
                envelope.format
            )));
        }
        Ok(Some(envelope.state))
    }

    fn save(&self, state: &SyncState) -> StoreResult<()> {
        let path = self.record_path(&state.device_id, &state.collection_id, STATE_EXT);
        let temp_path = self.record_path(&state.device_id, &state.collection_id, TEMP_EXT);

        let mut buffer = Vec::new();
        let envelope = Envelope {
            format: FORMAT_VERSION,
            state: state.clone(),
        };
        ciborium::ser::into_writer(&envelope, &mut buffer)
            .map_err(|e| StoreError::Storage(format!("encode state: {e}")))?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&buffer)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        sync_directory(&self.device_dir(&state.device_id))?;
        Ok(())
    }

    /// Apply `f` to a record under its lock, saving the result if `f`
    /// returns true.
    fn update<F>(&self, device_id: &str, collection_id: &str, f: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut SyncState) -> bool,
    {
        if !self.has_record(device_id, collection_id)? {
            return Ok(false);
        }
        let _lock = self.lock(device_id, collection_id)?;
        let path = self.record_path(device_id, collection_id, STATE_EXT);
        let Some(mut state) = self.load(&path)? else {
            return Ok(false);
        };
        if f(&mut state) {
            self.save(&state)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn device_ids(&self) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(decode_component) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn collection_ids(&self, device_id: &str) -> StoreResult<Vec<String>> {
        let dir = self.device_dir(device_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(&format!(".{STATE_EXT}")) {
                if let Some(id) = decode_component(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl StateStore for FileStateStore {
    fn get(&self, device_id: &str, collection_id: &str) -> StoreResult<Option<SyncState>> {
        if !self.has_record(device_id, collection_id)? {
            return Ok(None);
        }
        let _lock = self.lock(device_id, collection_id)?;
        self.load(&self.record_path(device_id, collection_id, STATE_EXT))
    }

    fn try_begin(
        &self,
        device_id: &str,
        collection_id: &str,
        presented: &SyncKey,
        pending: SyncKey,
    ) -> StoreResult<SyncState> {
        let _lock = self.lock(device_id, collection_id)?;
        let path = self.record_path(device_id, collection_id, STATE_EXT);
        let mut state = self
            .load(&path)?
            .unwrap_or_else(|| SyncState::new(device_id, collection_id));
        begin_turn(&mut state, presented, pending)?;
        self.save(&state)?;
        debug!(device_id, collection_id, "turn started");
        Ok(state)
    }

    fn commit(
        &self,
        device_id: &str,
        collection_id: &str,
        new_state: SyncState,
    ) -> StoreResult<()> {
        let _lock = self.lock(device_id, collection_id)?;
        let path = self.record_path(device_id, collection_id, STATE_EXT);
        let stored = self
            .load(&path)?
            .ok_or_else(|| StoreError::conflict(device_id, collection_id, "no such record"))?;
        check_commit(&stored, &new_state)?;
        self.save(&committed(new_state))
    }

    fn release(&self, device_id: &str, collection_id: &str) -> StoreResult<()> {
        self.update(device_id, collection_id, |state| {
            let was = state.is_in_progress();
            state.clear_in_progress();
            was
        })?;
        Ok(())
    }

    fn reset_stale(&self, max_age: Duration) -> StoreResult<usize> {
        let now = now_millis();
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let mut count = 0;
        for device_id in self.device_ids()? {
            for collection_id in self.collection_ids(&device_id)? {
                let reset = self.update(&device_id, &collection_id, |state| {
                    if state.is_stale(now, max_age_ms) {
                        state.clear_in_progress();
                        true
                    } else {
                        false
                    }
                })?;
                if reset {
                    warn!(%device_id, %collection_id, "reset stale turn");
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn unlink(&self, device_id: &str, collection_id: &str) -> StoreResult<bool> {
        if !self.has_record(device_id, collection_id)? {
            return Ok(false);
        }
        let _lock = self.lock(device_id, collection_id)?;
        match fs::remove_file(self.record_path(device_id, collection_id, STATE_EXT)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        sync_directory(&self.device_dir(device_id))?;
        Ok(true)
    }

    fn unlink_device(&self, device_id: &str) -> StoreResult<usize> {
        let mut count = 0;
        for collection_id in self.collection_ids(device_id)? {
            if self.unlink(device_id, &collection_id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn list(&self, device_id: &str) -> StoreResult<Vec<SyncState>> {
        let mut states = Vec::new();
        for collection_id in self.collection_ids(device_id)? {
            if let Some(state) = self.get(device_id, &collection_id)? {
                states.push(state);
            }
        }
        Ok(states)
    }
}

/// Hex-encode an id so any string maps to a safe file name.
fn encode_component(id: &str) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(id.len() * 2);
    for byte in id.bytes() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn decode_component(name: &str) -> Option<String> {
    if name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(name.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// Fsync a directory so renames and deletions inside it are durable.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced.
    Ok(())
}
