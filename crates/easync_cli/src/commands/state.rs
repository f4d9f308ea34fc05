//! State command implementations.

use easync_state::{FileStateStore, Phase, StateStore, SyncState};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Sync state representation for output.
#[derive(Debug, Serialize)]
pub struct StateInfo {
    /// Device id.
    pub device_id: String,
    /// Collection id.
    pub collection_id: String,
    /// Lifecycle phase.
    pub phase: String,
    /// Key the client must present next.
    pub current_key: String,
    /// Key honored once more for a resend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_key: Option<String>,
    /// Key being issued by a running turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_key: Option<String>,
    /// When the running turn began, Unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress_since: Option<u64>,
    /// Server change anchor.
    pub last_server_anchor: u64,
    /// Changes held back by the window size.
    pub pending_changes: usize,
    /// Changes sent with the current key.
    pub last_turn_changes: usize,
    /// Replies sent with the current key.
    pub last_turn_replies: usize,
    /// Commit count.
    pub version_counter: u64,
}

impl From<&SyncState> for StateInfo {
    fn from(state: &SyncState) -> Self {
        let phase = match state.phase() {
            Phase::Uninitialized => "uninitialized",
            Phase::Synced => "synced",
            Phase::InProgress => "in-progress",
        };
        Self {
            device_id: state.device_id.clone(),
            collection_id: state.collection_id.clone(),
            phase: phase.to_string(),
            current_key: state.current_key.to_string(),
            previous_key: state.previous_key.as_ref().map(ToString::to_string),
            pending_key: state.pending_key.as_ref().map(ToString::to_string),
            in_progress_since: state.in_progress_since,
            last_server_anchor: state.last_server_anchor,
            pending_changes: state.pending_changes.len(),
            last_turn_changes: state.last_turn.as_ref().map_or(0, |t| t.changes.len()),
            last_turn_replies: state.last_turn.as_ref().map_or(0, |t| t.replies.len()),
            version_counter: state.version_counter,
        }
    }
}

/// Runs `state inspect`.
pub fn inspect(
    dir: &Path,
    device: &str,
    collection: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStateStore::open(dir)?;
    let state = store
        .get(device, collection)?
        .ok_or_else(|| format!("No state for {device}/{collection}"))?;
    let info = StateInfo::from(&state);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => print_text(&info),
    }
    Ok(())
}

/// Runs `state list`.
pub fn list(dir: &Path, device: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStateStore::open(dir)?;
    let infos: Vec<StateInfo> = store.list(device)?.iter().map(StateInfo::from).collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&infos)?),
        _ => {
            println!("Sync state for {device} ({} collections)", infos.len());
            println!("================");
            for info in &infos {
                println!(
                    "{:<24} {:<14} key={:<12} v{}",
                    info.collection_id, info.phase, info.current_key, info.version_counter
                );
            }
        }
    }
    Ok(())
}

/// Runs `state reset-stale`.
pub fn reset_stale(dir: &Path, max_age_secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStateStore::open(dir)?;
    let reset = store.reset_stale(Duration::from_secs(max_age_secs))?;
    info!(reset, max_age_secs, "reset stale sync turns");
    println!("Reset {reset} stale turn(s)");
    Ok(())
}

/// Runs `state unlink`.
pub fn unlink(
    dir: &Path,
    device: &str,
    collection: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStateStore::open(dir)?;
    let removed = match collection {
        Some(collection) => usize::from(store.unlink(device, collection)?),
        None => store.unlink_device(device)?,
    };
    println!("Removed {removed} record(s)");
    Ok(())
}

fn print_text(info: &StateInfo) {
    println!("Sync State: {}/{}", info.device_id, info.collection_id);
    println!("================");
    println!("Phase:           {}", info.phase);
    println!("Current key:     {}", info.current_key);
    if let Some(key) = &info.previous_key {
        println!("Previous key:    {key}");
    }
    if let Some(key) = &info.pending_key {
        println!("Pending key:     {key}");
    }
    if let Some(since) = info.in_progress_since {
        println!("In progress at:  {since} ms");
    }
    println!("Server anchor:   {}", info.last_server_anchor);
    println!("Held changes:    {}", info.pending_changes);
    println!(
        "Last turn:       {} changes, {} replies",
        info.last_turn_changes, info.last_turn_replies
    );
    println!("Version:         {}", info.version_counter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use easync_state::{SyncKey, TurnRecord};

    #[test]
    fn state_info_reflects_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        let begun = store
            .try_begin("dev", "inbox", &SyncKey::initial(), SyncKey::counter(1))
            .unwrap();
        let info = StateInfo::from(&begun);
        assert_eq!(info.phase, "in-progress");
        assert_eq!(info.pending_key.as_deref(), Some("1"));

        let next = begun.advanced(7, Vec::new(), TurnRecord::default()).unwrap();
        store.commit("dev", "inbox", next).unwrap();
        let infos: Vec<StateInfo> = store.list("dev").unwrap().iter().map(StateInfo::from).collect();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].phase, "synced");
        assert_eq!(infos[0].current_key, "1");
        assert_eq!(infos[0].last_server_anchor, 7);

        let json = serde_json::to_value(&infos[0]).unwrap();
        assert!(json.get("pending_key").is_none());
    }
}
