//! # easync State
//!
//! Sync keys, per-collection sync state and the store that guards it.
//!
//! Every `(device, collection)` pair owns one [`SyncState`]. A sync turn
//! opens with [`StateStore::try_begin`], which validates the presented key
//! and marks the record in progress, and closes with either
//! [`StateStore::commit`] (advance to the pending key) or
//! [`StateStore::release`] (roll back). Together they behave like a
//! compare-and-swap on the record.
//!
//! ## Available Stores
//!
//! - [`InMemoryStateStore`] - For tests and single-process servers
//! - [`FileStateStore`] - Persistent, one CBOR file per record
//!
//! ## Example
//!
//! ```rust
//! use easync_state::{InMemoryStateStore, StateStore, SyncKey, TurnRecord};
//!
//! let store = InMemoryStateStore::new();
//! let state = store
//!     .try_begin("dev", "inbox", &SyncKey::initial(), SyncKey::counter(1))
//!     .unwrap();
//! let next = state.advanced(0, Vec::new(), TurnRecord::default()).unwrap();
//! store.commit("dev", "inbox", next).unwrap();
//!
//! let stored = store.get("dev", "inbox").unwrap().unwrap();
//! assert_eq!(stored.current_key.to_string(), "1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod key;
mod memory;
mod state;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStateStore;
pub use key::{KeyStyle, ParseKeyError, SyncKey};
pub use memory::InMemoryStateStore;
pub use state::{
    ChangeKind, ChangeOp, ClientReply, Phase, ReplyKind, SyncState, TurnRecord,
};
pub use store::StateStore;
