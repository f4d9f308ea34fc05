//! # easync Engine
//!
//! The ActiveSync `Sync` state machine.
//!
//! This crate provides:
//! - Sync key classification (initial, current, resend, invalid)
//! - Turn processing against a [`easync_state::StateStore`]
//! - Window sizing with `MoreAvailable` paging
//! - Client command import through a [`ChangeImporter`]
//! - An in-memory backend for tests
//!
//! ## Turn Lifecycle
//!
//! 1. Classify the presented key against the stored record
//! 2. `try_begin` with the key to be issued
//! 3. Import client commands, then read server changes from the [`ChangeLog`]
//! 4. Encode the complete response
//! 5. Commit, or release when nothing changed
//!
//! ## Key Invariants
//!
//! - A key reaches the client only if the store commits it
//! - A resend of the previous key is answered identically and changes
//!   nothing
//! - Keys older than the previous key are never accepted
//! - Changes made by the client are not echoed back in the same turn

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod machine;
mod source;

pub use config::{EngineConfig, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};
pub use error::{EngineError, EngineResult};
pub use machine::{coalesce, EngineStats, Presented, SyncOutput, SyncStateMachine};
pub use source::{
    ChangeBatch, ChangeImporter, ChangeLog, MemoryBackend, SourceError, SourceResult,
};
