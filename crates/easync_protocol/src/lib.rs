//! # easync Protocol
//!
//! Typed model of the ActiveSync `Sync` command.
//!
//! Requests are parsed from a WBXML event stream in a single pass, without
//! building a tree. Responses are written straight into an
//! [`easync_wbxml::Encoder`], with item payloads routed through the
//! [`PayloadFilter`] that [`ResponseFilter`] picks for their collection.
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reader;
mod request;
mod response;
mod status;

pub use error::{ProtocolError, ProtocolResult};
pub use request::{
    BodyPreference, ClientCommand, CollectionOptions, CollectionRequest, ConflictResolution,
    SyncRequest,
};
pub use response::{
    CollectionResponse, PayloadFilter, PerCollection, ResponseFilter, SyncResponse, Unfiltered,
};
pub use status::SyncStatus;
