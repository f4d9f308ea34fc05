//! # easync Server
//!
//! Transport boundary for the ActiveSync `Sync` command.
//!
//! This crate provides:
//! - [`SyncServer`], turning `(body, device, collection, headers)` into
//!   `(body, status)`
//! - Per-device body preference and truncation ([`DevicePolicy`])
//! - Mapping of every failure to an HTTP status
//!
//! HTTP parsing, authentication and provisioning stay with the front end.
//!
//! # Status Mapping
//!
//! | Failure | Status |
//! |---------|--------|
//! | Malformed WBXML or request, wrong content type | 400 |
//! | Body over the size limit | 413 |
//! | Command other than `Sync` | 501 |
//! | Turn already in progress, backend unavailable | 503 |
//! | State store failure, response encoding failure | 500 |
//!
//! An invalid sync key is not a failure: the collection is answered with
//! AirSync status 3 inside a 200 response.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod policy;
mod server;
mod transport;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use policy::DevicePolicy;
pub use server::SyncServer;
pub use transport::{TransportRequest, TransportResponse, WBXML_CONTENT_TYPE};
