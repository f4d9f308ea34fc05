//! # easync Testkit
//!
//! Test utilities for easync.
//!
//! This crate provides:
//! - Fixtures: machines and servers wired to in-memory or file stores
//! - Builders for `Sync` request documents
//! - Property-based generators using proptest
//! - Golden file helpers and fixed WBXML vectors
//! - Fuzz harnesses for the decoder, the request parser and the server
//! - Concurrency stress runs against a shared store
//!
//! ## Usage
//!
//! ```rust
//! use easync_testkit::prelude::*;
//!
//! let fixture = ServerFixture::memory();
//! let response = fixture.post("dev", SyncRequestBuilder::new().collection("0", "inbox").build());
//! assert_eq!(response.status, 200);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod golden;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use golden::*;
pub use stress::*;
pub use vectors::*;
