//! # SyncML Testkit
//!
//! Test utilities for the SyncML crates.
//!
//! This crate provides:
//! - Client/server session pairs over in-memory backends
//! - A loopback driver exchanging messages between the two
//! - Message inspection helpers
//! - Property-based test generators using proptest
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncml_testkit::prelude::*;
//!
//! #[test]
//! fn two_way_sync() {
//!     let mut pair = SyncPair::new();
//!     pair.client_backend.insert_local("1", "BEGIN:VCARD\r\nEND:VCARD\r\n");
//!     let exchanges = pair.run().unwrap();
//!     assert!(pair.client.summary().successful);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod inspect;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::inspect::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use inspect::*;
pub use logging::*;
