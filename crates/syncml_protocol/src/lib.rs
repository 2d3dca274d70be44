//! # SyncML Protocol
//!
//! SyncML protocol types on top of the element codec.
//!
//! This crate provides:
//! - `StatusCode` with the status classification used by the engine
//! - Command kinds and alert codes
//! - Meta, item, credential and header types
//! - Typed commands (`AlertCmd`, `SyncCmd`, `SyncOpCmd`, `MapCmd`, ...)
//! - `WireMessage` for complete messages
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod cred;
mod error;
mod fields;
mod header;
mod item;
mod kind;
mod message;
mod meta;
mod status;

pub use commands::{
    AlertCmd, CommandRef, GetPutCmd, MapCmd, ProtocolCommand, ResultsCmd, SequenceCmd, StatusCmd,
    SyncCmd, SyncOpCmd,
};
pub use cred::{Cred, AUTH_BASIC};
pub use error::{ProtocolError, ProtocolResult};
pub use header::{SyncHdr, SyncMlVersion};
pub use item::{Item, Location, MapItem};
pub use kind::{AlertCode, CommandKind, SyncOpKind};
pub use message::WireMessage;
pub use meta::{Anchor, Meta};
pub use status::{StatusClass, StatusCode, StatusDisposition};

pub use syncml_codec::{Element, Encoding, Tag};
