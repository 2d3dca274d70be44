//! # SyncML Engine
//!
//! Command and session state machine for SyncML data synchronization.
//!
//! This crate provides:
//! - `Session`, driving one client or server session message by message
//! - Size-budgeted message assembly
//! - Splitting and reassembly of large objects
//! - Suspend and resume with pluggable state stores
//! - Datastore backend abstraction with an in-memory implementation
//!
//! ## Architecture
//!
//! Every received message yields exactly one answer. Incoming commands are
//! executed in order; their statuses and our own commands are placed into
//! the answer while they fit. What does not fit waits for the next message.
//! Outgoing commands stay tracked until the remote sent a status for every
//! issuance.
//!
//! ## Key Invariants
//!
//! - Outgoing messages never exceed the remote's maximum message size
//! - Command IDs increase strictly across a session
//! - Session phases only move forward
//! - Chunks of one item are never interleaved with other items
//! - Anchors are only committed by successful sessions

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod assembler;
mod auth;
mod backend;
mod chunking;
mod command;
mod config;
mod context;
mod datastore;
mod error;
mod memory;
mod resume;
mod session;
mod tracker;

pub use assembler::MessageAssembler;
pub use auth::{AnyCredentials, AuthOutcome, Authenticator};
pub use backend::{AdminRecord, BackendFactory, ChangeRecord, SyncBackend, SyncItem};
pub use chunking::{split_point, ChunkOutcome, Reassembly, MIN_SPLIT_SIZE};
pub use config::{DatastoreConfig, SessionConfig, SessionRole};
pub use context::{SessionContext, SessionPhase};
pub use datastore::{DatastoreSession, DatastoreStats};
pub use error::{EngineError, EngineResult};
pub use memory::{MemoryBackend, MemoryBackendFactory};
pub use resume::{
    FileResumeStore, MemoryResumeStore, OutgoingPartial, PartialItem, PendingItem, ResumeKey,
    ResumeOp, ResumeState, ResumeStore,
};
pub use session::{Reply, Session, SessionSummary};
