//! # SyncML Server
//!
//! Session hosting for SyncML servers.
//!
//! This crate provides:
//! - Routing of request bodies to the session they belong to
//! - A session registry with per-session locking and idle expiry
//! - Basic authentication against a user table
//!
//! # Architecture
//!
//! The server does not speak HTTP itself. Whatever transport receives a
//! request hands its body to [`SyncServer::handle_request`] and sends the
//! returned body back. Sessions are keyed by device and session ID:
//! - A new key creates a session from the configured [`ServerConfig`]
//! - Requests for the same key are processed one at a time
//! - Sessions are dropped when they end or sit idle too long
//!
//! # Authentication
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use syncml_server::{BasicAuthenticator, ServerConfig, SyncServer};
//!
//! let users = BasicAuthenticator::new().with_user("alice", "secret");
//! let server = SyncServer::new(ServerConfig::default(), factory)
//!     .with_authenticator(Arc::new(users));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod registry;
mod server;

pub use auth::BasicAuthenticator;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use registry::{SessionRegistry, SessionSlot};
pub use server::{Response, SyncServer};
