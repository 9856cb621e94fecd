//! snapline core: transport-agnostic primitives shared by plugins and the
//! control process.
//!
//! This crate defines the plugin metadata and handshake contracts, metric and
//! configuration value types, the configuration policy tree, the session
//! encrypter, and the encoding layer. It carries no async runtime so it can be
//! used from both sides of the wire.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths surface as `SnapError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod content_type;
pub mod cpolicy;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod meta;
pub mod metric;
pub mod security;

/// Shared result type.
pub use error::{Result, SnapError};
