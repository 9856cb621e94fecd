//! snapline RPC plumbing shared by plugin servers and control clients.
//!
//! - `frame`: length-prefixed framing over any async byte stream
//! - `method`: the transport-independent method names
//! - `args`: request/reply bodies for the native and JSON-RPC transports
//! - `native`: binary request/reply envelopes
//! - `jsonrpc`: HTTP JSON-RPC envelopes
//! - `proto`: protobuf schema and conversions to core types
//! - `tls`: security descriptor -> rustls configuration

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod args;
pub mod frame;
pub mod jsonrpc;
pub mod method;
pub mod native;
pub mod proto;
pub mod tls;
