//! Plugin-side transport servers.
//!
//! All three serve the same proxy surface until the session terminates:
//! - `native`: bincode frames, one task per accepted connection
//! - `jsonrpc`: axum `POST /rpc`
//! - `proto`: protobuf frames over TCP or TLS, plus metric streams

pub mod jsonrpc;
pub mod native;
pub mod proto;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use snapline_core::error::Result;
use snapline_core::meta::RpcType;

use crate::session::Session;

/// Serve on `listener` with the transport the session's meta declares.
pub async fn serve(
    session: Arc<Session>,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
) -> Result<()> {
    match session.meta().rpc_type {
        RpcType::Native => native::serve(session, listener).await,
        RpcType::JsonRpc => jsonrpc::serve(session, listener).await,
        RpcType::Proto => proto::serve(session, listener, tls).await,
    }
}
