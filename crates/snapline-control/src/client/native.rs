//! Native binary RPC backing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use snapline_core::crypto::Encrypter;
use snapline_core::encoding::Codec;
use snapline_core::error::{Result, SnapError};
use snapline_rpc::frame::{self, FrameStream};
use snapline_rpc::native::{self, Reply, Request};

use super::encoded::{EncodedClient, RawCall};
use super::with_deadline;

pub type NativeClient = EncodedClient<NativeTransport>;

/// One persistent connection; calls are serialized on it.
pub struct NativeTransport {
    conn: Mutex<FrameStream>,
    next_id: AtomicU64,
}

pub async fn connect(
    addr: &str,
    timeout: Duration,
    encrypter: Option<Arc<Encrypter>>,
) -> Result<NativeClient> {
    let tcp = with_deadline(timeout, "connect", async {
        TcpStream::connect(addr)
            .await
            .map_err(|e| SnapError::Transport(format!("dial {addr}: {e}")))
    })
    .await?;
    let _ = tcp.set_nodelay(true);
    let transport = NativeTransport {
        conn: Mutex::new(frame::framed(tcp)),
        next_id: AtomicU64::new(1),
    };
    Ok(EncodedClient::new(transport, Codec::Binary, encrypter, timeout))
}

#[async_trait]
impl RawCall for NativeTransport {
    async fn call(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = Request {
            id,
            method: method.to_string(),
            body,
        };
        let mut conn = self.conn.lock().await;
        frame::send(&mut conn, native::to_bytes(&req)?).await?;
        loop {
            let bytes = frame::recv(&mut conn)
                .await?
                .ok_or_else(|| SnapError::Transport("plugin closed the connection".into()))?;
            let reply: Reply = native::from_bytes(&bytes)?;
            // Replies to calls that already timed out are still in the pipe.
            if reply.id < id {
                tracing::debug!(stale = reply.id, expected = id, "dropping stale reply");
                continue;
            }
            if reply.id != id {
                return Err(SnapError::Protocol(format!(
                    "reply id {} does not match request id {id}",
                    reply.id
                )));
            }
            return match reply.error {
                Some(e) => Err(SnapError::Remote(e)),
                None => Ok(reply.body),
            };
        }
    }
}
