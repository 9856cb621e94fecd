//! HTTP JSON-RPC backing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use snapline_core::crypto::Encrypter;
use snapline_core::encoding::Codec;
use snapline_core::error::{Result, SnapError};
use snapline_rpc::jsonrpc::{self, JsonReply, JsonRequest};

use super::encoded::{EncodedClient, RawCall};

pub type HttpJsonRpcClient = EncodedClient<HttpTransport>;

pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

pub fn connect(
    addr: &str,
    timeout: Duration,
    encrypter: Option<Arc<Encrypter>>,
) -> Result<HttpJsonRpcClient> {
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SnapError::Transport(format!("http client: {e}")))?;
    let transport = HttpTransport {
        http,
        url: format!("http://{addr}{}", jsonrpc::PATH),
        next_id: AtomicU64::new(1),
    };
    Ok(EncodedClient::new(transport, Codec::Json, encrypter, timeout))
}

#[async_trait]
impl RawCall for HttpTransport {
    async fn call(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRequest::new(method, id, &body);
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SnapError::Timeout(format!("{method}: {e}"))
                } else {
                    SnapError::Transport(format!("{method}: {e}"))
                }
            })?;
        if !resp.status().is_success() {
            return Err(SnapError::Transport(format!(
                "{method}: http status {}",
                resp.status()
            )));
        }
        let reply: JsonReply = resp
            .json()
            .await
            .map_err(|e| SnapError::Decode(format!("{method} reply: {e}")))?;
        if reply.id != id && reply.error.is_none() {
            return Err(SnapError::Protocol(format!(
                "reply id {} does not match request id {id}",
                reply.id
            )));
        }
        reply.into_body()
    }
}
