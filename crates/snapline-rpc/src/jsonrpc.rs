//! HTTP JSON-RPC envelopes.
//!
//! Requests are `POST /rpc` with `{method, id, params}`. `params` holds a
//! single base64 string of the encoded request body (empty for `Ping`).
//! Replies are `{id, result, error}` with `result` base64 as well.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use snapline_core::error::{Result, SnapError};

pub const PATH: &str = "/rpc";

/// Error returned for an empty or non-JSON request body.
pub const ILL_FORMED: &str = "rpc: method request ill-formed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRequest {
    pub method: String,
    pub id: u64,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonReply {
    pub id: u64,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl JsonRequest {
    pub fn new(method: &str, id: u64, body: &[u8]) -> Self {
        Self {
            method: method.to_string(),
            id,
            params: vec![STANDARD.encode(body)],
        }
    }

    /// Decoded first param; empty when no params were sent.
    pub fn body(&self) -> Result<Vec<u8>> {
        match self.params.first() {
            Some(p) => STANDARD
                .decode(p)
                .map_err(|e| SnapError::Decode(format!("params: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

impl JsonReply {
    pub fn ok(id: u64, body: &[u8]) -> Self {
        Self {
            id,
            result: Some(STANDARD.encode(body)),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The reply body, or the remote error.
    pub fn into_body(self) -> Result<Vec<u8>> {
        if let Some(e) = self.error {
            return Err(SnapError::Remote(e));
        }
        match self.result {
            Some(r) => STANDARD
                .decode(r)
                .map_err(|e| SnapError::Decode(format!("result: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}
