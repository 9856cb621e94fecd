//! Native binary RPC envelopes (bincode).
//!
//! A connection carries request/reply pairs in order. `body` is produced by
//! the session `Encoder` (or bincode directly for `SetKey`).

use serde::{Deserialize, Serialize};

use snapline_core::error::{Result, SnapError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(id: u64, body: Vec<u8>) -> Self {
        Self {
            id,
            body,
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            body: Vec::new(),
            error: Some(error.into()),
        }
    }
}

pub fn to_bytes<T: Serialize>(v: &T) -> Result<Vec<u8>> {
    bincode::serialize(v).map_err(|e| SnapError::Internal(e.to_string()))
}

pub fn from_bytes<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| SnapError::Decode(e.to_string()))
}
