//! Encoding layer: serialization with optional transparent encryption.
//!
//! The codec is fixed per session: binary for the native and proto
//! transports, JSON for the HTTP JSON-RPC transport.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::Encrypter;
use crate::error::{Result, SnapError};
use crate::meta::RpcType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// bincode
    Binary,
    Json,
}

impl Codec {
    pub fn for_rpc(rpc: RpcType) -> Self {
        match rpc {
            RpcType::Native | RpcType::Proto => Codec::Binary,
            RpcType::JsonRpc => Codec::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Encoder {
    codec: Codec,
    encrypter: Option<Arc<Encrypter>>,
}

impl Encoder {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            encrypter: None,
        }
    }

    pub fn binary() -> Self {
        Self::new(Codec::Binary)
    }

    pub fn json() -> Self {
        Self::new(Codec::Json)
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Route every encoded payload through `e`.
    pub fn set_encrypter(&mut self, e: Arc<Encrypter>) {
        self.encrypter = Some(e);
    }

    pub fn with_encrypter(mut self, e: Arc<Encrypter>) -> Self {
        self.set_encrypter(e);
        self
    }

    pub fn encrypter(&self) -> Option<&Arc<Encrypter>> {
        self.encrypter.as_ref()
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let bytes = match self.codec {
            Codec::Binary => {
                bincode::serialize(value).map_err(|e| SnapError::Internal(e.to_string()))?
            }
            Codec::Json => {
                serde_json::to_vec(value).map_err(|e| SnapError::Internal(e.to_string()))?
            }
        };
        self.seal(&bytes)
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let plain = self.open(bytes)?;
        match self.codec {
            Codec::Binary => {
                bincode::deserialize(&plain).map_err(|e| SnapError::Decode(e.to_string()))
            }
            Codec::Json => {
                serde_json::from_slice(&plain).map_err(|e| SnapError::Decode(e.to_string()))
            }
        }
    }

    /// Encrypt already-serialized bytes (pass-through without an encrypter).
    pub fn seal(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match &self.encrypter {
            Some(e) => Ok(e.encrypt(bytes)?),
            None => Ok(bytes.to_vec()),
        }
    }

    pub fn open(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match &self.encrypter {
            Some(e) => Ok(e.decrypt(bytes)?),
            None => Ok(bytes.to_vec()),
        }
    }
}
