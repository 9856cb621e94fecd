//! Transport security descriptor.
//!
//! Describes which TLS posture a transport runs with. Turning the descriptor
//! into live TLS configuration happens in `snapline-rpc`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapError};

/// Which end of the connection this descriptor configures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsSide {
    Client,
    Server,
    #[default]
    Off,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityDescriptor {
    #[serde(default)]
    pub tls_enabled: bool,

    #[serde(default)]
    pub side: TlsSide,

    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// CA certificate files or directories. Non-empty means the peer must
    /// present a certificate signed by one of them (mutual TLS on the server
    /// side).
    #[serde(default)]
    pub ca_cert_paths: Vec<PathBuf>,
}

/// Resolved TLS posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPosture {
    Off,
    /// Server authenticated by certificate.
    ServerAuth,
    /// Both ends present certificates.
    Mutual,
}

impl SecurityDescriptor {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn posture(&self) -> TlsPosture {
        if !self.tls_enabled || self.side == TlsSide::Off {
            return TlsPosture::Off;
        }
        let has_identity = self.cert_path.is_some() && self.key_path.is_some();
        match self.side {
            TlsSide::Server if !self.ca_cert_paths.is_empty() => TlsPosture::Mutual,
            TlsSide::Client if has_identity => TlsPosture::Mutual,
            _ => TlsPosture::ServerAuth,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tls_enabled {
            return Ok(());
        }
        match self.side {
            TlsSide::Off => Err(SnapError::Config(
                "tls enabled but side is off".into(),
            )),
            TlsSide::Server => {
                if self.cert_path.is_none() || self.key_path.is_none() {
                    return Err(SnapError::Config(
                        "tls server requires cert_path and key_path".into(),
                    ));
                }
                Ok(())
            }
            TlsSide::Client => {
                if self.cert_path.is_some() != self.key_path.is_some() {
                    return Err(SnapError::Config(
                        "tls client cert_path and key_path must be set together".into(),
                    ));
                }
                if self.ca_cert_paths.is_empty() {
                    return Err(SnapError::Config(
                        "tls client requires at least one ca_cert_paths entry".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}
