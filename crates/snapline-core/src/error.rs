//! Shared error type across snapline crates.

use thiserror::Error;

use crate::cpolicy::ProcessingErrors;
use crate::crypto::CryptoError;

/// Stable error codes, used in logs and RPC error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Connection refused, broken stream, closed channel.
    Transport,
    /// A per-call deadline elapsed.
    Timeout,
    /// Malformed payload.
    Decode,
    /// Unknown or mismatched content type.
    ContentType,
    /// Config policy validation failed.
    Policy,
    /// Error raised by plugin code (local or remote).
    Plugin,
    /// Key or ciphertext problem.
    Encryption,
    /// Invalid configuration or metadata.
    Config,
    /// Peer violated the protocol (handshake, envelope shape).
    Protocol,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and error replies.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Decode => "DECODE",
            ErrorCode::ContentType => "CONTENT_TYPE",
            ErrorCode::Policy => "POLICY",
            ErrorCode::Plugin => "PLUGIN",
            ErrorCode::Encryption => "ENCRYPTION",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, SnapError>;

/// Unified error type used by every snapline crate.
#[derive(Debug, Error)]
pub enum SnapError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("content type: {0}")]
    ContentType(String),
    #[error("{0}")]
    Policy(ProcessingErrors),
    /// Plugin code failed while serving `method`.
    #[error("{method} call error: {message}")]
    Plugin { method: String, message: String },
    /// Error string carried back in an RPC reply.
    #[error("{0}")]
    Remote(String),
    #[error(transparent)]
    Encryption(#[from] CryptoError),
    #[error("config: {0}")]
    Config(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl SnapError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SnapError::Transport(_) => ErrorCode::Transport,
            SnapError::Timeout(_) => ErrorCode::Timeout,
            SnapError::Decode(_) => ErrorCode::Decode,
            SnapError::ContentType(_) => ErrorCode::ContentType,
            SnapError::Policy(_) => ErrorCode::Policy,
            SnapError::Plugin { .. } | SnapError::Remote(_) => ErrorCode::Plugin,
            SnapError::Encryption(_) => ErrorCode::Encryption,
            SnapError::Config(_) => ErrorCode::Config,
            SnapError::Protocol(_) => ErrorCode::Protocol,
            SnapError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Wrap an error returned by plugin code with its method name.
    pub fn plugin_call(method: &str, err: impl std::fmt::Display) -> Self {
        SnapError::Plugin {
            method: method.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SnapError {
    fn from(e: std::io::Error) -> Self {
        SnapError::Transport(e.to_string())
    }
}
