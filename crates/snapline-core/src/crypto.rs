//! Session encryption.
//!
//! Hybrid scheme: the control process generates a fresh 256-bit key per
//! session and sends it once, RSA-OAEP encrypted under the plugin's public
//! key. Payloads are then sealed with AES-256-GCM as `nonce || ciphertext`.

use std::sync::OnceLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const DEFAULT_RSA_BITS: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("given key length is invalid. did you set it?")]
    KeyInvalid,
    #[error("symmetric key already installed")]
    KeyAlreadySet,
    #[error("ciphertext too short")]
    Ciphertext,
    #[error("authentication failed")]
    Authentication,
    #[error("no key pair available")]
    NoKeyPair,
    #[error("rsa: {0}")]
    Rsa(String),
}

/// RSA key pair owned by a plugin session.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| CryptoError::Rsa(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Base64 SPKI DER, as carried in the handshake.
    pub fn public_key_b64(&self) -> Result<String, CryptoError> {
        encode_public_key(&self.public)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

pub fn encode_public_key(key: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::Rsa(e.to_string()))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

pub fn decode_public_key(b64: &str) -> Result<RsaPublicKey, CryptoError> {
    let der = STANDARD
        .decode(b64)
        .map_err(|e| CryptoError::Rsa(format!("public key base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Fresh random 256-bit key.
pub fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// OAEP-encrypt a symmetric key for transport to the plugin.
pub fn encrypt_key(public: &RsaPublicKey, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Symmetric encrypter. The key is installed at most once.
#[derive(Debug, Default)]
pub struct Encrypter {
    key: OnceLock<Vec<u8>>,
    key_pair: Option<KeyPair>,
}

impl Encrypter {
    /// Encrypter waiting for its key.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: Vec<u8>) -> Self {
        let e = Self::default();
        let _ = e.key.set(key);
        e
    }

    /// Plugin side: holds the private key used to unwrap `SetKey`.
    pub fn with_key_pair(key_pair: KeyPair) -> Self {
        Self {
            key: OnceLock::new(),
            key_pair: Some(key_pair),
        }
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    pub fn has_key(&self) -> bool {
        self.key.get().is_some()
    }

    /// Installs a `KEY_SIZE` key. A key of any other length is rejected
    /// and leaves the slot empty.
    pub fn set_key(&self, key: Vec<u8>) -> Result<(), CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::KeyInvalid);
        }
        self.key.set(key).map_err(|_| CryptoError::KeyAlreadySet)
    }

    /// Unwrap an OAEP-encrypted key with the session private key and install
    /// it.
    pub fn install_encrypted_key(&self, encrypted: &[u8]) -> Result<(), CryptoError> {
        let pair = self.key_pair.as_ref().ok_or(CryptoError::NoKeyPair)?;
        let key = pair
            .private
            .decrypt(Oaep::new::<Sha256>(), encrypted)
            .map_err(|e| CryptoError::Rsa(e.to_string()))?;
        self.set_key(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        let key = self.key.get().ok_or(CryptoError::KeyInvalid)?;
        if key.len() != KEY_SIZE {
            return Err(CryptoError::KeyInvalid);
        }
        Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyInvalid)
    }

    /// `nonce || seal(plaintext)` with a fresh 96-bit nonce per call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher()?;
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Authentication)?;
        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher()?;
        if ciphertext.len() < NONCE_SIZE {
            return Err(CryptoError::Ciphertext);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Authentication)
    }
}
