//! Keyed codec for the lookup token carried inside a QR code.
//!
//! Payload layout, base64url without padding:
//!
//! ```text
//! version (1) | salt (16) | nonce (12) | AES-256-GCM ciphertext + tag
//! ```
//!
//! The key is SHA-256 over a fixed context label, the salt and the shared
//! secret. Salt and nonce are drawn from the OS RNG on every encode, so two
//! encodings of the same token differ.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const PAYLOAD_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + SALT_LEN + NONCE_LEN;
const KEY_CONTEXT: &[u8] = b"rollcall/qr-token/v1";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("shared secret must not be empty")]
    EmptySecret,
    #[error("lookup token must not be empty")]
    EmptyToken,
    #[error("encryption failed")]
    Encryption,
    /// Any decode failure. The concrete reason is only traced, never returned.
    #[error("invalid payload")]
    InvalidPayload,
}

/// Why a payload was rejected; surfaced to logs only.
#[derive(Debug, Clone, Copy)]
enum Rejection {
    NotBase64,
    Truncated,
    UnknownVersion(u8),
    Unauthenticated,
    NotUtf8,
    EmptyPlaintext,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotBase64 => f.write_str("not base64url"),
            Self::Truncated => f.write_str("shorter than header and tag"),
            Self::UnknownVersion(v) => write!(f, "unknown payload version {v}"),
            Self::Unauthenticated => f.write_str("authentication failed (wrong secret or tampered)"),
            Self::NotUtf8 => f.write_str("plaintext is not UTF-8"),
            Self::EmptyPlaintext => f.write_str("plaintext is empty"),
        }
    }
}

/// Encrypts and decrypts lookup tokens under one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").field("secret", &"<redacted>").finish()
    }
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CodecError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CodecError::EmptySecret);
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    /// Encode a plaintext token into a QR-embeddable string.
    pub fn encode(&self, token: &str) -> Result<String, CodecError> {
        if token.is_empty() {
            return Err(CodecError::EmptyToken);
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = self.cipher(&salt);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: token.as_bytes(),
                    aad: &[PAYLOAD_VERSION],
                },
            )
            .map_err(|_| CodecError::Encryption)?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.push(PAYLOAD_VERSION);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Recover the plaintext token from a scanned payload.
    ///
    /// Every failure collapses to [`CodecError::InvalidPayload`].
    pub fn decode(&self, payload: &str) -> Result<String, CodecError> {
        self.try_decode(payload.trim()).map_err(|reason| {
            tracing::debug!(%reason, "rejected QR payload");
            CodecError::InvalidPayload
        })
    }

    fn try_decode(&self, payload: &str) -> Result<String, Rejection> {
        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| Rejection::NotBase64)?;

        if raw.len() < HEADER_LEN + TAG_LEN {
            return Err(Rejection::Truncated);
        }
        if raw[0] != PAYLOAD_VERSION {
            return Err(Rejection::UnknownVersion(raw[0]));
        }

        let salt = &raw[1..1 + SALT_LEN];
        let nonce = &raw[1 + SALT_LEN..HEADER_LEN];
        let ciphertext = &raw[HEADER_LEN..];

        let plaintext = self
            .cipher(salt)
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[PAYLOAD_VERSION],
                },
            )
            .map_err(|_| Rejection::Unauthenticated)?;

        let token = String::from_utf8(plaintext).map_err(|_| Rejection::NotUtf8)?;
        if token.is_empty() {
            return Err(Rejection::EmptyPlaintext);
        }
        Ok(token)
    }

    fn cipher(&self, salt: &[u8]) -> Aes256Gcm {
        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(salt);
        hasher.update(&self.secret);
        let digest = hasher.finalize();
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(digest.as_slice()))
    }
}
