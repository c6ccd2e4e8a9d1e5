//! Cryptographic primitives shared by the Noise handshake, the transport
//! layer and the Signal ratchet.
//!
//! * [`frame_cipher`]: AES‑256‑GCM of a single frame with a counter nonce.
//! * [`kdf`]: HKDF‑SHA‑256, HMAC‑SHA‑256 and SHA‑256 helpers.
//! * [`keys`]: X25519 key pairs and the XEdDSA signing identity key.

use thiserror::Error;

pub mod frame_cipher;
pub mod kdf;
pub mod keys;

pub use {
    frame_cipher::{FrameCipher, NonceCounter},
    keys::{IdentityKeyPair, KeyPair},
};

/// Errors raised by the low‑level primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CryptoError {
    /// AEAD tag mismatch: wrong key, wrong counter, tampered ciphertext or
    /// tampered associated data.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// A nonce counter would wrap around. Reusing a nonce under the same key
    /// is never allowed, so the key must be discarded.
    #[error("nonce counter exhausted")]
    CounterExhausted,
    /// Key material of the wrong size was supplied.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    /// An encoded public key carried an unknown type byte.
    #[error("unknown public key type {0:#04x}")]
    UnknownKeyType(u8),
    /// HKDF was asked for more than 255 blocks of output.
    #[error("HKDF output length is wrong")]
    HkdfInvalidLength,
}

impl From<aes_gcm::aead::Error> for CryptoError {
    fn from(_: aes_gcm::aead::Error) -> Self {
        CryptoError::AuthenticationFailed
    }
}

impl From<hkdf::InvalidLength> for CryptoError {
    fn from(_: hkdf::InvalidLength) -> Self {
        CryptoError::HkdfInvalidLength
    }
}
