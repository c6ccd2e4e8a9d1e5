//! # Noise XX handshake (client side)
//!
//! `Noise_XX_25519_AESGCM_SHA256` as spoken by the chat server: both parties
//! exchange ephemeral keys in the clear and their static keys encrypted
//! under ephemeral‑derived keys, which authenticates both ends.
//!
//! ```text
//! client                                         server
//! ──────────────────────────────────────────────────────
//! prologue || ClientHello { e }          ──►
//!                                        ◄──  ServerHello { e, enc(s), enc(payload) }
//! ClientFinish { enc(s), enc(payload) }  ──►
//!             split() → TransportKeys { write_key, read_key }
//! ```
//!
//! * [`handshake`] holds the symmetric state (transcript hash, salt and
//!   cipher key) shared by both roles.
//! * [`client`] drives the initiator state machine.
//! * [`codec`] turns [`HandshakeMessage`]s into bytes and back.
//! * [`config`] selects the prologue and the codec.

use {
    crate::crypto::CryptoError,
    thiserror::Error,
    x25519_dalek::PublicKey,
};

pub mod client;
pub mod codec;
pub mod config;
pub mod handshake;

pub use {
    client::{ClientState, HandshakeOutcome, NoiseHandshake},
    codec::{CborHandshakeCodec, HandshakeCodec, HandshakeMessage},
    config::{NoiseConfig, NoiseConfigBuilder, Prologue},
    handshake::{HandshakeState, Role, TransportKeys},
};

/// Protocol name, zero padded to exactly one hash length.
pub const PROTOCOL_NAME: &[u8; 32] = b"Noise_XX_25519_AESGCM_SHA256\0\0\0\0";

// === Error handling ===

/// A failed handshake. Every variant is fatal to the connection attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandshakeError {
    /// AEAD failure: transcript mismatch or a tampered message.
    #[error("handshake crypto failure: {0}")]
    Crypto(#[from] CryptoError),
    /// The peer's bytes could not be decoded into a handshake message.
    #[error("malformed handshake message: {0}")]
    Codec(String),
    /// A well‑formed message arrived out of order.
    #[error("unexpected handshake message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },
    /// The engine was driven from the wrong state.
    #[error("handshake is in state {0:?}")]
    InvalidState(ClientState),
    /// The peer sent a key that is not a usable X25519 point.
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Reject keys whose encoding is not 32 bytes or that are the identity point.
pub(crate) fn validate_public_key(bytes: &[u8]) -> Result<PublicKey, HandshakeError> {
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| HandshakeError::InvalidPublicKey)?;
    if raw == [0u8; 32] {
        return Err(HandshakeError::InvalidPublicKey);
    }
    Ok(PublicKey::from(raw))
}
