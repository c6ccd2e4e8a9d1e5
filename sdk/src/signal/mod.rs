//! # Signal Double Ratchet
//!
//! End‑to‑end sessions between devices, layered on top of the transport.
//!
//! * [`builder`] establishes a session from a [`PreKeyBundle`] (initiator)
//!   or from an incoming [`PreKeySignalMessage`] (responder), X3DH style.
//! * [`cipher`] is the engine: one encrypt or decrypt step per call, with the
//!   DH ratchet, skipped‑key recovery and per‑peer locking.
//! * [`state`] and [`record`] are the persistent per‑peer data.
//! * [`store`] defines the injected persistence and key‑material
//!   collaborators plus in‑memory implementations.
//! * [`group`] encrypts for groups with sender keys, announced to the
//!   members over the pairwise sessions.
//!
//! ## Example
//!
//! ```
//! use {
//!     secure_channel_sdk::signal::{
//!         InMemoryIdentityKeyStore, InMemorySessionStore, ProtocolAddress, SessionCipher,
//!     },
//!     std::sync::Arc,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let alice_ids = Arc::new(InMemoryIdentityKeyStore::generate(1));
//! let bob_ids = Arc::new(InMemoryIdentityKeyStore::generate(2));
//! let bob_bundle = bob_ids.generate_pre_key_bundle(1, 7, Some(11))?;
//!
//! let alice = SessionCipher::builder().build(Arc::new(InMemorySessionStore::new()), alice_ids);
//! let bob = SessionCipher::builder().build(Arc::new(InMemorySessionStore::new()), bob_ids);
//! let bob_addr = ProtocolAddress::new("bob", 1);
//! let alice_addr = ProtocolAddress::new("alice", 1);
//!
//! alice.process_pre_key_bundle(&bob_addr, &bob_bundle)?;
//! let message = alice.encrypt(&bob_addr, b"hello bob")?;
//! assert_eq!(bob.decrypt(&alice_addr, &message)?, b"hello bob");
//! # Ok(()) }
//! ```

use {crate::crypto::CryptoError, thiserror::Error};

pub mod address;
pub mod builder;
pub mod bundle;
pub mod chain;
pub mod cipher;
pub mod config;
pub mod group;
mod locks;
pub mod message;
pub mod record;
pub mod state;
pub mod store;

pub use {
    address::ProtocolAddress,
    bundle::{OneTimePreKey, PreKeyBundle, PreKeyRecord, SignedPreKeyRecord},
    cipher::{SessionCipher, SessionCipherBuilder},
    config::RatchetConfig,
    group::{
        GroupCipher,
        SenderKeyDistributionMessage,
        SenderKeyMessage,
        SenderKeyName,
        SenderKeyRecord,
        SenderKeyState,
    },
    message::{CiphertextMessage, PreKeySignalMessage, SignalMessage},
    record::SessionRecord,
    state::SessionState,
    store::{
        Direction,
        IdentityKeyStore,
        InMemoryIdentityKeyStore,
        InMemorySenderKeyStore,
        InMemorySessionStore,
        PreKeyBundleFetcher,
        SenderKeyStore,
        SessionStore,
    },
};

/// Message format version produced and accepted by this implementation.
pub const CIPHERTEXT_MESSAGE_VERSION: u8 = 3;

// === Error handling ===

/// Why a single message could not be decrypted. The session is left exactly
/// as it was before the attempt.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionFailure {
    /// No current or archived state could decrypt the message.
    #[error("no session state could decrypt the message")]
    NoValidState,
    /// The message key was already used, or evicted from the skipped cache.
    #[error("message {index} was already received or its key was evicted")]
    DuplicateMessage { index: u32 },
    #[error("message {index} is too far ahead of chain position {current}")]
    TooFarInFuture { index: u32, current: u32 },
    #[error("message authentication failed")]
    Authentication,
    #[error("message version {actual} does not match session version {expected}")]
    VersionMismatch { expected: u8, actual: u8 },
    #[error("session has no usable state")]
    UninitializedSession,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// There is no session and none could be established.
    #[error("no session with {0}")]
    NoSession(ProtocolAddress),
    /// The signed pre‑key signature of a bundle does not verify.
    #[error("signed pre-key signature is invalid")]
    InvalidSignature,
    #[error("identity key of {0} is not trusted")]
    UntrustedIdentity(ProtocolAddress),
    #[error("decryption failed: {0}")]
    DecryptionFailed(#[from] DecryptionFailure),
    #[error("signed pre-key {0} not found")]
    MissingSignedPreKey(u32),
    #[error("one-time pre-key {0} not found")]
    MissingPreKey(u32),
    /// Nothing to encrypt with, or nothing known about the sender.
    #[error("no sender key for {0}")]
    NoSenderKey(SenderKeyName),
    #[error("sender key {0} not found")]
    MissingSenderKey(u32),
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    /// A chain index would overflow. The session must be re‑established.
    #[error("chain key index exhausted")]
    ChainExhausted,
    #[error("message encoding failed: {0}")]
    Codec(String),
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),
    /// Failure reported by an injected store.
    #[error("store failure: {0}")]
    Store(String),
}
