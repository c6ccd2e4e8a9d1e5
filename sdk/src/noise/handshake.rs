//! Symmetric half of the Noise handshake.
//!
//! [`HandshakeState`] carries the transcript hash, the HKDF salt (the Noise
//! chaining key) and the current AEAD key. Both roles fold exactly the same
//! wire bytes in the same order; any divergence surfaces as an AEAD failure
//! on the next encrypted field.

use {
    super::{HandshakeError, PROTOCOL_NAME},
    crate::crypto::{
        frame_cipher::{FrameCipher, NonceCounter},
        kdf::{self, HASH_LEN},
    },
    std::fmt,
    zeroize::{Zeroize, ZeroizeOnDrop},
};

/// Which side of the handshake derives the keys. Only decides how the final
/// split is assigned to `write_key` and `read_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// The two directional AES‑256 keys produced by [`HandshakeState::split`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TransportKeys {
    pub write_key: [u8; 32],
    pub read_key: [u8; 32],
}

impl fmt::Debug for TransportKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportKeys(<redacted>)")
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HandshakeState {
    hash: [u8; HASH_LEN],
    salt: [u8; HASH_LEN],
    cipher_key: [u8; HASH_LEN],
    #[zeroize(skip)]
    counter: NonceCounter,
}

impl HandshakeState {
    /// Initialise with the padded protocol name and fold in `prologue`.
    pub fn new(prologue: &[u8]) -> Self {
        let mut state = Self {
            hash: *PROTOCOL_NAME,
            salt: *PROTOCOL_NAME,
            cipher_key: *PROTOCOL_NAME,
            counter: NonceCounter::new(),
        };
        state.update_hash(prologue);
        state
    }

    /// `hash = SHA256(hash || data)`.
    pub fn update_hash(&mut self, data: &[u8]) {
        self.hash = kdf::sha256(&[self.hash.as_slice(), data]);
    }

    /// Mix a DH output into the key schedule and restart the nonce counter.
    pub fn mix_into_key(&mut self, input_key_material: &[u8]) -> Result<(), HandshakeError> {
        let (salt, cipher_key) = kdf::derive_pair(Some(&self.salt), input_key_material, &[])?;
        self.salt = salt;
        self.cipher_key = cipher_key;
        self.counter.reset();
        Ok(())
    }

    /// Encrypt with the transcript hash as associated data, then fold the
    /// ciphertext into the transcript.
    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let counter = self.counter.next()?;
        let ciphertext = FrameCipher::new(&self.cipher_key).encrypt(counter, &self.hash, plaintext)?;
        self.update_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// Decrypt with the transcript hash as associated data, then fold the
    /// ciphertext (the input, not the plaintext) into the transcript.
    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let counter = self.counter.next()?;
        let plaintext = FrameCipher::new(&self.cipher_key).decrypt(counter, &self.hash, ciphertext)?;
        self.update_hash(ciphertext);
        Ok(plaintext)
    }

    /// Dispatch to [`Self::encrypt_and_hash`] or [`Self::decrypt_and_hash`].
    pub fn cipher(&mut self, bytes: &[u8], encrypt: bool) -> Result<Vec<u8>, HandshakeError> {
        if encrypt {
            self.encrypt_and_hash(bytes)
        } else {
            self.decrypt_and_hash(bytes)
        }
    }

    /// Derive the transport keys and consume the state.
    ///
    /// The initiator writes with the first half of the expansion; the
    /// responder writes with the second.
    pub fn split(self, role: Role) -> Result<TransportKeys, HandshakeError> {
        let (first, second) = kdf::derive_pair(Some(&self.salt), &[], &[])?;
        let keys = match role {
            Role::Initiator => TransportKeys {
                write_key: first,
                read_key: second,
            },
            Role::Responder => TransportKeys {
                write_key: second,
                read_key: first,
            },
        };
        Ok(keys)
    }

    /// Current transcript hash.
    pub fn hash(&self) -> &[u8; HASH_LEN] {
        &self.hash
    }
}
