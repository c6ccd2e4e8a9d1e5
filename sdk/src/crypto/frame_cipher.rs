//! AES‑256‑GCM encryption of a single frame.
//!
//! The 96‑bit nonce is all zeroes except for its low‑order eight bytes, which
//! carry the big‑endian frame counter:
//!
//! ```text
//! [00 00 00 00 | c7 c6 c5 c4 c3 c2 c1 c0]
//! ```
//!
//! The counter belongs to the caller (the handshake or one direction of the
//! transport) and must never repeat under the same key. [`NonceCounter`]
//! hands out counters and refuses to wrap.

use {
    super::CryptoError,
    aes_gcm::{
        aead::{Aead, KeyInit, Payload},
        Aes256Gcm,
        Key,
        Nonce,
    },
    std::fmt,
};

/// AES‑256 key size.
pub const KEY_LEN: usize = 32;
/// GCM nonce size.
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag size, appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Build the 12‑byte nonce for `counter`.
#[inline]
pub fn nonce_for(counter: u64) -> [u8; NONCE_LEN] {
    let mut out = [0u8; NONCE_LEN];
    out[NONCE_LEN - 8..].copy_from_slice(&counter.to_be_bytes());
    out
}

/// An AES‑256‑GCM instance bound to one key.
#[derive(Clone)]
pub struct FrameCipher {
    cipher: Aes256Gcm,
}

impl FrameCipher {
    /// Key a new cipher.
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Key a new cipher from a slice, rejecting anything but 32 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        let key: &[u8; KEY_LEN] =
            key.try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: key.len(),
                })?;
        Ok(Self::new(key))
    }

    /// Encrypt `plaintext`, returning `ciphertext || tag`.
    pub fn encrypt(
        &self,
        counter: u64,
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = nonce_for(counter);
        let ciphertext = self.cipher.encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )?;
        Ok(ciphertext)
    }

    /// Decrypt and authenticate `ciphertext || tag`.
    pub fn decrypt(
        &self,
        counter: u64,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::AuthenticationFailed);
        }
        let nonce = nonce_for(counter);
        let plaintext = self.cipher.decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )?;
        Ok(plaintext)
    }
}

impl fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameCipher(<redacted>)")
    }
}

/// One‑shot `encrypt(key, associated_data, counter, plaintext)`.
pub fn encrypt(
    key: &[u8; KEY_LEN],
    associated_data: &[u8],
    counter: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    FrameCipher::new(key).encrypt(counter, associated_data, plaintext)
}

/// One‑shot `decrypt(key, associated_data, counter, ciphertext)`.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    associated_data: &[u8],
    counter: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    FrameCipher::new(key).decrypt(counter, associated_data, ciphertext)
}

/// Strictly monotonic per‑direction frame counter.
#[derive(Debug, Default, Clone)]
pub struct NonceCounter {
    next: u64,
}

impl NonceCounter {
    /// A counter that starts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter that starts at `value`.
    pub fn starting_at(value: u64) -> Self {
        Self { next: value }
    }

    /// Return the current value and advance.
    ///
    /// Fails with [`CryptoError::CounterExhausted`] instead of wrapping.
    pub fn next(&mut self) -> Result<u64, CryptoError> {
        let current = self.next;
        self.next = current
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted)?;
        Ok(current)
    }

    /// The value the next call to [`NonceCounter::next`] returns.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Restart at zero. Only valid together with a key change.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}
