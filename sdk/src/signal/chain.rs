//! Symmetric ratchet keys.
//!
//! ```text
//!   RootKey ──create_chain(DH)──► (RootKey', ChainKey₀)
//!   ChainKeyₙ ──HMAC 0x02──► ChainKeyₙ₊₁
//!   ChainKeyₙ ──HMAC 0x01──► seed ──HKDF──► MessageKeyₙ
//! ```
//!
//! Group sender chains step the same way but expand the seed under their own
//! HKDF label.

use {
    super::SessionError,
    crate::crypto::{kdf, CryptoError, FrameCipher, KeyPair},
    serde::{Deserialize, Serialize},
    std::fmt,
    subtle::ConstantTimeEq,
    x25519_dalek::PublicKey,
    zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing},
};

const MESSAGE_KEY_SEED: [u8; 1] = [0x01];
const CHAIN_KEY_SEED: [u8; 1] = [0x02];
const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";
const RATCHET_INFO: &[u8] = b"WhisperRatchet";
const GROUP_MESSAGE_KEYS_INFO: &[u8] = b"WhisperGroup";

// === Chain key ===

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    index: u32,
    key: [u8; 32],
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { index, key }
    }

    /// Position of the next message key this chain produces.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// The following chain key. Fails once the index would overflow.
    pub fn next(&self) -> Result<ChainKey, SessionError> {
        let index = self
            .index
            .checked_add(1)
            .ok_or(SessionError::ChainExhausted)?;
        Ok(ChainKey {
            index,
            key: kdf::hmac_sha256(&self.key, &CHAIN_KEY_SEED),
        })
    }

    /// The message key at this chain position.
    pub fn message_key(&self) -> Result<MessageKey, SessionError> {
        self.expand_message_key(MESSAGE_KEYS_INFO)
    }

    /// The message key at this position of a group sender chain.
    pub fn sender_message_key(&self) -> Result<MessageKey, SessionError> {
        self.expand_message_key(GROUP_MESSAGE_KEYS_INFO)
    }

    fn expand_message_key(&self, info: &[u8]) -> Result<MessageKey, SessionError> {
        let seed = Zeroizing::new(kdf::hmac_sha256(&self.key, &MESSAGE_KEY_SEED));
        let okm = kdf::hkdf(None, seed.as_slice(), info, 32)?;
        let mut cipher_key = [0u8; 32];
        cipher_key.copy_from_slice(&okm);
        Ok(MessageKey {
            index: self.index,
            cipher_key,
        })
    }
}

impl PartialEq for ChainKey {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && bool::from(self.key.ct_eq(&other.key))
    }
}

impl Eq for ChainKey {}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainKey")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

// === Message key ===

/// Key for exactly one message. Dropped (and wiped) after use.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct MessageKey {
    index: u32,
    cipher_key: [u8; 32],
}

impl MessageKey {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// AES‑256‑GCM with the message index as nonce counter.
    pub fn encrypt(&self, associated_data: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        FrameCipher::new(&self.cipher_key).encrypt(u64::from(self.index), associated_data, plaintext)
    }

    pub fn decrypt(
        &self,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        FrameCipher::new(&self.cipher_key).decrypt(
            u64::from(self.index),
            associated_data,
            ciphertext,
        )
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKey")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

// === Root key ===

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RootKey([u8; 32]);

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.0
    }

    /// One DH ratchet step: mix `DH(ours, theirs)` into the root and start a
    /// new chain at index zero.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &KeyPair,
    ) -> Result<(RootKey, ChainKey), SessionError> {
        let shared = our_ratchet_key.diffie_hellman(their_ratchet_key);
        let (root, chain) = kdf::derive_pair(Some(&self.0), shared.as_slice(), RATCHET_INFO)?;
        Ok((RootKey(root), ChainKey::new(chain, 0)))
    }
}

impl PartialEq for RootKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for RootKey {}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_next_advances_index_and_key() {
        let chain = ChainKey::new([7u8; 32], 0);
        let next = chain.next().unwrap();
        assert_eq!(next.index(), 1);
        assert_ne!(next.key(), chain.key());
        // Deterministic.
        assert_eq!(chain.next().unwrap(), next);
    }

    #[test]
    fn test_message_key_is_not_the_chain_key() {
        let chain = ChainKey::new([7u8; 32], 4);
        let message_key = chain.message_key().unwrap();
        assert_eq!(message_key.index(), 4);
        assert_ne!(&message_key.cipher_key, chain.key());
        assert_ne!(&message_key.cipher_key, chain.next().unwrap().key());
    }

    #[test]
    fn test_group_and_pairwise_keys_differ() {
        let chain = ChainKey::new([5u8; 32], 9);
        let pairwise = chain.message_key().unwrap();
        let group = chain.sender_message_key().unwrap();
        assert_eq!(group.index(), 9);
        assert_ne!(group.cipher_key, pairwise.cipher_key);
    }

    #[test]
    fn test_chain_exhaustion() {
        let chain = ChainKey::new([1u8; 32], u32::MAX);
        assert_matches!(chain.next(), Err(SessionError::ChainExhausted));
    }

    #[test]
    fn test_message_key_binds_index_and_ad() {
        let key = ChainKey::new([3u8; 32], 0).message_key().unwrap();
        let ciphertext = key.encrypt(b"ad", b"hello").unwrap();
        assert_eq!(key.decrypt(b"ad", &ciphertext).unwrap(), b"hello");
        assert_matches!(
            key.decrypt(b"other", &ciphertext),
            Err(CryptoError::AuthenticationFailed)
        );

        let same_key_other_index = MessageKey {
            index: 1,
            cipher_key: key.cipher_key,
        };
        assert!(same_key_other_index.decrypt(b"ad", &ciphertext).is_err());
    }

    #[test]
    fn test_create_chain_agrees_on_both_sides() {
        let root = RootKey::new([9u8; 32]);
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let (alice_root, alice_chain) = root.create_chain(bob.public(), &alice).unwrap();
        let (bob_root, bob_chain) = root.create_chain(alice.public(), &bob).unwrap();
        assert_eq!(alice_root, bob_root);
        assert_eq!(alice_chain, bob_chain);
        assert_eq!(alice_chain.index(), 0);
        assert_ne!(alice_root, root);
    }
}
