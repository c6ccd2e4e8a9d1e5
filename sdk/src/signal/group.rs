//! Group messaging with sender keys.
//!
//! Every member owns one sender chain per group. It hands the chain's current
//! seed and its signing public key to the other members in a
//! [`SenderKeyDistributionMessage`], sent over the pairwise sessions. A group
//! message is then encrypted once under the sender's chain and signed with
//! the sender's signing key:
//!
//! ```text
//!   SenderChainKeyₙ ──HMAC 0x01──► seed ──HKDF "WhisperGroup"──► key for iteration n
//!   SenderChainKeyₙ ──HMAC 0x02──► SenderChainKeyₙ₊₁
//! ```
//!
//! Receivers recover from out‑of‑order delivery the same way pairwise
//! sessions do: keys skipped over are cached, bounded by
//! [`RatchetConfig::max_message_keys`], and a message may run at most
//! [`RatchetConfig::max_forward_jump`] iterations ahead.

use {
    super::{
        address::ProtocolAddress,
        chain::{ChainKey, MessageKey},
        config::RatchetConfig,
        locks::KeyedLocks,
        store::SenderKeyStore,
        DecryptionFailure,
        SessionError,
    },
    crate::{
        bounded::BoundedLru,
        crypto::{
            keys::{self, serde_public_key, SIGNATURE_LEN},
            IdentityKeyPair,
        },
    },
    log::{debug, warn},
    rand::{rngs::OsRng, RngCore},
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    serde_big_array::BigArray,
    std::{collections::VecDeque, fmt, sync::Arc},
    x25519_dalek::PublicKey,
};

/// Version of sender key messages produced and accepted here.
pub const SENDER_KEY_MESSAGE_VERSION: u8 = 3;

// === Names ===

/// A sender device within a group. Displayed as `group_id::name.device_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderKeyName {
    group_id: String,
    sender: ProtocolAddress,
}

impl SenderKeyName {
    pub fn new(group_id: impl Into<String>, sender: ProtocolAddress) -> Self {
        Self {
            group_id: group_id.into(),
            sender,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn sender(&self) -> &ProtocolAddress {
        &self.sender
    }
}

impl fmt::Display for SenderKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.group_id, self.sender)
    }
}

// === State and record ===

/// One sender chain of a group member, identified by a random key id.
///
/// Only the owner keeps the signing private key. Receivers keep the public
/// half plus the message keys they skipped over.
#[derive(Clone, Serialize, Deserialize)]
pub struct SenderKeyState {
    key_id: u32,
    chain_key: ChainKey,
    #[serde(with = "serde_public_key")]
    signing_key: PublicKey,
    signing_key_pair: Option<IdentityKeyPair>,
    message_keys: BoundedLru<u32, MessageKey>,
}

impl SenderKeyState {
    /// A chain owned by this device, with a fresh seed and signing key.
    pub fn generate(config: &RatchetConfig) -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let signing_key_pair = IdentityKeyPair::generate();
        Self {
            key_id: OsRng.next_u32() & 0x7fff_ffff,
            chain_key: ChainKey::new(seed, 0),
            signing_key: *signing_key_pair.public_key(),
            signing_key_pair: Some(signing_key_pair),
            message_keys: BoundedLru::new(config.max_message_keys),
        }
    }

    /// Another member's chain, as announced by its distribution message.
    pub fn from_distribution(
        message: &SenderKeyDistributionMessage,
        config: &RatchetConfig,
    ) -> Self {
        Self {
            key_id: message.key_id,
            chain_key: ChainKey::new(message.chain_key, message.iteration),
            signing_key: message.signing_key,
            signing_key_pair: None,
            message_keys: BoundedLru::new(config.max_message_keys),
        }
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }

    pub fn set_chain_key(&mut self, chain_key: ChainKey) {
        self.chain_key = chain_key;
    }

    pub fn signing_key(&self) -> &PublicKey {
        &self.signing_key
    }

    pub fn signing_key_pair(&self) -> Option<&IdentityKeyPair> {
        self.signing_key_pair.as_ref()
    }

    pub fn take_message_key(&mut self, iteration: u32) -> Option<MessageKey> {
        self.message_keys.remove(&iteration)
    }

    /// Cache a skipped key, returning the evicted one if the cache was full.
    pub fn set_message_key(&mut self, message_key: MessageKey) -> Option<MessageKey> {
        self.message_keys
            .insert(message_key.index(), message_key)
            .map(|(_, evicted)| evicted)
    }

    pub fn message_key_count(&self) -> usize {
        self.message_keys.len()
    }

    /// What other members need to decrypt this chain from its current
    /// iteration on.
    pub fn distribution_message(&self) -> SenderKeyDistributionMessage {
        SenderKeyDistributionMessage {
            version: SENDER_KEY_MESSAGE_VERSION,
            key_id: self.key_id,
            iteration: self.chain_key.index(),
            chain_key: *self.chain_key.key(),
            signing_key: self.signing_key,
        }
    }
}

impl fmt::Debug for SenderKeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKeyState")
            .field("key_id", &self.key_id)
            .field("iteration", &self.chain_key.index())
            .field("signing_key", &hex::encode(self.signing_key.as_bytes()))
            .field("owned", &self.signing_key_pair.is_some())
            .field("message_keys", &self.message_keys.len())
            .finish()
    }
}

/// The sender key states of one [`SenderKeyName`], newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
    max_states: usize,
}

impl SenderKeyRecord {
    pub fn new_fresh(config: &RatchetConfig) -> Self {
        Self {
            states: VecDeque::new(),
            max_states: config.max_sender_key_states.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// The newest state.
    pub fn state(&self) -> Option<&SenderKeyState> {
        self.states.front()
    }

    pub fn state_for(&self, key_id: u32) -> Option<&SenderKeyState> {
        self.states.iter().find(|state| state.key_id == key_id)
    }

    /// Make `state` the newest, replacing any state with the same key id and
    /// dropping the oldest beyond the cap.
    pub fn add_state(&mut self, state: SenderKeyState) {
        self.states.retain(|existing| existing.key_id != state.key_id);
        self.states.push_front(state);
        while self.states.len() > self.max_states {
            if let Some(dropped) = self.states.pop_back() {
                debug!("Dropping sender key state {}", dropped.key_id);
            }
        }
    }

    /// Write back a state taken from this record, keeping its position.
    pub fn set_state(&mut self, state: SenderKeyState) {
        match self.states.iter_mut().find(|existing| existing.key_id == state.key_id) {
            Some(slot) => *slot = state,
            None => self.add_state(state),
        }
    }
}

// === Wire messages ===

/// Announces a sender chain to the other members of a group.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyDistributionMessage {
    pub version: u8,
    pub key_id: u32,
    pub iteration: u32,
    pub chain_key: [u8; 32],
    #[serde(with = "serde_public_key")]
    pub signing_key: PublicKey,
}

impl SenderKeyDistributionMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, SessionError> {
        to_cbor(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SessionError> {
        let message: Self = from_cbor(bytes)?;
        if message.version != SENDER_KEY_MESSAGE_VERSION {
            return Err(SessionError::InvalidMessage("unsupported message version"));
        }
        Ok(message)
    }
}

impl fmt::Debug for SenderKeyDistributionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKeyDistributionMessage")
            .field("version", &self.version)
            .field("key_id", &self.key_id)
            .field("iteration", &self.iteration)
            .field("signing_key", &hex::encode(self.signing_key.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// A group message, signed by the sender's signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyMessage {
    pub version: u8,
    pub key_id: u32,
    pub iteration: u32,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "BigArray")]
    pub signature: [u8; SIGNATURE_LEN],
}

impl SenderKeyMessage {
    /// `version || key_id || iteration`, authenticated by the ciphertext.
    pub fn header_bytes(&self) -> Vec<u8> {
        header_bytes(self.version, self.key_id, self.iteration)
    }

    /// Header and ciphertext, the part covered by the signature.
    fn signed_bytes(&self) -> Vec<u8> {
        [self.header_bytes().as_slice(), self.ciphertext.as_slice()].concat()
    }

    pub fn verify_signature(&self, signing_key: &PublicKey) -> bool {
        keys::verify_signature(signing_key, &self.signed_bytes(), &self.signature)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, SessionError> {
        to_cbor(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SessionError> {
        let message: Self = from_cbor(bytes)?;
        if message.version != SENDER_KEY_MESSAGE_VERSION {
            return Err(SessionError::InvalidMessage("unsupported message version"));
        }
        Ok(message)
    }
}

fn header_bytes(version: u8, key_id: u32, iteration: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 4);
    out.push(version);
    out.extend_from_slice(&key_id.to_be_bytes());
    out.extend_from_slice(&iteration.to_be_bytes());
    out
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, SessionError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| SessionError::Codec(e.to_string()))?;
    Ok(out)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SessionError> {
    ciborium::from_reader(bytes).map_err(|e| SessionError::Codec(e.to_string()))
}

// === Engine ===

/// Encrypts for and decrypts from groups. Like [`SessionCipher`], every
/// operation runs under a lock per [`SenderKeyName`] and a failed decryption
/// leaves the stored record untouched.
///
/// [`SessionCipher`]: super::SessionCipher
pub struct GroupCipher {
    store: Arc<dyn SenderKeyStore>,
    config: RatchetConfig,
    names: KeyedLocks<SenderKeyName>,
}

impl GroupCipher {
    pub fn new(store: Arc<dyn SenderKeyStore>) -> Self {
        Self {
            store,
            config: RatchetConfig::default(),
            names: KeyedLocks::default(),
        }
    }

    pub fn with_config(mut self, config: RatchetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RatchetConfig {
        &self.config
    }

    /// Our own sender key for `name`, created on first use, as a message for
    /// the other members.
    pub fn create_distribution_message(
        &self,
        name: &SenderKeyName,
    ) -> Result<SenderKeyDistributionMessage, SessionError> {
        self.names.with_lock(name, || -> Result<_, SessionError> {
            let mut record = self.load_or_fresh(name)?;
            let owned = record
                .state()
                .filter(|state| state.signing_key_pair().is_some())
                .map(SenderKeyState::distribution_message);
            if let Some(message) = owned {
                return Ok(message);
            }

            let state = SenderKeyState::generate(&self.config);
            let message = state.distribution_message();
            record.add_state(state);
            self.store.store_sender_key(name, &record)?;
            debug!("Created sender key {} for {name}", message.key_id);
            Ok(message)
        })
    }

    /// Remember another member's sender chain.
    pub fn process_distribution_message(
        &self,
        name: &SenderKeyName,
        message: &SenderKeyDistributionMessage,
    ) -> Result<(), SessionError> {
        if message.version != SENDER_KEY_MESSAGE_VERSION {
            return Err(SessionError::InvalidMessage("unsupported message version"));
        }
        self.names.with_lock(name, || -> Result<_, SessionError> {
            let mut record = self.load_or_fresh(name)?;
            record.add_state(SenderKeyState::from_distribution(message, &self.config));
            self.store.store_sender_key(name, &record)?;
            debug!(
                "Stored sender key {} for {name} at iteration {}",
                message.key_id, message.iteration
            );
            Ok(())
        })
    }

    pub fn encrypt(
        &self,
        name: &SenderKeyName,
        plaintext: &[u8],
    ) -> Result<SenderKeyMessage, SessionError> {
        self.names.with_lock(name, || -> Result<_, SessionError> {
            let mut record = self.load_or_fresh(name)?;
            let mut state = record
                .state()
                .filter(|state| state.signing_key_pair().is_some())
                .cloned()
                .ok_or_else(|| SessionError::NoSenderKey(name.clone()))?;

            let message = encrypt_state(&mut state, plaintext)?;
            record.set_state(state);
            self.store.store_sender_key(name, &record)?;
            Ok(message)
        })
    }

    pub fn decrypt(
        &self,
        name: &SenderKeyName,
        message: &SenderKeyMessage,
    ) -> Result<Vec<u8>, SessionError> {
        if message.version != SENDER_KEY_MESSAGE_VERSION {
            return Err(DecryptionFailure::VersionMismatch {
                expected: SENDER_KEY_MESSAGE_VERSION,
                actual: message.version,
            }
            .into());
        }

        self.names.with_lock(name, || -> Result<_, SessionError> {
            let mut record = self.load_or_fresh(name)?;
            if record.is_empty() {
                return Err(SessionError::NoSenderKey(name.clone()));
            }
            let mut state = record
                .state_for(message.key_id)
                .cloned()
                .ok_or(SessionError::MissingSenderKey(message.key_id))?;

            if !message.verify_signature(state.signing_key()) {
                warn!("Bad signature on group message {} from {name}", message.iteration);
                return Err(SessionError::InvalidSignature);
            }

            let message_key = sender_message_key(&mut state, message.iteration, &self.config)?;
            let plaintext = message_key
                .decrypt(&message.header_bytes(), &message.ciphertext)
                .map_err(|_| {
                    warn!("Group message {} from {name} did not decrypt", message.iteration);
                    DecryptionFailure::Authentication
                })?;

            record.set_state(state);
            self.store.store_sender_key(name, &record)?;
            Ok(plaintext)
        })
    }

    fn load_or_fresh(&self, name: &SenderKeyName) -> Result<SenderKeyRecord, SessionError> {
        Ok(self
            .store
            .load_sender_key(name)?
            .unwrap_or_else(|| SenderKeyRecord::new_fresh(&self.config)))
    }
}

impl fmt::Debug for GroupCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCipher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// === Steps on a single state ===

fn encrypt_state(
    state: &mut SenderKeyState,
    plaintext: &[u8],
) -> Result<SenderKeyMessage, SessionError> {
    let signing_key_pair = state
        .signing_key_pair()
        .cloned()
        .ok_or(SessionError::InvalidMessage("sender key state cannot sign"))?;
    let chain_key = state.chain_key().clone();
    let message_key = chain_key.sender_message_key()?;
    let next_chain_key = chain_key.next()?;

    let header = header_bytes(SENDER_KEY_MESSAGE_VERSION, state.key_id(), chain_key.index());
    let mut message = SenderKeyMessage {
        version: SENDER_KEY_MESSAGE_VERSION,
        key_id: state.key_id(),
        iteration: chain_key.index(),
        ciphertext: message_key.encrypt(&header, plaintext)?,
        signature: [0u8; SIGNATURE_LEN],
    };
    message.signature = signing_key_pair.sign(&message.signed_bytes());

    state.set_chain_key(next_chain_key);
    Ok(message)
}

/// The key for `iteration`, caching every key skipped on the way.
fn sender_message_key(
    state: &mut SenderKeyState,
    iteration: u32,
    config: &RatchetConfig,
) -> Result<MessageKey, SessionError> {
    let current = state.chain_key().index();
    if iteration < current {
        return state
            .take_message_key(iteration)
            .ok_or_else(|| DecryptionFailure::DuplicateMessage { index: iteration }.into());
    }
    if iteration - current > config.max_forward_jump {
        return Err(DecryptionFailure::TooFarInFuture {
            index: iteration,
            current,
        }
        .into());
    }

    let mut chain_key = state.chain_key().clone();
    while chain_key.index() < iteration {
        if let Some(evicted) = state.set_message_key(chain_key.sender_message_key()?) {
            warn!("Sender key cache full, dropped key {}", evicted.index());
        }
        chain_key = chain_key.next()?;
    }
    let message_key = chain_key.sender_message_key()?;
    state.set_chain_key(chain_key.next()?);
    Ok(message_key)
}
