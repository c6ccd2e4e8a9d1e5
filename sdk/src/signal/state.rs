//! Per‑session ratchet state.
//!
//! A [`SessionState`] has exactly one sender chain and a bounded set of
//! receiver chains keyed by the peer's ratchet public key. Every receiver
//! chain keeps a bounded cache of message keys skipped over by out‑of‑order
//! delivery.

use {
    super::chain::{ChainKey, MessageKey, RootKey},
    crate::{
        bounded::BoundedLru,
        crypto::{keys::serde_public_key, KeyPair},
    },
    log::warn,
    serde::{Deserialize, Serialize},
    std::fmt,
    x25519_dalek::PublicKey,
};

// === Chains ===

/// A sending or receiving symmetric chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionChain {
    #[serde(with = "serde_public_key")]
    ratchet_key: PublicKey,
    /// Only the sender chain knows its ratchet private key.
    ratchet_key_pair: Option<KeyPair>,
    chain_key: ChainKey,
    message_keys: BoundedLru<u32, MessageKey>,
}

impl SessionChain {
    pub fn sender(ratchet_key_pair: KeyPair, chain_key: ChainKey) -> Self {
        Self {
            ratchet_key: *ratchet_key_pair.public(),
            ratchet_key_pair: Some(ratchet_key_pair),
            chain_key,
            // A sender never skips its own keys.
            message_keys: BoundedLru::new(1),
        }
    }

    pub fn receiver(ratchet_key: PublicKey, chain_key: ChainKey, max_message_keys: usize) -> Self {
        Self {
            ratchet_key,
            ratchet_key_pair: None,
            chain_key,
            message_keys: BoundedLru::new(max_message_keys),
        }
    }

    pub fn ratchet_key(&self) -> &PublicKey {
        &self.ratchet_key
    }

    pub fn ratchet_key_pair(&self) -> Option<&KeyPair> {
        self.ratchet_key_pair.as_ref()
    }

    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }

    pub fn set_chain_key(&mut self, chain_key: ChainKey) {
        self.chain_key = chain_key;
    }

    /// Remove and return the cached key for `index`. A key is handed out at
    /// most once.
    pub fn take_message_key(&mut self, index: u32) -> Option<MessageKey> {
        self.message_keys.remove(&index)
    }

    /// Cache a skipped message key, returning the evicted one if the cache
    /// was full.
    pub fn set_message_key(&mut self, message_key: MessageKey) -> Option<MessageKey> {
        self.message_keys
            .insert(message_key.index(), message_key)
            .map(|(_, evicted)| evicted)
    }

    pub fn has_message_key(&self, index: u32) -> bool {
        self.message_keys.contains(&index)
    }

    pub fn message_key_count(&self) -> usize {
        self.message_keys.len()
    }
}

impl fmt::Debug for SessionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionChain")
            .field("ratchet_key", &hex::encode(self.ratchet_key.as_bytes()))
            .field("index", &self.chain_key.index())
            .field("message_keys", &self.message_keys.len())
            .finish()
    }
}

// === Pending handshakes ===

/// Set on the initiator until the first reply arrives. While present every
/// outgoing message is wrapped in a `PreKeySignalMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    #[serde(with = "serde_public_key")]
    pub base_key: PublicKey,
}

/// Legacy in‑band key exchange. Carried so stored records keep it, never
/// started by this crate.
#[derive(Clone, Serialize, Deserialize)]
pub struct PendingKeyExchange {
    pub sequence: u32,
    pub local_base_key: KeyPair,
    pub local_ratchet_key: KeyPair,
}

impl fmt::Debug for PendingKeyExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingKeyExchange")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

// === Session state ===

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    version: u8,
    #[serde(with = "serde_public_key")]
    local_identity: PublicKey,
    #[serde(with = "serde_public_key")]
    remote_identity: PublicKey,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: SessionChain,
    receiver_chains: BoundedLru<[u8; 32], SessionChain>,
    max_message_keys: usize,
    pending_key_exchange: Option<PendingKeyExchange>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    #[serde(with = "serde_public_key")]
    base_key: PublicKey,
    needs_refresh: bool,
}

/// Everything a freshly agreed session starts from.
pub struct SessionInit {
    pub version: u8,
    pub local_identity: PublicKey,
    pub remote_identity: PublicKey,
    pub root_key: RootKey,
    pub sender_chain: SessionChain,
    pub base_key: PublicKey,
    pub max_receiver_chains: usize,
    pub max_message_keys: usize,
}

impl SessionState {
    pub fn new(init: SessionInit) -> Self {
        Self {
            version: init.version,
            local_identity: init.local_identity,
            remote_identity: init.remote_identity,
            root_key: init.root_key,
            previous_counter: 0,
            sender_chain: init.sender_chain,
            receiver_chains: BoundedLru::new(init.max_receiver_chains),
            max_message_keys: init.max_message_keys,
            pending_key_exchange: None,
            pending_pre_key: None,
            local_registration_id: 0,
            remote_registration_id: 0,
            base_key: init.base_key,
            needs_refresh: false,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn local_identity_key(&self) -> &PublicKey {
        &self.local_identity
    }

    pub fn remote_identity_key(&self) -> &PublicKey {
        &self.remote_identity
    }

    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    /// Length of our previous sending chain, advertised in every header.
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn set_previous_counter(&mut self, previous_counter: u32) {
        self.previous_counter = previous_counter;
    }

    // --- sender chain ---

    pub fn sender_chain(&self) -> &SessionChain {
        &self.sender_chain
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        self.sender_chain.ratchet_key()
    }

    pub fn sender_ratchet_key_pair(&self) -> Option<&KeyPair> {
        self.sender_chain.ratchet_key_pair()
    }

    pub fn sender_chain_key(&self) -> &ChainKey {
        self.sender_chain.chain_key()
    }

    pub fn set_sender_chain_key(&mut self, chain_key: ChainKey) {
        self.sender_chain.set_chain_key(chain_key);
    }

    pub fn set_sender_chain(&mut self, ratchet_key_pair: KeyPair, chain_key: ChainKey) {
        self.sender_chain = SessionChain::sender(ratchet_key_pair, chain_key);
    }

    // --- receiver chains ---

    pub fn has_receiver_chain(&self, their_ratchet_key: &PublicKey) -> bool {
        self.receiver_chains.contains(their_ratchet_key.as_bytes())
    }

    /// Chain key of the receiver chain for `their_ratchet_key`, marking the
    /// chain most recently used.
    pub fn receiver_chain_key(&mut self, their_ratchet_key: &PublicKey) -> Option<ChainKey> {
        self.receiver_chains
            .get(their_ratchet_key.as_bytes())
            .map(|chain| chain.chain_key().clone())
    }

    /// Start a receiver chain. Adding a chain to a full set drops the least
    /// recently used one together with its skipped keys.
    pub fn add_receiver_chain(&mut self, their_ratchet_key: PublicKey, chain_key: ChainKey) {
        let chain = SessionChain::receiver(their_ratchet_key, chain_key, self.max_message_keys);
        if let Some((evicted, chain)) = self
            .receiver_chains
            .insert(their_ratchet_key.to_bytes(), chain)
        {
            warn!(
                "Dropping receiver chain {} with {} skipped keys",
                hex::encode(evicted),
                chain.message_key_count()
            );
        }
    }

    pub fn set_receiver_chain_key(
        &mut self,
        their_ratchet_key: &PublicKey,
        chain_key: ChainKey,
    ) -> bool {
        match self.receiver_chains.get_mut(their_ratchet_key.as_bytes()) {
            Some(chain) => {
                chain.set_chain_key(chain_key);
                true
            }
            None => false,
        }
    }

    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    pub fn take_message_key(
        &mut self,
        their_ratchet_key: &PublicKey,
        index: u32,
    ) -> Option<MessageKey> {
        self.receiver_chains
            .get_mut(their_ratchet_key.as_bytes())
            .and_then(|chain| chain.take_message_key(index))
    }

    /// Cache a skipped key on the receiver chain for `their_ratchet_key`.
    /// Returns `false` when there is no such chain.
    pub fn set_message_key(&mut self, their_ratchet_key: &PublicKey, message_key: MessageKey) -> bool {
        let Some(chain) = self.receiver_chains.get_mut(their_ratchet_key.as_bytes()) else {
            return false;
        };
        if let Some(evicted) = chain.set_message_key(message_key) {
            warn!(
                "Skipped message key cache full, dropped key for index {}",
                evicted.index()
            );
        }
        true
    }

    // --- handshake bookkeeping ---

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub fn set_pending_pre_key(&mut self, pending: PendingPreKey) {
        self.pending_pre_key = Some(pending);
    }

    pub fn clear_pending_pre_key(&mut self) {
        self.pending_pre_key = None;
    }

    pub fn pending_key_exchange(&self) -> Option<&PendingKeyExchange> {
        self.pending_key_exchange.as_ref()
    }

    pub fn clear_pending_key_exchange(&mut self) {
        self.pending_key_exchange = None;
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    /// The initiator's base key. Together with the version it identifies the
    /// handshake this state came from.
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    pub fn set_needs_refresh(&mut self, needs_refresh: bool) {
        self.needs_refresh = needs_refresh;
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("version", &self.version)
            .field("base_key", &hex::encode(self.base_key.as_bytes()))
            .field("previous_counter", &self.previous_counter)
            .field("sender_chain", &self.sender_chain)
            .field("receiver_chains", &self.receiver_chains.len())
            .field("pending_pre_key", &self.pending_pre_key.is_some())
            .finish_non_exhaustive()
    }
}
