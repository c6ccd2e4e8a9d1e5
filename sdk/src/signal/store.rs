//! Collaborators injected into [`SessionCipher`](super::SessionCipher) and
//! [`GroupCipher`](super::GroupCipher).
//!
//! Persistence of records and key material is the caller's business. The
//! in‑memory implementations here back the tests and small tools.

use {
    super::{
        address::ProtocolAddress,
        bundle::{PreKeyBundle, PreKeyRecord, SignedPreKeyRecord},
        group::{SenderKeyName, SenderKeyRecord},
        locks::lock,
        record::SessionRecord,
        SessionError,
    },
    crate::crypto::IdentityKeyPair,
    log::{debug, warn},
    std::{
        collections::HashMap,
        future::Future,
        sync::Mutex,
    },
    x25519_dalek::PublicKey,
};

/// Which way a message with the identity in question is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

// === Traits ===

/// Durable storage of one [`SessionRecord`] per peer device.
pub trait SessionStore: Send + Sync {
    fn load(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, SessionError>;

    fn store(&self, address: &ProtocolAddress, record: &SessionRecord) -> Result<(), SessionError>;

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, SessionError>;

    fn delete_session(&self, address: &ProtocolAddress) -> Result<(), SessionError>;
}

/// The local device's identity and pre‑keys, and the identities it has seen.
pub trait IdentityKeyStore: Send + Sync {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, SessionError>;

    fn local_registration_id(&self) -> Result<u32, SessionError>;

    fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, SessionError>;

    fn pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, SessionError>;

    /// Forget a one‑time pre‑key after it was used once.
    fn remove_pre_key(&self, id: u32) -> Result<(), SessionError>;

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &PublicKey,
        direction: Direction,
    ) -> Result<bool, SessionError>;

    /// Remember `identity` for `address`. Returns `true` if a different key
    /// was stored before.
    fn save_identity(
        &self,
        address: &ProtocolAddress,
        identity: &PublicKey,
    ) -> Result<bool, SessionError>;
}

/// Sender keys of group members, one [`SenderKeyRecord`] per group and
/// sender device.
pub trait SenderKeyStore: Send + Sync {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>, SessionError>;

    fn store_sender_key(
        &self,
        name: &SenderKeyName,
        record: &SenderKeyRecord,
    ) -> Result<(), SessionError>;
}

/// Fetches a peer's pre‑key bundle from a directory, typically over the
/// network.
pub trait PreKeyBundleFetcher: Send + Sync {
    fn fetch_pre_key_bundle(
        &self,
        address: &ProtocolAddress,
    ) -> impl Future<Output = Result<PreKeyBundle, SessionError>> + Send;
}

// === In-memory session store ===

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<ProtocolAddress, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, SessionError> {
        Ok(lock(&self.sessions).get(address).cloned())
    }

    fn store(&self, address: &ProtocolAddress, record: &SessionRecord) -> Result<(), SessionError> {
        lock(&self.sessions).insert(address.clone(), record.clone());
        Ok(())
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, SessionError> {
        Ok(lock(&self.sessions)
            .get(address)
            .is_some_and(|record| record.session_state().is_some()))
    }

    fn delete_session(&self, address: &ProtocolAddress) -> Result<(), SessionError> {
        lock(&self.sessions).remove(address);
        Ok(())
    }
}

// === In-memory sender key store ===

#[derive(Debug, Default)]
pub struct InMemorySenderKeyStore {
    records: Mutex<HashMap<SenderKeyName, SenderKeyRecord>>,
}

impl InMemorySenderKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SenderKeyStore for InMemorySenderKeyStore {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>, SessionError> {
        Ok(lock(&self.records).get(name).cloned())
    }

    fn store_sender_key(
        &self,
        name: &SenderKeyName,
        record: &SenderKeyRecord,
    ) -> Result<(), SessionError> {
        lock(&self.records).insert(name.clone(), record.clone());
        Ok(())
    }
}

// === In-memory identity store ===

/// Trust on first use: an address is bound to the first identity key seen
/// for it, and any other key is untrusted afterwards.
pub struct InMemoryIdentityKeyStore {
    identity: IdentityKeyPair,
    registration_id: u32,
    signed_pre_keys: Mutex<HashMap<u32, SignedPreKeyRecord>>,
    pre_keys: Mutex<HashMap<u32, PreKeyRecord>>,
    known_identities: Mutex<HashMap<ProtocolAddress, PublicKey>>,
}

impl InMemoryIdentityKeyStore {
    pub fn new(identity: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity,
            registration_id,
            signed_pre_keys: Mutex::default(),
            pre_keys: Mutex::default(),
            known_identities: Mutex::default(),
        }
    }

    /// A store with a freshly generated identity.
    pub fn generate(registration_id: u32) -> Self {
        Self::new(IdentityKeyPair::generate(), registration_id)
    }

    pub fn add_signed_pre_key(&self, record: SignedPreKeyRecord) {
        lock(&self.signed_pre_keys).insert(record.id, record);
    }

    pub fn add_pre_key(&self, record: PreKeyRecord) {
        lock(&self.pre_keys).insert(record.id, record);
    }

    pub fn has_pre_key(&self, id: u32) -> bool {
        lock(&self.pre_keys).contains_key(&id)
    }

    /// Generate and store a signed pre‑key (and optionally a one‑time
    /// pre‑key), then return the bundle to publish for `device_id`.
    pub fn generate_pre_key_bundle(
        &self,
        device_id: u32,
        signed_pre_key_id: u32,
        pre_key_id: Option<u32>,
    ) -> Result<PreKeyBundle, SessionError> {
        let signed = SignedPreKeyRecord::generate(signed_pre_key_id, &self.identity);
        let pre_key = pre_key_id.map(PreKeyRecord::generate);

        let bundle = PreKeyBundle {
            registration_id: self.registration_id,
            device_id,
            pre_key: pre_key.as_ref().map(PreKeyRecord::public),
            signed_pre_key_id,
            signed_pre_key_public: *signed.key_pair.public(),
            signed_pre_key_signature: signed.signature,
            identity_key: *self.identity.public_key(),
        };

        self.add_signed_pre_key(signed);
        if let Some(pre_key) = pre_key {
            self.add_pre_key(pre_key);
        }
        Ok(bundle)
    }
}

impl IdentityKeyStore for InMemoryIdentityKeyStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, SessionError> {
        Ok(self.identity.clone())
    }

    fn local_registration_id(&self) -> Result<u32, SessionError> {
        Ok(self.registration_id)
    }

    fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, SessionError> {
        Ok(lock(&self.signed_pre_keys).get(&id).cloned())
    }

    fn pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, SessionError> {
        Ok(lock(&self.pre_keys).get(&id).cloned())
    }

    fn remove_pre_key(&self, id: u32) -> Result<(), SessionError> {
        if lock(&self.pre_keys).remove(&id).is_some() {
            debug!("Removed one-time pre-key {id}");
        }
        Ok(())
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &PublicKey,
        _direction: Direction,
    ) -> Result<bool, SessionError> {
        Ok(lock(&self.known_identities)
            .get(address)
            .map_or(true, |known| known == identity))
    }

    fn save_identity(
        &self,
        address: &ProtocolAddress,
        identity: &PublicKey,
    ) -> Result<bool, SessionError> {
        let previous = lock(&self.known_identities).insert(address.clone(), *identity);
        let replaced = previous.is_some_and(|previous| previous != *identity);
        if replaced {
            warn!("Identity key of {address} changed");
        }
        Ok(replaced)
    }
}
