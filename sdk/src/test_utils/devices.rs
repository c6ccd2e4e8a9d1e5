//! Ready‑made Signal devices backed by the in‑memory stores.

use {
    crate::signal::{
        CiphertextMessage,
        InMemoryIdentityKeyStore,
        InMemorySessionStore,
        PreKeyBundle,
        PreKeyBundleFetcher,
        ProtocolAddress,
        RatchetConfig,
        SessionCipher,
        SessionError,
        SessionRecord,
        SessionStore,
    },
    std::{
        collections::HashMap,
        future::Future,
        sync::{Arc, Mutex},
    },
};

pub struct TestDevice {
    pub address: ProtocolAddress,
    pub sessions: Arc<InMemorySessionStore>,
    pub identities: Arc<InMemoryIdentityKeyStore>,
    pub cipher: SessionCipher,
}

impl TestDevice {
    /// A device with a fresh identity. The registration id is the device id.
    pub fn new(name: &str, device_id: u32, config: RatchetConfig) -> Self {
        let sessions = Arc::new(InMemorySessionStore::new());
        let identities = Arc::new(InMemoryIdentityKeyStore::generate(device_id));
        let cipher = SessionCipher::builder()
            .with_config(config)
            .build(sessions.clone(), identities.clone());
        Self {
            address: ProtocolAddress::new(name, device_id),
            sessions,
            identities,
            cipher,
        }
    }

    /// Publish a new bundle. The matching secrets go into this device's store.
    pub fn bundle(&self, signed_pre_key_id: u32, pre_key_id: Option<u32>) -> PreKeyBundle {
        self.identities
            .generate_pre_key_bundle(self.address.device_id(), signed_pre_key_id, pre_key_id)
            .expect("in-memory bundle generation")
    }

    pub fn record_for(&self, peer: &ProtocolAddress) -> Option<SessionRecord> {
        self.sessions.load(peer).expect("in-memory load")
    }
}

/// Two devices with a settled session: the initiator's pre‑key phase is over
/// and both sides have ratcheted once.
pub fn established_pair(config: RatchetConfig) -> (TestDevice, TestDevice) {
    let alice = TestDevice::new("alice", 1, config);
    let bob = TestDevice::new("bob", 2, config);

    alice
        .cipher
        .process_pre_key_bundle(&bob.address, &bob.bundle(1, Some(1)))
        .expect("bundle");
    let hello = alice.cipher.encrypt(&bob.address, b"hello").expect("encrypt");
    assert!(matches!(hello, CiphertextMessage::PreKey(_)));
    bob.cipher.decrypt(&alice.address, &hello).expect("decrypt hello");

    let reply = bob.cipher.encrypt(&alice.address, b"hi").expect("encrypt");
    alice.cipher.decrypt(&bob.address, &reply).expect("decrypt reply");
    (alice, bob)
}

/// A key directory serving bundles that were published to it.
#[derive(Default)]
pub struct InMemoryDirectory {
    bundles: Mutex<HashMap<ProtocolAddress, PreKeyBundle>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, address: ProtocolAddress, bundle: PreKeyBundle) {
        self.bundles
            .lock()
            .expect("directory lock")
            .insert(address, bundle);
    }
}

impl PreKeyBundleFetcher for InMemoryDirectory {
    fn fetch_pre_key_bundle(
        &self,
        address: &ProtocolAddress,
    ) -> impl Future<Output = Result<PreKeyBundle, SessionError>> + Send {
        let bundle = self
            .bundles
            .lock()
            .expect("directory lock")
            .get(address)
            .cloned()
            .ok_or_else(|| SessionError::Store(format!("no bundle published for {address}")));
        async move { bundle }
    }
}
