//! The ratchet engine.
//!
//! Every public operation takes the per‑peer lock, loads the peer's
//! [`SessionRecord`], runs one ratchet step and stores the record again.
//! Decryption works on a copy of each candidate state, so a message that
//! fails to decrypt leaves the stored record exactly as it was.

use {
    super::{
        address::ProtocolAddress,
        builder,
        bundle::PreKeyBundle,
        chain::{ChainKey, MessageKey},
        config::RatchetConfig,
        locks::KeyedLocks,
        message::{associated_data, header_bytes, CiphertextMessage, PreKeySignalMessage, SignalMessage},
        record::SessionRecord,
        state::SessionState,
        store::{Direction, IdentityKeyStore, PreKeyBundleFetcher, SessionStore},
        DecryptionFailure,
        SessionError,
    },
    crate::crypto::KeyPair,
    log::{debug, warn},
    std::{fmt, sync::Arc},
    x25519_dalek::PublicKey,
};

// === Builder ===

#[derive(Debug, Default)]
pub struct SessionCipherBuilder {
    config: RatchetConfig,
}

impl SessionCipherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RatchetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(
        self,
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityKeyStore>,
    ) -> SessionCipher {
        SessionCipher {
            sessions,
            identities,
            config: self.config,
            peers: KeyedLocks::default(),
        }
    }
}

// === Engine ===

pub struct SessionCipher {
    sessions: Arc<dyn SessionStore>,
    identities: Arc<dyn IdentityKeyStore>,
    config: RatchetConfig,
    /// One lock per peer device. Different peers proceed in parallel.
    peers: KeyedLocks<ProtocolAddress>,
}

impl SessionCipher {
    pub fn builder() -> SessionCipherBuilder {
        SessionCipherBuilder::new()
    }

    pub fn config(&self) -> &RatchetConfig {
        &self.config
    }

    pub fn has_session(&self, address: &ProtocolAddress) -> Result<bool, SessionError> {
        self.sessions.contains_session(address)
    }

    /// Start a session with `address` from its pre‑key bundle.
    pub fn process_pre_key_bundle(
        &self,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), SessionError> {
        self.peers.with_lock(address, || -> Result<_, SessionError> {
            let mut record = self.load_or_fresh(address)?;
            self.establish(&mut record, address, bundle)?;
            self.sessions.store(address, &record)
        })
    }

    /// Encrypt `plaintext` for `address` with the current session state.
    pub fn encrypt(
        &self,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, SessionError> {
        self.peers.with_lock(address, || -> Result<_, SessionError> {
            let mut record = self
                .sessions
                .load(address)?
                .ok_or_else(|| SessionError::NoSession(address.clone()))?;
            let message = self.encrypt_record(&mut record, address, plaintext)?;
            self.sessions.store(address, &record)?;
            Ok(message)
        })
    }

    /// Like [`encrypt`](Self::encrypt), but first fetches a bundle and
    /// establishes a session if there is none. The fetch runs without holding
    /// the peer lock.
    pub async fn encrypt_or_establish<F>(
        &self,
        address: &ProtocolAddress,
        plaintext: &[u8],
        fetcher: &F,
    ) -> Result<CiphertextMessage, SessionError>
    where
        F: PreKeyBundleFetcher,
    {
        let bundle = if self.has_session(address)? {
            None
        } else {
            match fetcher.fetch_pre_key_bundle(address).await {
                Ok(bundle) => Some(bundle),
                Err(e) => {
                    warn!("Fetching pre-key bundle for {address} failed: {e}");
                    return Err(SessionError::NoSession(address.clone()));
                }
            }
        };

        self.peers.with_lock(address, || -> Result<_, SessionError> {
            let mut record = self.load_or_fresh(address)?;
            // Another task may have established the session while we fetched.
            if record.session_state().is_none() {
                let bundle = bundle.ok_or_else(|| SessionError::NoSession(address.clone()))?;
                self.establish(&mut record, address, &bundle)?;
            }
            let message = self.encrypt_record(&mut record, address, plaintext)?;
            self.sessions.store(address, &record)?;
            Ok(message)
        })
    }

    pub fn decrypt(
        &self,
        address: &ProtocolAddress,
        message: &CiphertextMessage,
    ) -> Result<Vec<u8>, SessionError> {
        match message {
            CiphertextMessage::Whisper(message) => self.decrypt_signal_message(address, message),
            CiphertextMessage::PreKey(message) => self.decrypt_pre_key_message(address, message),
        }
    }

    pub fn decrypt_signal_message(
        &self,
        address: &ProtocolAddress,
        message: &SignalMessage,
    ) -> Result<Vec<u8>, SessionError> {
        self.peers.with_lock(address, || -> Result<_, SessionError> {
            let mut record = self
                .sessions
                .load(address)?
                .ok_or_else(|| SessionError::NoSession(address.clone()))?;
            let plaintext = self.decrypt_record(&mut record, address, message)?;

            let remote_identity = record
                .session_state()
                .map(|state| *state.remote_identity_key())
                .ok_or(DecryptionFailure::UninitializedSession)?;
            if !self
                .identities
                .is_trusted_identity(address, &remote_identity, Direction::Receiving)?
            {
                return Err(SessionError::UntrustedIdentity(address.clone()));
            }
            self.identities.save_identity(address, &remote_identity)?;
            self.sessions.store(address, &record)?;
            Ok(plaintext)
        })
    }

    /// Decrypt the first message(s) of a session initiated by `address`,
    /// building the responder state if needed.
    pub fn decrypt_pre_key_message(
        &self,
        address: &ProtocolAddress,
        message: &PreKeySignalMessage,
    ) -> Result<Vec<u8>, SessionError> {
        self.peers.with_lock(address, || -> Result<_, SessionError> {
            if !self
                .identities
                .is_trusted_identity(address, &message.identity_key, Direction::Receiving)?
            {
                return Err(SessionError::UntrustedIdentity(address.clone()));
            }

            let mut record = self.load_or_fresh(address)?;
            let used_pre_key = builder::process_pre_key_message(
                &mut record,
                self.identities.as_ref(),
                message,
                &self.config,
            )?;
            let plaintext = self.decrypt_record(&mut record, address, &message.message)?;

            self.identities.save_identity(address, &message.identity_key)?;
            self.sessions.store(address, &record)?;
            if let Some(id) = used_pre_key {
                self.identities.remove_pre_key(id)?;
            }
            Ok(plaintext)
        })
    }

    // === Internals, all called with the peer lock held ===

    fn load_or_fresh(&self, address: &ProtocolAddress) -> Result<SessionRecord, SessionError> {
        Ok(self
            .sessions
            .load(address)?
            .unwrap_or_else(|| SessionRecord::new_fresh(&self.config)))
    }

    fn establish(
        &self,
        record: &mut SessionRecord,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), SessionError> {
        if !self
            .identities
            .is_trusted_identity(address, &bundle.identity_key, Direction::Sending)?
        {
            return Err(SessionError::UntrustedIdentity(address.clone()));
        }
        let identity = self.identities.identity_key_pair()?;
        let registration_id = self.identities.local_registration_id()?;
        builder::process_pre_key_bundle(record, &identity, registration_id, bundle, &self.config)?;
        self.identities.save_identity(address, &bundle.identity_key)?;
        Ok(())
    }

    fn encrypt_record(
        &self,
        record: &mut SessionRecord,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, SessionError> {
        let state = record
            .session_state_mut()
            .ok_or_else(|| SessionError::NoSession(address.clone()))?;
        if !self
            .identities
            .is_trusted_identity(address, state.remote_identity_key(), Direction::Sending)?
        {
            return Err(SessionError::UntrustedIdentity(address.clone()));
        }
        encrypt_state(state, plaintext)
    }

    /// Try the current state, then every archived state, newest first. The
    /// first state that decrypts is committed and becomes current.
    fn decrypt_record(
        &self,
        record: &mut SessionRecord,
        address: &ProtocolAddress,
        message: &SignalMessage,
    ) -> Result<Vec<u8>, SessionError> {
        let mut current_failure = None;
        if let Some(state) = record.session_state() {
            let mut candidate = state.clone();
            match decrypt_state(&mut candidate, message, &self.config) {
                Ok(plaintext) => {
                    record.set_session_state(candidate);
                    return Ok(plaintext);
                }
                Err(SessionError::DecryptionFailed(reason)) => {
                    if let DecryptionFailure::DuplicateMessage { .. } = reason {
                        warn!("Duplicate message {} from {address}", message.counter);
                        return Err(reason.into());
                    }
                    current_failure = Some(reason);
                }
                Err(e) => return Err(e),
            }
        }

        let mut revived = None;
        for (index, state) in record.previous_session_states().enumerate() {
            let mut candidate = state.clone();
            match decrypt_state(&mut candidate, message, &self.config) {
                Ok(plaintext) => {
                    revived = Some((index, candidate, plaintext));
                    break;
                }
                Err(SessionError::DecryptionFailed(DecryptionFailure::DuplicateMessage { index })) => {
                    warn!("Duplicate message {index} from {address} in archived state");
                    return Err(DecryptionFailure::DuplicateMessage { index }.into());
                }
                Err(SessionError::DecryptionFailed(
                    DecryptionFailure::NoValidState
                    | DecryptionFailure::TooFarInFuture { .. }
                    | DecryptionFailure::Authentication
                    | DecryptionFailure::VersionMismatch { .. }
                    | DecryptionFailure::UninitializedSession,
                )) => continue,
                Err(e) => return Err(e),
            }
        }
        if let Some((index, candidate, plaintext)) = revived {
            record.promote_old_session(index, candidate);
            return Ok(plaintext);
        }

        let reason = match (current_failure, record.previous_session_count()) {
            (Some(reason), 0) => reason,
            (None, 0) => DecryptionFailure::UninitializedSession,
            _ => DecryptionFailure::NoValidState,
        };
        warn!(
            "Message {} from {address} did not decrypt: {reason}",
            message.counter
        );
        Err(reason.into())
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// === Ratchet steps on a single state ===

fn encrypt_state(
    state: &mut SessionState,
    plaintext: &[u8],
) -> Result<CiphertextMessage, SessionError> {
    let chain_key = state.sender_chain_key().clone();
    let message_key = chain_key.message_key()?;
    let next_chain_key = chain_key.next()?;

    let header = header_bytes(
        state.version(),
        state.sender_ratchet_key(),
        chain_key.index(),
        state.previous_counter(),
    );
    let ad = associated_data(state.local_identity_key(), state.remote_identity_key(), &header);
    let message = SignalMessage {
        version: state.version(),
        ratchet_key: *state.sender_ratchet_key(),
        counter: chain_key.index(),
        previous_counter: state.previous_counter(),
        ciphertext: message_key.encrypt(&ad, plaintext)?,
    };

    let message = match state.pending_pre_key() {
        Some(pending) => CiphertextMessage::PreKey(PreKeySignalMessage {
            version: state.version(),
            registration_id: state.local_registration_id(),
            pre_key_id: pending.pre_key_id,
            signed_pre_key_id: pending.signed_pre_key_id,
            base_key: pending.base_key,
            identity_key: *state.local_identity_key(),
            message,
        }),
        None => CiphertextMessage::Whisper(message),
    };
    state.set_sender_chain_key(next_chain_key);
    Ok(message)
}

fn decrypt_state(
    state: &mut SessionState,
    message: &SignalMessage,
    config: &RatchetConfig,
) -> Result<Vec<u8>, SessionError> {
    if message.version != state.version() {
        return Err(DecryptionFailure::VersionMismatch {
            expected: state.version(),
            actual: message.version,
        }
        .into());
    }

    let their_ratchet_key = message.ratchet_key;
    let chain_key = receiver_chain_key(state, &their_ratchet_key)?;
    let message_key = message_key(state, &their_ratchet_key, chain_key, message.counter, config)?;

    let ad = associated_data(
        state.remote_identity_key(),
        state.local_identity_key(),
        &message.header_bytes(),
    );
    let plaintext = message_key
        .decrypt(&ad, &message.ciphertext)
        .map_err(|_| DecryptionFailure::Authentication)?;

    state.clear_pending_pre_key();
    Ok(plaintext)
}

/// The receiver chain for `their_ratchet_key`, performing a DH ratchet step
/// if the key is new.
fn receiver_chain_key(
    state: &mut SessionState,
    their_ratchet_key: &PublicKey,
) -> Result<ChainKey, SessionError> {
    if let Some(chain_key) = state.receiver_chain_key(their_ratchet_key) {
        return Ok(chain_key);
    }

    let our_ratchet_key = state
        .sender_ratchet_key_pair()
        .cloned()
        .ok_or(DecryptionFailure::UninitializedSession)?;
    let (root_key, receiver_chain) = state
        .root_key()
        .create_chain(their_ratchet_key, &our_ratchet_key)?;

    let new_ratchet_key = KeyPair::generate();
    let (root_key, sender_chain) = root_key.create_chain(their_ratchet_key, &new_ratchet_key)?;

    let previous_counter = state.sender_chain_key().index().max(1) - 1;
    state.set_root_key(root_key);
    state.add_receiver_chain(*their_ratchet_key, receiver_chain.clone());
    state.set_previous_counter(previous_counter);
    state.set_sender_chain(new_ratchet_key, sender_chain);

    debug!(
        "DH ratchet step on new remote ratchet key {}",
        hex::encode(their_ratchet_key.as_bytes())
    );
    Ok(receiver_chain)
}

/// The message key for `counter`, caching every key skipped on the way.
fn message_key(
    state: &mut SessionState,
    their_ratchet_key: &PublicKey,
    chain_key: ChainKey,
    counter: u32,
    config: &RatchetConfig,
) -> Result<MessageKey, SessionError> {
    let current = chain_key.index();
    if counter < current {
        return state
            .take_message_key(their_ratchet_key, counter)
            .ok_or_else(|| DecryptionFailure::DuplicateMessage { index: counter }.into());
    }
    if counter - current > config.max_forward_jump {
        return Err(DecryptionFailure::TooFarInFuture {
            index: counter,
            current,
        }
        .into());
    }

    let mut chain_key = chain_key;
    while chain_key.index() < counter {
        state.set_message_key(their_ratchet_key, chain_key.message_key()?);
        chain_key = chain_key.next()?;
    }
    let message_key = chain_key.message_key()?;
    state.set_receiver_chain_key(their_ratchet_key, chain_key.next()?);
    Ok(message_key)
}
