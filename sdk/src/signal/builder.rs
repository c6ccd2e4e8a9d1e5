//! Session establishment (X3DH).
//!
//! ```text
//! Alice (initiator)                          Bob (responder, maybe offline)
//!   fetch PreKeyBundle { IK_b, SPK_b, OPK_b? } ◄── published earlier
//!   EK_a ← fresh base key
//!   secret = 0xFF·32 ‖ DH(IK_a, SPK_b) ‖ DH(EK_a, IK_b) ‖ DH(EK_a, SPK_b) [‖ DH(EK_a, OPK_b)]
//!   (root, chain) = HKDF(secret, "WhisperText")
//!   PreKeySignalMessage { EK_a, IK_a, ids, SignalMessage } ─────────►
//!                                             same secret from the mirrored DHs
//! ```
//!
//! Alice receives on `chain` under Bob's signed pre‑key and immediately
//! ratchets once to get her own sending chain. Bob sends on `chain` with his
//! signed pre‑key as ratchet key until Alice's first message ratchets him.

use {
    super::{
        bundle::PreKeyBundle,
        chain::{ChainKey, RootKey},
        config::RatchetConfig,
        message::PreKeySignalMessage,
        record::SessionRecord,
        state::{PendingPreKey, SessionChain, SessionInit, SessionState},
        store::IdentityKeyStore,
        SessionError,
        CIPHERTEXT_MESSAGE_VERSION,
    },
    crate::crypto::{kdf, IdentityKeyPair, KeyPair},
    log::debug,
    zeroize::Zeroizing,
};

const X3DH_INFO: &[u8] = b"WhisperText";
/// Domain separator prefixed to the DH outputs.
const DISCONTINUITY: [u8; 32] = [0xFF; 32];

fn derive_initial_keys(shared: &[&[u8]]) -> Result<(RootKey, ChainKey), SessionError> {
    let mut secret = Zeroizing::new(Vec::with_capacity(32 * (shared.len() + 1)));
    secret.extend_from_slice(&DISCONTINUITY);
    for part in shared {
        secret.extend_from_slice(part);
    }
    let (root, chain) = kdf::derive_pair(None, &secret, X3DH_INFO)?;
    Ok((RootKey::new(root), ChainKey::new(chain, 0)))
}

/// Initiator side. Verifies `bundle`, builds a new state and makes it the
/// current state of `record`, archiving whatever was current before.
///
/// Identity trust is the caller's concern.
pub fn process_pre_key_bundle(
    record: &mut SessionRecord,
    identity: &IdentityKeyPair,
    local_registration_id: u32,
    bundle: &PreKeyBundle,
    config: &RatchetConfig,
) -> Result<(), SessionError> {
    if !bundle.verify_signature() {
        return Err(SessionError::InvalidSignature);
    }

    let base_key = KeyPair::generate();
    let dh1 = identity.diffie_hellman(&bundle.signed_pre_key_public);
    let dh2 = base_key.diffie_hellman(&bundle.identity_key);
    let dh3 = base_key.diffie_hellman(&bundle.signed_pre_key_public);
    let dh4 = bundle
        .pre_key
        .map(|pre_key| base_key.diffie_hellman(&pre_key.public));

    let mut shared: Vec<&[u8]> = vec![dh1.as_slice(), dh2.as_slice(), dh3.as_slice()];
    if let Some(dh4) = &dh4 {
        shared.push(dh4.as_slice());
    }
    let (root_key, receiver_chain_key) = derive_initial_keys(&shared)?;

    let sending_ratchet = KeyPair::generate();
    let (root_key, sender_chain_key) =
        root_key.create_chain(&bundle.signed_pre_key_public, &sending_ratchet)?;

    let mut state = SessionState::new(SessionInit {
        version: CIPHERTEXT_MESSAGE_VERSION,
        local_identity: *identity.public_key(),
        remote_identity: bundle.identity_key,
        root_key,
        sender_chain: SessionChain::sender(sending_ratchet, sender_chain_key),
        base_key: *base_key.public(),
        max_receiver_chains: config.max_receiver_chains,
        max_message_keys: config.max_message_keys,
    });
    state.add_receiver_chain(bundle.signed_pre_key_public, receiver_chain_key);
    state.set_pending_pre_key(PendingPreKey {
        pre_key_id: bundle.pre_key.map(|pre_key| pre_key.id),
        signed_pre_key_id: bundle.signed_pre_key_id,
        base_key: *base_key.public(),
    });
    state.set_local_registration_id(local_registration_id);
    state.set_remote_registration_id(bundle.registration_id);

    debug!(
        "Initiated session with device {} (signed pre-key {}, one-time pre-key {:?})",
        bundle.device_id,
        bundle.signed_pre_key_id,
        bundle.pre_key.map(|pre_key| pre_key.id)
    );
    record.promote_state(state);
    Ok(())
}

/// Responder side. Builds the state for an incoming pre‑key message unless
/// `record` already holds the state for its base key.
///
/// Returns the id of the one‑time pre‑key that was used, which the caller
/// removes from the key store once the message decrypted.
pub fn process_pre_key_message<I>(
    record: &mut SessionRecord,
    identities: &I,
    message: &PreKeySignalMessage,
    config: &RatchetConfig,
) -> Result<Option<u32>, SessionError>
where
    I: IdentityKeyStore + ?Sized,
{
    if message.version != CIPHERTEXT_MESSAGE_VERSION {
        return Err(SessionError::InvalidMessage("unsupported pre-key message version"));
    }
    if record.has_session_state(message.version, &message.base_key) {
        debug!("Session for this base key already exists, not rebuilding");
        return Ok(None);
    }

    let identity = identities.identity_key_pair()?;
    let signed_pre_key = identities
        .signed_pre_key(message.signed_pre_key_id)?
        .ok_or(SessionError::MissingSignedPreKey(message.signed_pre_key_id))?;
    let one_time_pre_key = match message.pre_key_id {
        Some(id) => Some(
            identities
                .pre_key(id)?
                .ok_or(SessionError::MissingPreKey(id))?,
        ),
        None => None,
    };

    let dh1 = signed_pre_key.key_pair.diffie_hellman(&message.identity_key);
    let dh2 = identity.diffie_hellman(&message.base_key);
    let dh3 = signed_pre_key.key_pair.diffie_hellman(&message.base_key);
    let dh4 = one_time_pre_key
        .as_ref()
        .map(|pre_key| pre_key.key_pair.diffie_hellman(&message.base_key));

    let mut shared: Vec<&[u8]> = vec![dh1.as_slice(), dh2.as_slice(), dh3.as_slice()];
    if let Some(dh4) = &dh4 {
        shared.push(dh4.as_slice());
    }
    let (root_key, sender_chain_key) = derive_initial_keys(&shared)?;

    let mut state = SessionState::new(SessionInit {
        version: message.version,
        local_identity: *identity.public_key(),
        remote_identity: message.identity_key,
        root_key,
        sender_chain: SessionChain::sender(signed_pre_key.key_pair.clone(), sender_chain_key),
        base_key: message.base_key,
        max_receiver_chains: config.max_receiver_chains,
        max_message_keys: config.max_message_keys,
    });
    state.set_local_registration_id(identities.local_registration_id()?);
    state.set_remote_registration_id(message.registration_id);

    debug!(
        "Accepted session on signed pre-key {} (one-time pre-key {:?})",
        message.signed_pre_key_id, message.pre_key_id
    );
    record.promote_state(state);
    Ok(message.pre_key_id)
}
