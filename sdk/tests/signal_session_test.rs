#![cfg(feature = "signal")]

use {
    anyhow::Result,
    assert_matches::assert_matches,
    secure_channel_sdk::signal::{
        CiphertextMessage,
        DecryptionFailure,
        InMemoryIdentityKeyStore,
        InMemorySessionStore,
        ProtocolAddress,
        RatchetConfig,
        SessionCipher,
        SessionError,
        SessionRecord,
        SessionStore,
    },
    std::sync::Arc,
};

struct Device {
    address: ProtocolAddress,
    sessions: Arc<InMemorySessionStore>,
    identities: Arc<InMemoryIdentityKeyStore>,
    cipher: SessionCipher,
}

impl Device {
    fn new(name: &str, device_id: u32) -> Self {
        let sessions = Arc::new(InMemorySessionStore::new());
        let identities = Arc::new(InMemoryIdentityKeyStore::generate(device_id));
        let cipher = SessionCipher::builder()
            .with_config(RatchetConfig::default())
            .build(sessions.clone(), identities.clone());
        Self {
            address: ProtocolAddress::new(name, device_id),
            sessions,
            identities,
            cipher,
        }
    }

    fn record_for(&self, peer: &Device) -> SessionRecord {
        self.sessions.load(&peer.address).unwrap().unwrap()
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Alice initiates, Bob answers, Alice reads the answer.
fn established() -> Result<(Device, Device)> {
    init_logger();
    let alice = Device::new("alice", 1);
    let bob = Device::new("bob", 2);
    let bundle = bob.identities.generate_pre_key_bundle(2, 1, Some(1))?;
    alice.cipher.process_pre_key_bundle(&bob.address, &bundle)?;

    let hello = alice.cipher.encrypt(&bob.address, b"hello")?;
    assert_eq!(bob.cipher.decrypt(&alice.address, &hello)?, b"hello");
    let reply = bob.cipher.encrypt(&alice.address, b"hi")?;
    assert_eq!(alice.cipher.decrypt(&bob.address, &reply)?, b"hi");
    Ok((alice, bob))
}

fn assert_duplicate(result: Result<Vec<u8>, SessionError>) {
    assert_matches!(
        result,
        Err(SessionError::DecryptionFailed(
            DecryptionFailure::DuplicateMessage { .. }
        ))
    );
}

#[test]
fn test_round_trip_both_directions() -> Result<()> {
    let (alice, bob) = established()?;
    let plaintexts: [&[u8]; 3] = [b"", b"x", &[0u8; 4096]];
    for plaintext in plaintexts {
        let message = alice.cipher.encrypt(&bob.address, plaintext)?;
        assert_eq!(bob.cipher.decrypt(&alice.address, &message)?, plaintext);
        let message = bob.cipher.encrypt(&alice.address, plaintext)?;
        assert_eq!(alice.cipher.decrypt(&bob.address, &message)?, plaintext);
    }
    Ok(())
}

#[test]
fn test_serialised_messages_decrypt() -> Result<()> {
    let (alice, bob) = established()?;
    let bytes = alice.cipher.encrypt(&bob.address, b"over the wire")?.serialize()?;
    let message = CiphertextMessage::deserialize(&bytes)?;
    assert_eq!(bob.cipher.decrypt(&alice.address, &message)?, b"over the wire");
    Ok(())
}

#[test]
fn test_out_of_order_delivery() -> Result<()> {
    let (alice, bob) = established()?;
    let m1 = alice.cipher.encrypt(&bob.address, b"m1")?;
    let m2 = alice.cipher.encrypt(&bob.address, b"m2")?;
    let m3 = alice.cipher.encrypt(&bob.address, b"m3")?;

    assert_eq!(bob.cipher.decrypt(&alice.address, &m3)?, b"m3");
    assert_eq!(bob.cipher.decrypt(&alice.address, &m1)?, b"m1");
    assert_eq!(bob.cipher.decrypt(&alice.address, &m2)?, b"m2");
    Ok(())
}

#[test]
fn test_message_keys_are_single_use() -> Result<()> {
    let (alice, bob) = established()?;
    let message = alice.cipher.encrypt(&bob.address, b"once")?;
    assert_eq!(bob.cipher.decrypt(&alice.address, &message)?, b"once");
    assert_duplicate(bob.cipher.decrypt(&alice.address, &message));
    Ok(())
}

#[test]
fn test_skipped_key_cache_holds_2000_keys() -> Result<()> {
    let (alice, bob) = established()?;
    let messages = (0..=2002u32)
        .map(|i| alice.cipher.encrypt(&bob.address, &i.to_be_bytes()))
        .collect::<Result<Vec<_>, _>>()?;

    // 1000 keys cached for 0..1000, then 1001 more for 1001..=2001.
    assert_eq!(bob.cipher.decrypt(&alice.address, &messages[1000])?, 1000u32.to_be_bytes());
    assert_eq!(bob.cipher.decrypt(&alice.address, &messages[2002])?, 2002u32.to_be_bytes());

    assert_duplicate(bob.cipher.decrypt(&alice.address, &messages[0]));
    for i in (1..1000).chain(1001..=2001) {
        assert_eq!(
            bob.cipher.decrypt(&alice.address, &messages[i])?,
            (i as u32).to_be_bytes()
        );
    }
    Ok(())
}

#[test]
fn test_message_too_far_ahead_is_rejected() -> Result<()> {
    let (alice, bob) = established()?;
    let messages = (0..=2001)
        .map(|_| alice.cipher.encrypt(&bob.address, b"x"))
        .collect::<Result<Vec<_>, _>>()?;
    assert_matches!(
        bob.cipher.decrypt(&alice.address, &messages[2001]),
        Err(SessionError::DecryptionFailed(
            DecryptionFailure::TooFarInFuture { index: 2001, current: 0 }
        ))
    );
    assert_eq!(bob.cipher.decrypt(&alice.address, &messages[2000])?, b"x");
    Ok(())
}

#[test]
fn test_only_five_receiver_chains_are_kept() -> Result<()> {
    let (alice, bob) = established()?;

    // Six rounds, each under a new ratchet key of Bob. The first message of
    // every round is held back.
    let mut held = Vec::new();
    for round in 0..6u8 {
        held.push(bob.cipher.encrypt(&alice.address, &[round])?);
        let delivered = bob.cipher.encrypt(&alice.address, b"delivered")?;
        alice.cipher.decrypt(&bob.address, &delivered)?;
        let reply = alice.cipher.encrypt(&bob.address, b"ack")?;
        bob.cipher.decrypt(&alice.address, &reply)?;
    }
    assert_eq!(
        alice
            .record_for(&bob)
            .session_state()
            .unwrap()
            .receiver_chain_count(),
        5
    );

    assert!(alice.cipher.decrypt(&bob.address, &held[0]).is_err());
    for (round, message) in held.iter().enumerate().skip(1) {
        assert_eq!(alice.cipher.decrypt(&bob.address, message)?, [round as u8]);
    }
    Ok(())
}

#[test]
fn test_forty_archived_states_are_kept() -> Result<()> {
    init_logger();
    let alice = Device::new("alice", 1);
    let bob = Device::new("bob", 2);

    let mut base_keys = Vec::new();
    for signed_pre_key_id in 0..42 {
        let bundle = bob
            .identities
            .generate_pre_key_bundle(2, signed_pre_key_id, None)?;
        alice.cipher.process_pre_key_bundle(&bob.address, &bundle)?;
        base_keys.push(*alice.record_for(&bob).session_state().unwrap().base_key());
    }

    let record = alice.record_for(&bob);
    assert_eq!(record.previous_session_count(), 40);
    assert!(!record.has_session_state(3, &base_keys[0]));
    assert!(base_keys[1..]
        .iter()
        .all(|base_key| record.has_session_state(3, base_key)));
    Ok(())
}

#[test]
fn test_tampering_never_yields_plaintext() -> Result<()> {
    let (alice, bob) = established()?;
    let CiphertextMessage::Whisper(message) = alice.cipher.encrypt(&bob.address, b"payload")? else {
        panic!("session is settled, expected a whisper message");
    };

    for bit in 0..message.ciphertext.len() * 8 {
        let mut tampered = message.clone();
        tampered.ciphertext[bit / 8] ^= 1 << (bit % 8);
        assert!(bob.cipher.decrypt_signal_message(&alice.address, &tampered).is_err());
    }

    let mut tampered = message.clone();
    tampered.counter += 1;
    assert!(bob.cipher.decrypt_signal_message(&alice.address, &tampered).is_err());
    let mut tampered = message.clone();
    tampered.previous_counter ^= 1;
    assert!(bob.cipher.decrypt_signal_message(&alice.address, &tampered).is_err());

    assert_eq!(bob.cipher.decrypt_signal_message(&alice.address, &message)?, b"payload");
    Ok(())
}

#[test]
fn test_record_survives_serialisation() -> Result<()> {
    let (alice, bob) = established()?;

    let mut bytes = Vec::new();
    ciborium::into_writer(&bob.record_for(&alice), &mut bytes)?;
    let restored: SessionRecord = ciborium::from_reader(bytes.as_slice())?;

    let sessions = Arc::new(InMemorySessionStore::new());
    sessions.store(&alice.address, &restored)?;
    let restarted_bob = SessionCipher::builder().build(sessions, bob.identities.clone());

    let message = alice.cipher.encrypt(&bob.address, b"after restart")?;
    assert_eq!(restarted_bob.decrypt(&alice.address, &message)?, b"after restart");
    Ok(())
}

#[test]
fn test_one_time_pre_key_is_consumed() -> Result<()> {
    init_logger();
    let alice = Device::new("alice", 1);
    let bob = Device::new("bob", 2);
    let bundle = bob.identities.generate_pre_key_bundle(2, 1, Some(77))?;
    alice.cipher.process_pre_key_bundle(&bob.address, &bundle)?;

    let message = alice.cipher.encrypt(&bob.address, b"hello")?;
    assert!(bob.identities.has_pre_key(77));
    bob.cipher.decrypt(&alice.address, &message)?;
    assert!(!bob.identities.has_pre_key(77));

    // A second initiator using the stale bundle finds the one-time pre-key gone.
    let carol = Device::new("carol", 3);
    carol.cipher.process_pre_key_bundle(&bob.address, &bundle)?;
    let late = carol.cipher.encrypt(&bob.address, b"hello")?;
    assert_matches!(
        bob.cipher.decrypt(&carol.address, &late),
        Err(SessionError::MissingPreKey(77))
    );
    Ok(())
}
