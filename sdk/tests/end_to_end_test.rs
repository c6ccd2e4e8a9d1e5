#![cfg(all(feature = "transport", feature = "signal", feature = "test_utils"))]

use {
    anyhow::Result,
    secure_channel_sdk::{
        crypto::KeyPair,
        noise::{NoiseConfig, NoiseHandshake},
        signal::{CiphertextMessage, RatchetConfig},
        test_utils::{
            devices::TestDevice,
            noise_server::{self, NoiseResponder},
        },
        transport::{NoiseSocket, TransportCipher},
    },
    tokio::io::duplex,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Alice reaches the server over Noise and sends a ratchet message for Bob
/// inside a transport frame. The server hands the frame body to Bob.
#[test]
fn test_ratchet_message_through_noise_frames() -> Result<()> {
    init_logger();

    let client_static = KeyPair::from_secret_bytes([0x11; 32]);
    let client_ephemeral = KeyPair::from_secret_bytes([0x22; 32]);
    let server_static = KeyPair::from_secret_bytes([0x33; 32]);
    let server_ephemeral = KeyPair::from_secret_bytes([0x44; 32]);

    let mut client = NoiseHandshake::new(NoiseConfig::default(), client_static)
        .with_ephemeral(client_ephemeral);
    let mut server = NoiseResponder::new(NoiseConfig::default(), server_static.clone(), vec![])
        .with_ephemeral(server_ephemeral);

    let server_hello = server.respond_to_hello(&client.start()?)?;
    let finish = client.process_server_hello(&server_hello, b"")?;
    let (server_keys, _) = server.process_client_finish(&finish)?;
    let (client_keys, outcome) = client.finish()?;

    assert_eq!(outcome.server_static, *server_static.public());
    assert_eq!(client_keys.write_key.len(), 32);
    assert_ne!(client_keys.write_key, client_keys.read_key);

    let alice = TestDevice::new("alice", 1, RatchetConfig::default());
    let bob = TestDevice::new("bob", 2, RatchetConfig::default());
    alice
        .cipher
        .process_pre_key_bundle(&bob.address, &bob.bundle(1, Some(1)))?;

    let ratchet_message = alice.cipher.encrypt(&bob.address, b"ping")?;
    let frame = TransportCipher::new(&client_keys).seal(&ratchet_message.serialize()?)?;

    let body = TransportCipher::new(&server_keys).open(&frame)?;
    let delivered = CiphertextMessage::deserialize(&body)?;
    assert!(delivered.is_pre_key());
    assert_eq!(bob.cipher.decrypt(&alice.address, &delivered)?, b"ping");
    Ok(())
}

/// The same exchange over real sockets: both devices connect to a relay that
/// forwards frame bodies from one connection to the other.
#[tokio::test]
async fn test_conversation_through_a_relay() -> Result<()> {
    init_logger();
    let config = NoiseConfig::default();
    let server_static = KeyPair::generate();

    let (alice_io, relay_alice_io) = duplex(4096);
    let (bob_io, relay_bob_io) = duplex(4096);

    let relay = {
        let config = config.clone();
        let server_static = server_static.clone();
        tokio::spawn(async move {
            let (from_alice, _) =
                noise_server::accept(relay_alice_io, config.clone(), server_static.clone(), b"").await?;
            let (from_bob, _) = noise_server::accept(relay_bob_io, config, server_static, b"").await?;
            let (to_alice, mut alice_frames) = from_alice.split();
            let (to_bob, mut bob_frames) = from_bob.split();

            // Alice speaks first, then the two alternate.
            for _ in 0..3 {
                to_bob.send(&alice_frames.recv().await?).await?;
                to_alice.send(&bob_frames.recv().await?).await?;
            }
            anyhow::Ok(())
        })
    };

    let (alice_socket, _) =
        NoiseSocket::connect(alice_io, config.clone(), KeyPair::generate(), b"alice").await?;
    let (bob_socket, _) = NoiseSocket::connect(bob_io, config, KeyPair::generate(), b"bob").await?;
    let (alice_out, mut alice_in) = alice_socket.split();
    let (bob_out, mut bob_in) = bob_socket.split();

    let alice = TestDevice::new("alice", 1, RatchetConfig::default());
    let bob = TestDevice::new("bob", 2, RatchetConfig::default());
    alice
        .cipher
        .process_pre_key_bundle(&bob.address, &bob.bundle(7, None))?;

    for round in 0..3u8 {
        let ping = alice.cipher.encrypt(&bob.address, &[b'p', round])?;
        alice_out.send(&ping.serialize()?).await?;
        let received = CiphertextMessage::deserialize(&bob_in.recv().await?)?;
        assert_eq!(received.is_pre_key(), round == 0);
        assert_eq!(bob.cipher.decrypt(&alice.address, &received)?, [b'p', round]);

        let pong = bob.cipher.encrypt(&alice.address, &[b'q', round])?;
        bob_out.send(&pong.serialize()?).await?;
        let received = CiphertextMessage::deserialize(&alice_in.recv().await?)?;
        assert_eq!(alice.cipher.decrypt(&bob.address, &received)?, [b'q', round]);
    }

    relay.await??;
    Ok(())
}
