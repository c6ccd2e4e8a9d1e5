#![cfg(all(feature = "transport", feature = "test_utils"))]

use {
    anyhow::Result,
    assert_matches::assert_matches,
    secure_channel_sdk::{
        crypto::KeyPair,
        noise::{ClientState, HandshakeError, HandshakeMessage, NoiseConfig, NoiseHandshake, Prologue},
        test_utils::noise_server::{self, NoiseResponder},
        transport::{NoiseSocket, TransportCipher, TransportError},
    },
    tokio::io::duplex,
};

fn fixed_key(byte: u8) -> KeyPair {
    KeyPair::from_secret_bytes([byte; 32])
}

#[test]
fn test_fixed_keys_give_the_same_transport_keys() -> Result<()> {
    let run = || -> Result<_> {
        let mut client = NoiseHandshake::new(NoiseConfig::default(), fixed_key(1))
            .with_ephemeral(fixed_key(2));
        let mut server = NoiseResponder::new(NoiseConfig::default(), fixed_key(3), b"cert".to_vec())
            .with_ephemeral(fixed_key(4));

        let hello = client.start()?;
        let server_hello = server.respond_to_hello(&hello)?;
        let finish = client.process_server_hello(&server_hello, b"login")?;
        let (server_keys, client_info) = server.process_client_finish(&finish)?;
        let (client_keys, outcome) = client.finish()?;

        assert_eq!(client.state(), ClientState::Established);
        assert_eq!(outcome.server_static, *fixed_key(3).public());
        assert_eq!(outcome.server_payload, b"cert");
        assert_eq!(client_info.client_static, *fixed_key(1).public());
        assert_eq!(client_info.client_payload, b"login");
        Ok((client_keys, server_keys))
    };

    let (client_keys, server_keys) = run()?;
    assert_eq!((client_keys.clone(), server_keys.clone()), run()?);
    assert_ne!(client_keys.write_key, client_keys.read_key);
    assert_eq!(client_keys.write_key, server_keys.read_key);
    assert_eq!(client_keys.read_key, server_keys.write_key);
    Ok(())
}

#[test]
fn test_tampered_server_hello_fails_the_client() -> Result<()> {
    let config = NoiseConfig::default();
    let mut client = NoiseHandshake::new(config.clone(), KeyPair::generate());
    let mut server = NoiseResponder::new(config.clone(), KeyPair::generate(), b"cert".to_vec());

    let server_hello = server.respond_to_hello(&client.start()?)?;
    let mut decoded = config.codec().decode(&server_hello)?;
    if let HandshakeMessage::ServerHello { static_ciphertext, .. } = &mut decoded {
        static_ciphertext[0] ^= 0x80;
    }
    let tampered = config.codec().encode(&decoded)?;

    assert_matches!(
        client.process_server_hello(&tampered, b""),
        Err(HandshakeError::Crypto(_))
    );
    assert_eq!(client.state(), ClientState::Failed);
    assert_matches!(client.finish(), Err(HandshakeError::InvalidState(_)));
    Ok(())
}

#[test]
fn test_unexpected_message_is_rejected() -> Result<()> {
    let config = NoiseConfig::default();
    let mut client = NoiseHandshake::new(config.clone(), KeyPair::generate());
    let hello = client.start()?;

    // The client's own hello echoed back instead of a ServerHello.
    assert_matches!(
        client.process_server_hello(&hello, b""),
        Err(HandshakeError::UnexpectedMessage {
            expected: "ServerHello",
            actual: "ClientHello"
        })
    );
    Ok(())
}

#[test]
fn test_prologue_is_bound_into_the_transcript() -> Result<()> {
    let mut client = NoiseHandshake::new(
        NoiseConfig::builder().with_prologue(Prologue::Mobile).build(),
        KeyPair::generate(),
    );
    let mut server = NoiseResponder::new(NoiseConfig::default(), KeyPair::generate(), vec![]);

    let server_hello = server.respond_to_hello(&client.start()?)?;
    assert_matches!(
        client.process_server_hello(&server_hello, b""),
        Err(HandshakeError::Crypto(_))
    );
    Ok(())
}

#[tokio::test]
async fn test_socket_handshake_and_frames() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (client_io, server_io) = duplex(1024);
    let server_static = KeyPair::generate();
    let expected_server = *server_static.public();

    let server = tokio::spawn(async move {
        let (socket, info) =
            noise_server::accept(server_io, NoiseConfig::default(), server_static, b"cert").await?;
        let (sender, mut receiver) = socket.split();
        for _ in 0..3 {
            let request = receiver.recv().await?;
            sender.send(&[b"echo:".as_slice(), request.as_slice()].concat()).await?;
        }
        Ok::<_, TransportError>(info)
    });

    let client_static = KeyPair::generate();
    let (socket, outcome) =
        NoiseSocket::connect(client_io, NoiseConfig::default(), client_static.clone(), b"login").await?;
    assert_eq!(outcome.server_static, expected_server);
    assert_eq!(outcome.server_payload, b"cert");

    let (sender, mut receiver) = socket.split();
    let requests: [&[u8]; 3] = [b"one", b"two", b""];
    for request in requests {
        sender.send(request).await?;
        assert_eq!(receiver.recv().await?, [b"echo:".as_slice(), request].concat());
    }

    let info = server.await??;
    assert_eq!(info.client_static, *client_static.public());
    assert_eq!(info.client_payload, b"login");
    Ok(())
}

#[tokio::test]
async fn test_wrong_prologue_is_refused_by_the_server() -> Result<()> {
    let (client_io, server_io) = duplex(1024);
    let server = tokio::spawn(async move {
        noise_server::accept(server_io, NoiseConfig::default(), KeyPair::generate(), b"").await
    });

    let config = NoiseConfig::builder()
        .with_prologue(Prologue::Custom(*b"XX\x00\x00"))
        .build();
    let client = NoiseSocket::connect(client_io, config, KeyPair::generate(), b"").await;

    assert_matches!(server.await?.err(), Some(TransportError::InvalidPrologue));
    assert!(client.is_err());
    Ok(())
}

#[test]
fn test_frame_counters_must_stay_in_step() -> Result<()> {
    let mut client = NoiseHandshake::new(NoiseConfig::default(), KeyPair::generate());
    let mut server = NoiseResponder::new(NoiseConfig::default(), KeyPair::generate(), vec![]);
    let server_hello = server.respond_to_hello(&client.start()?)?;
    let (server_keys, _) =
        server.process_client_finish(&client.process_server_hello(&server_hello, b"")?)?;
    let (client_keys, _) = client.finish()?;

    let client = TransportCipher::new(&client_keys);
    let server = TransportCipher::new(&server_keys);
    let first = client.seal(b"first")?;
    let second = client.seal(b"second")?;

    // Frame 1 opened with counter 0 fails and the reader is out of step.
    assert_matches!(server.open(&second), Err(TransportError::Crypto(_)));
    assert!(server.open(&first).is_err());
    Ok(())
}
