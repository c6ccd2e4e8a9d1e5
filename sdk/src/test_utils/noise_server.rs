//! A simulated server speaking the responder side of the XX handshake.

#[cfg(feature = "transport")]
use {
    crate::transport::{socket::read_frame, FrameDecoder, FrameEncoder, NoiseSocket, TransportError},
    tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt},
};
use {
    crate::{
        crypto::KeyPair,
        noise::{
            handshake::{HandshakeState, Role, TransportKeys},
            validate_public_key,
            HandshakeError,
            HandshakeMessage,
            NoiseConfig,
        },
    },
    x25519_dalek::PublicKey,
};

/// What the client revealed in `ClientFinish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_static: PublicKey,
    pub client_payload: Vec<u8>,
}

pub struct NoiseResponder {
    config: NoiseConfig,
    static_keys: KeyPair,
    ephemeral: KeyPair,
    payload: Vec<u8>,
    symmetric: Option<HandshakeState>,
    client_ephemeral: Option<PublicKey>,
}

impl NoiseResponder {
    /// `payload` is sent encrypted in `ServerHello`, where a real server
    /// puts its certificate chain.
    pub fn new(config: NoiseConfig, static_keys: KeyPair, payload: Vec<u8>) -> Self {
        Self {
            config,
            static_keys,
            ephemeral: KeyPair::generate(),
            payload,
            symmetric: None,
            client_ephemeral: None,
        }
    }

    pub fn with_ephemeral(mut self, ephemeral: KeyPair) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Consume an encoded `ClientHello` and produce the encoded `ServerHello`.
    pub fn respond_to_hello(&mut self, message: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let ephemeral = match self.config.codec().decode(message)? {
            HandshakeMessage::ClientHello { ephemeral } => ephemeral,
            other => {
                return Err(HandshakeError::UnexpectedMessage {
                    expected: "ClientHello",
                    actual: other.kind(),
                })
            }
        };
        let client_ephemeral = validate_public_key(&ephemeral)?;

        let mut symmetric = HandshakeState::new(&self.config.prologue().bytes());
        symmetric.update_hash(client_ephemeral.as_bytes());
        symmetric.update_hash(self.ephemeral.public().as_bytes());
        symmetric.mix_into_key(self.ephemeral.diffie_hellman(&client_ephemeral).as_slice())?;
        let static_ciphertext = symmetric.encrypt_and_hash(self.static_keys.public().as_bytes())?;
        symmetric.mix_into_key(self.static_keys.diffie_hellman(&client_ephemeral).as_slice())?;
        let payload = symmetric.encrypt_and_hash(&self.payload)?;

        self.symmetric = Some(symmetric);
        self.client_ephemeral = Some(client_ephemeral);
        self.config.codec().encode(&HandshakeMessage::ServerHello {
            ephemeral: self.ephemeral.public_bytes().to_vec(),
            static_ciphertext,
            payload,
        })
    }

    /// Consume an encoded `ClientFinish` and derive the server's keys.
    pub fn process_client_finish(
        &mut self,
        message: &[u8],
    ) -> Result<(TransportKeys, ClientInfo), HandshakeError> {
        let (static_ciphertext, payload) = match self.config.codec().decode(message)? {
            HandshakeMessage::ClientFinish {
                static_ciphertext,
                payload,
            } => (static_ciphertext, payload),
            other => {
                return Err(HandshakeError::UnexpectedMessage {
                    expected: "ClientFinish",
                    actual: other.kind(),
                })
            }
        };
        let mut symmetric = self
            .symmetric
            .take()
            .ok_or(HandshakeError::UnexpectedMessage {
                expected: "ClientHello",
                actual: "ClientFinish",
            })?;

        let client_static = validate_public_key(&symmetric.decrypt_and_hash(&static_ciphertext)?)?;
        symmetric.mix_into_key(self.ephemeral.diffie_hellman(&client_static).as_slice())?;
        let client_payload = symmetric.decrypt_and_hash(&payload)?;

        let keys = symmetric.split(Role::Responder)?;
        Ok((
            keys,
            ClientInfo {
                client_static,
                client_payload,
            },
        ))
    }

    pub fn client_ephemeral(&self) -> Option<&PublicKey> {
        self.client_ephemeral.as_ref()
    }
}

/// Accept one client over `stream`: check the prologue, run the responder
/// and return the established server end.
#[cfg(feature = "transport")]
pub async fn accept<S>(
    mut stream: S,
    config: NoiseConfig,
    static_keys: KeyPair,
    payload: &[u8],
) -> Result<(NoiseSocket<S>, ClientInfo), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut decoder = FrameDecoder::expecting_prologue(config.prologue().bytes());
    let mut encoder = FrameEncoder::new();
    let mut responder = NoiseResponder::new(config, static_keys, payload.to_vec());

    let hello = read_frame(&mut stream, &mut decoder).await?;
    let server_hello = responder.respond_to_hello(&hello)?;
    stream.write_all(&encoder.encode(&server_hello)?).await?;
    stream.flush().await?;

    let finish = read_frame(&mut stream, &mut decoder).await?;
    let (keys, client) = responder.process_client_finish(&finish)?;
    Ok((NoiseSocket::established(stream, &keys, encoder, decoder), client))
}
