//! Initiator state machine.
//!
//! ```text
//! Uninitialized ──start()──► AwaitingServerHello ──process_server_hello()──►
//!     AwaitingFinishAck ──finish()──► Established
//! ```
//!
//! Any error moves the engine to `Failed` and drops its symmetric state. A
//! failed engine cannot be resumed; the caller reconnects with a new one.

use {
    super::{
        handshake::{HandshakeState, Role, TransportKeys},
        validate_public_key,
        HandshakeError,
        HandshakeMessage,
        NoiseConfig,
    },
    crate::crypto::KeyPair,
    log::{debug, warn},
    x25519_dalek::PublicKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    AwaitingServerHello,
    AwaitingFinishAck,
    Established,
    Failed,
}

/// What the server revealed about itself. Certificate validation of the
/// payload is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub server_static: PublicKey,
    pub server_payload: Vec<u8>,
}

pub struct NoiseHandshake {
    config: NoiseConfig,
    state: ClientState,
    symmetric: Option<HandshakeState>,
    static_keys: KeyPair,
    ephemeral: KeyPair,
    outcome: Option<HandshakeOutcome>,
}

impl NoiseHandshake {
    /// A new engine with a freshly generated ephemeral key.
    pub fn new(config: NoiseConfig, static_keys: KeyPair) -> Self {
        Self {
            config,
            state: ClientState::Uninitialized,
            symmetric: None,
            static_keys,
            ephemeral: KeyPair::generate(),
            outcome: None,
        }
    }

    /// Use a fixed ephemeral key instead of a random one.
    pub fn with_ephemeral(mut self, ephemeral: KeyPair) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn ephemeral_public(&self) -> &PublicKey {
        self.ephemeral.public()
    }

    /// Produce the encoded `ClientHello`.
    ///
    /// The prologue is folded into the transcript here; putting it on the
    /// wire ahead of the first frame is the transport's job.
    pub fn start(&mut self) -> Result<Vec<u8>, HandshakeError> {
        self.expect_state(ClientState::Uninitialized)?;

        let mut symmetric = HandshakeState::new(&self.config.prologue().bytes());
        symmetric.update_hash(self.ephemeral.public().as_bytes());

        let hello = HandshakeMessage::ClientHello {
            ephemeral: self.ephemeral.public_bytes().to_vec(),
        };
        let bytes = match self.config.codec().encode(&hello) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(e)),
        };

        self.symmetric = Some(symmetric);
        self.state = ClientState::AwaitingServerHello;
        debug!("noise: sent ClientHello, awaiting ServerHello");
        Ok(bytes)
    }

    /// Consume the server's `ServerHello` and produce the encoded
    /// `ClientFinish` carrying our encrypted static key and `client_payload`.
    pub fn process_server_hello(
        &mut self,
        message: &[u8],
        client_payload: &[u8],
    ) -> Result<Vec<u8>, HandshakeError> {
        self.expect_state(ClientState::AwaitingServerHello)?;

        match self.read_server_hello(message, client_payload) {
            Ok(finish) => {
                self.state = ClientState::AwaitingFinishAck;
                debug!("noise: ServerHello verified, sending ClientFinish");
                Ok(finish)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Split the transcript into transport keys once `ClientFinish` is on
    /// the wire. The symmetric state is wiped.
    pub fn finish(&mut self) -> Result<(TransportKeys, HandshakeOutcome), HandshakeError> {
        self.expect_state(ClientState::AwaitingFinishAck)?;

        let (Some(symmetric), Some(outcome)) = (self.symmetric.take(), self.outcome.take()) else {
            return Err(self.fail(HandshakeError::InvalidState(self.state)));
        };
        let keys = match symmetric.split(Role::Initiator) {
            Ok(keys) => keys,
            Err(e) => return Err(self.fail(e)),
        };

        self.state = ClientState::Established;
        debug!("noise: handshake established");
        Ok((keys, outcome))
    }

    fn read_server_hello(
        &mut self,
        message: &[u8],
        client_payload: &[u8],
    ) -> Result<Vec<u8>, HandshakeError> {
        let (ephemeral, static_ciphertext, payload) = match self.config.codec().decode(message)? {
            HandshakeMessage::ServerHello {
                ephemeral,
                static_ciphertext,
                payload,
            } => (ephemeral, static_ciphertext, payload),
            other => {
                return Err(HandshakeError::UnexpectedMessage {
                    expected: "ServerHello",
                    actual: other.kind(),
                })
            }
        };
        let symmetric = self
            .symmetric
            .as_mut()
            .ok_or(HandshakeError::InvalidState(ClientState::AwaitingServerHello))?;

        // e, ee
        let server_ephemeral = validate_public_key(&ephemeral)?;
        symmetric.update_hash(server_ephemeral.as_bytes());
        symmetric.mix_into_key(self.ephemeral.diffie_hellman(&server_ephemeral).as_slice())?;

        // s, es
        let server_static = validate_public_key(&symmetric.decrypt_and_hash(&static_ciphertext)?)?;
        symmetric.mix_into_key(self.ephemeral.diffie_hellman(&server_static).as_slice())?;
        let server_payload = symmetric.decrypt_and_hash(&payload)?;

        // s, se
        let static_ciphertext = symmetric.encrypt_and_hash(self.static_keys.public().as_bytes())?;
        symmetric.mix_into_key(self.static_keys.diffie_hellman(&server_ephemeral).as_slice())?;
        let payload = symmetric.encrypt_and_hash(client_payload)?;

        let finish = self.config.codec().encode(&HandshakeMessage::ClientFinish {
            static_ciphertext,
            payload,
        })?;

        self.outcome = Some(HandshakeOutcome {
            server_static,
            server_payload,
        });
        Ok(finish)
    }

    fn expect_state(&self, expected: ClientState) -> Result<(), HandshakeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HandshakeError::InvalidState(self.state))
        }
    }

    fn fail(&mut self, error: HandshakeError) -> HandshakeError {
        warn!("noise: handshake failed in state {:?}: {error}", self.state);
        self.state = ClientState::Failed;
        self.symmetric = None;
        self.outcome = None;
        error
    }
}
