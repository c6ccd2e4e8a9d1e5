//! Byte encoding of the three handshake messages.
//!
//! The engine never looks inside the encoding; it only needs a
//! [`HandshakeCodec`] to turn a [`HandshakeMessage`] into bytes and back.
//! [`CborHandshakeCodec`] is the default.

use {
    super::HandshakeError,
    serde::{Deserialize, Serialize},
};

/// The three messages of the XX pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    /// `-> e`
    ClientHello {
        #[serde(with = "serde_bytes")]
        ephemeral: Vec<u8>,
    },
    /// `<- e, ee, s, es` followed by the encrypted server payload.
    ServerHello {
        #[serde(with = "serde_bytes")]
        ephemeral: Vec<u8>,
        #[serde(with = "serde_bytes")]
        static_ciphertext: Vec<u8>,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
    /// `-> s, se` followed by the encrypted client payload.
    ClientFinish {
        #[serde(with = "serde_bytes")]
        static_ciphertext: Vec<u8>,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
}

impl HandshakeMessage {
    /// Variant name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeMessage::ClientHello { .. } => "ClientHello",
            HandshakeMessage::ServerHello { .. } => "ServerHello",
            HandshakeMessage::ClientFinish { .. } => "ClientFinish",
        }
    }
}

/// Encodes and decodes [`HandshakeMessage`]s.
pub trait HandshakeCodec: Send + Sync {
    fn encode(&self, message: &HandshakeMessage) -> Result<Vec<u8>, HandshakeError>;

    fn decode(&self, bytes: &[u8]) -> Result<HandshakeMessage, HandshakeError>;
}

/// CBOR via `ciborium`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborHandshakeCodec;

impl HandshakeCodec for CborHandshakeCodec {
    fn encode(&self, message: &HandshakeMessage) -> Result<Vec<u8>, HandshakeError> {
        let mut buf = Vec::new();
        ciborium::into_writer(message, &mut buf)
            .map_err(|e| HandshakeError::Codec(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<HandshakeMessage, HandshakeError> {
        ciborium::from_reader(bytes).map_err(|e| HandshakeError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_cbor_codec_preserves_variant() {
        let codec = CborHandshakeCodec;
        let message = HandshakeMessage::ServerHello {
            ephemeral: vec![1; 32],
            static_ciphertext: vec![2; 48],
            payload: vec![3; 20],
        };
        let bytes = codec.encode(&message).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), message);
        assert_eq!(message.kind(), "ServerHello");
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        assert_matches!(
            CborHandshakeCodec.decode(&[0xff, 0x00, 0x13]),
            Err(HandshakeError::Codec(_))
        );
    }
}
