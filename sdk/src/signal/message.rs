//! Wire messages of the ratchet, serialised with CBOR.

use {
    super::{SessionError, CIPHERTEXT_MESSAGE_VERSION},
    crate::crypto::keys::{encode_public_key, serde_public_key},
    serde::{Deserialize, Serialize},
    x25519_dalek::PublicKey,
};

/// An ordinary ratchet message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub version: u8,
    #[serde(with = "serde_public_key")]
    pub ratchet_key: PublicKey,
    pub counter: u32,
    pub previous_counter: u32,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

impl SignalMessage {
    /// `version || ratchet_key || counter || previous_counter`, the part of
    /// the associated data that the ciphertext authenticates.
    pub fn header_bytes(&self) -> Vec<u8> {
        header_bytes(self.version, &self.ratchet_key, self.counter, self.previous_counter)
    }
}

pub(crate) fn header_bytes(
    version: u8,
    ratchet_key: &PublicKey,
    counter: u32,
    previous_counter: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 33 + 4 + 4);
    out.push(version);
    out.extend_from_slice(&encode_public_key(ratchet_key));
    out.extend_from_slice(&counter.to_be_bytes());
    out.extend_from_slice(&previous_counter.to_be_bytes());
    out
}

/// `sender_identity || receiver_identity || header`.
pub(crate) fn associated_data(
    sender_identity: &PublicKey,
    receiver_identity: &PublicKey,
    header: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(66 + header.len());
    out.extend_from_slice(&encode_public_key(sender_identity));
    out.extend_from_slice(&encode_public_key(receiver_identity));
    out.extend_from_slice(header);
    out
}

/// First messages of an initiator, carrying what the responder needs to
/// build the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeySignalMessage {
    pub version: u8,
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    #[serde(with = "serde_public_key")]
    pub base_key: PublicKey,
    #[serde(with = "serde_public_key")]
    pub identity_key: PublicKey,
    pub message: SignalMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiphertextMessage {
    Whisper(SignalMessage),
    PreKey(PreKeySignalMessage),
}

impl CiphertextMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, SessionError> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out).map_err(|e| SessionError::Codec(e.to_string()))?;
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SessionError> {
        let message: Self =
            ciborium::from_reader(bytes).map_err(|e| SessionError::Codec(e.to_string()))?;
        if message.version() != CIPHERTEXT_MESSAGE_VERSION {
            return Err(SessionError::InvalidMessage("unsupported message version"));
        }
        Ok(message)
    }

    pub fn version(&self) -> u8 {
        match self {
            CiphertextMessage::Whisper(message) => message.version,
            CiphertextMessage::PreKey(message) => message.version,
        }
    }

    /// The inner ratchet message.
    pub fn signal_message(&self) -> &SignalMessage {
        match self {
            CiphertextMessage::Whisper(message) => message,
            CiphertextMessage::PreKey(message) => &message.message,
        }
    }

    pub fn is_pre_key(&self) -> bool {
        matches!(self, CiphertextMessage::PreKey(_))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::crypto::KeyPair, assert_matches::assert_matches};

    fn signal_message(version: u8) -> SignalMessage {
        SignalMessage {
            version,
            ratchet_key: *KeyPair::generate().public(),
            counter: 7,
            previous_counter: 2,
            ciphertext: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_header_layout() {
        let message = signal_message(3);
        let header = message.header_bytes();
        assert_eq!(header.len(), 42);
        assert_eq!(header[0], 3);
        assert_eq!(header[1], 0x05);
        assert_eq!(&header[34..38], &7u32.to_be_bytes());
        assert_eq!(&header[38..], &2u32.to_be_bytes());
    }

    #[test]
    fn test_pre_key_message_serde() {
        let message = CiphertextMessage::PreKey(PreKeySignalMessage {
            version: 3,
            registration_id: 42,
            pre_key_id: None,
            signed_pre_key_id: 1,
            base_key: *KeyPair::generate().public(),
            identity_key: *KeyPair::generate().public(),
            message: signal_message(3),
        });
        let bytes = message.serialize().unwrap();
        assert_eq!(CiphertextMessage::deserialize(&bytes).unwrap(), message);
    }

    #[test]
    fn test_rejects_garbage_and_unknown_version() {
        assert_matches!(
            CiphertextMessage::deserialize(b"\xff\x00"),
            Err(SessionError::Codec(_))
        );
        let bytes = CiphertextMessage::Whisper(signal_message(2))
            .serialize()
            .unwrap();
        assert_matches!(
            CiphertextMessage::deserialize(&bytes),
            Err(SessionError::InvalidMessage(_))
        );
    }
}
