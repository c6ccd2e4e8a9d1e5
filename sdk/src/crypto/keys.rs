//! X25519 key material.
//!
//! [`KeyPair`] is used for every Diffie‑Hellman key in the crate: Noise
//! ephemeral and static keys, X3DH base keys, ratchet keys and pre‑keys.
//! [`IdentityKeyPair`] additionally signs with XEdDSA, so one 32‑byte scalar
//! serves both as a Montgomery DH secret and as an Edwards signing key.
//!
//! Public keys travel in the 33‑byte `0x05 || u` encoding.

use {
    super::CryptoError,
    rand::rngs::OsRng,
    serde::{Deserialize, Deserializer, Serialize, Serializer},
    std::fmt,
    x25519_dalek::{PublicKey, StaticSecret},
    xeddsa::{
        xed25519::{PrivateKey as XEdPrivate, PublicKey as XEdPublic},
        Sign,
        Verify,
    },
    zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing},
};

/// Type byte of a Curve25519 public key in its encoded form.
pub const KEY_TYPE_DJB: u8 = 0x05;
/// Raw X25519 public key size.
pub const PUBLIC_KEY_LEN: usize = 32;
/// `KEY_TYPE_DJB || u` size.
pub const ENCODED_PUBLIC_KEY_LEN: usize = 33;
/// XEdDSA signature size.
pub const SIGNATURE_LEN: usize = 64;

/// Encode `pk` as `0x05 || u`.
#[inline]
pub fn encode_public_key(pk: &PublicKey) -> [u8; ENCODED_PUBLIC_KEY_LEN] {
    let mut out = [0u8; ENCODED_PUBLIC_KEY_LEN];
    out[0] = KEY_TYPE_DJB;
    out[1..].copy_from_slice(pk.as_bytes());
    out
}

/// Decode a public key from either the 33‑byte encoded form or the raw
/// 32‑byte form.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let raw = match bytes.len() {
        ENCODED_PUBLIC_KEY_LEN if bytes[0] == KEY_TYPE_DJB => &bytes[1..],
        ENCODED_PUBLIC_KEY_LEN => return Err(CryptoError::UnknownKeyType(bytes[0])),
        PUBLIC_KEY_LEN => bytes,
        actual => {
            return Err(CryptoError::InvalidKeyLength {
                expected: ENCODED_PUBLIC_KEY_LEN,
                actual,
            })
        }
    };
    let mut key = [0u8; PUBLIC_KEY_LEN];
    key.copy_from_slice(raw);
    Ok(PublicKey::from(key))
}

/// Check an XEdDSA `signature` over `message` against an X25519 identity
/// public key.
pub fn verify_signature(
    identity: &PublicKey,
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> bool {
    XEdPublic::from(identity).verify(message, signature).is_ok()
}

// === Serialisation helper ===

/// Zeroizing wrapper used to (de)serialise a secret scalar.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SecretScalar(#[serde(with = "serde_bytes")] [u8; 32]);

impl From<&StaticSecret> for SecretScalar {
    fn from(secret: &StaticSecret) -> Self {
        Self(secret.to_bytes())
    }
}

impl From<&SecretScalar> for StaticSecret {
    fn from(scalar: &SecretScalar) -> Self {
        StaticSecret::from(scalar.0)
    }
}

// === Key pairs ===

/// An X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Raw 32‑byte public key.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// `DH(self.secret, their)`, wiped on drop.
    pub fn diffie_hellman(&self, their: &PublicKey) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.diffie_hellman(their).to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Serialize for KeyPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        SecretScalar::from(&self.secret).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let scalar = SecretScalar::deserialize(deserializer)?;
        Ok(KeyPair::from_secret(StaticSecret::from(&scalar)))
    }
}

/// Long‑term identity key pair. Signs with XEdDSA and agrees keys with X25519.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKeyPair {
    pair: KeyPair,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            pair: KeyPair::generate(),
        }
    }

    pub fn from_secret(secret: StaticSecret) -> Self {
        Self {
            pair: KeyPair::from_secret(secret),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.pair.public()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.pair
    }

    pub fn diffie_hellman(&self, their: &PublicKey) -> Zeroizing<[u8; 32]> {
        self.pair.diffie_hellman(their)
    }

    /// XEdDSA signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        XEdPrivate::from(self.pair.secret()).sign(message, OsRng)
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdentityKeyPair").field(&self.pair).finish()
    }
}

/// Serde for `x25519_dalek::PublicKey` in its 33‑byte encoded form.
pub mod serde_public_key {
    use {
        super::{decode_public_key, encode_public_key, PublicKey},
        serde::{de::Error, Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&encode_public_key(key))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PublicKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: serde_bytes::ByteBuf = Deserialize::deserialize(deserializer)?;
        decode_public_key(&bytes).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_dh_agrees() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        assert_eq!(
            *alice.diffie_hellman(bob.public()),
            *bob.diffie_hellman(alice.public())
        );
    }

    #[test]
    fn test_public_key_encoding() {
        let pair = KeyPair::generate();
        let encoded = encode_public_key(pair.public());
        assert_eq!(encoded[0], KEY_TYPE_DJB);
        assert_eq!(decode_public_key(&encoded).unwrap(), *pair.public());
        assert_eq!(
            decode_public_key(&pair.public_bytes()).unwrap(),
            *pair.public()
        );

        let mut wrong_type = encoded;
        wrong_type[0] = 0x06;
        assert_matches!(
            decode_public_key(&wrong_type),
            Err(CryptoError::UnknownKeyType(0x06))
        );
        assert_matches!(
            decode_public_key(&encoded[..20]),
            Err(CryptoError::InvalidKeyLength { actual: 20, .. })
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = IdentityKeyPair::generate();
        let message = encode_public_key(KeyPair::generate().public());
        let signature = identity.sign(&message);
        assert!(verify_signature(identity.public_key(), &message, &signature));

        let mut tampered = signature;
        tampered[10] ^= 0x01;
        assert!(!verify_signature(identity.public_key(), &message, &tampered));

        let stranger = IdentityKeyPair::generate();
        assert!(!verify_signature(stranger.public_key(), &message, &signature));
    }

    #[test]
    fn test_serde_keeps_secret() {
        let identity = IdentityKeyPair::generate();
        let mut buf = Vec::new();
        ciborium::into_writer(&identity, &mut buf).unwrap();
        let restored: IdentityKeyPair = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(restored.public_key(), identity.public_key());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let pair = KeyPair::generate();
        let printed = format!("{pair:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(&hex::encode(pair.secret().to_bytes())));
    }
}
