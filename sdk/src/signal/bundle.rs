//! Pre‑keys: what a device publishes so that others can start sessions with
//! it while it is offline.

use {
    crate::crypto::{
        keys::{encode_public_key, serde_public_key, verify_signature, SIGNATURE_LEN},
        IdentityKeyPair,
        KeyPair,
    },
    serde::{Deserialize, Serialize},
    serde_big_array::BigArray,
    x25519_dalek::PublicKey,
};

/// The public half of a device's pre‑keys, as fetched from a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    /// One‑time pre‑key, if the directory still had one.
    pub pre_key: Option<OneTimePreKey>,
    pub signed_pre_key_id: u32,
    #[serde(with = "serde_public_key")]
    pub signed_pre_key_public: PublicKey,
    #[serde(with = "BigArray")]
    pub signed_pre_key_signature: [u8; SIGNATURE_LEN],
    #[serde(with = "serde_public_key")]
    pub identity_key: PublicKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKey {
    pub id: u32,
    #[serde(with = "serde_public_key")]
    pub public: PublicKey,
}

impl PreKeyBundle {
    /// The signed pre‑key signature is an XEdDSA signature by the identity
    /// key over the encoded signed pre‑key.
    pub fn verify_signature(&self) -> bool {
        verify_signature(
            &self.identity_key,
            &encode_public_key(&self.signed_pre_key_public),
            &self.signed_pre_key_signature,
        )
    }
}

/// A one‑time pre‑key with its secret, held by the publishing device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn generate(id: u32) -> Self {
        Self {
            id,
            key_pair: KeyPair::generate(),
        }
    }

    pub fn public(&self) -> OneTimePreKey {
        OneTimePreKey {
            id: self.id,
            public: *self.key_pair.public(),
        }
    }
}

/// A medium‑term pre‑key signed by the identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
    #[serde(with = "BigArray")]
    pub signature: [u8; SIGNATURE_LEN],
}

impl SignedPreKeyRecord {
    pub fn generate(id: u32, identity: &IdentityKeyPair) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&encode_public_key(key_pair.public()));
        Self {
            id,
            key_pair,
            signature,
        }
    }
}
