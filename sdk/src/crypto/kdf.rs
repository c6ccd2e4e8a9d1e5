//! Stateless key derivation used by both the handshake and the ratchet.

use {
    super::CryptoError,
    hkdf::Hkdf,
    hmac::{Hmac, Mac},
    sha2::{Digest, Sha256},
    zeroize::Zeroizing,
};

/// HKDF‑SHA‑256 as per RFC 5869.
type HkdfSha256 = Hkdf<Sha256>;
/// HMAC‑SHA‑256.
type HmacSha256 = Hmac<Sha256>;

/// Output size of SHA‑256, and therefore of every derived key.
pub const HASH_LEN: usize = 32;

/// `HKDF-Expand(HKDF-Extract(salt, ikm), info, out_len)`.
///
/// A `None` salt is the RFC default of `HASH_LEN` zero bytes.
pub fn hkdf(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let hk = HkdfSha256::new(salt, ikm);
    let mut okm = Zeroizing::new(vec![0u8; out_len]);
    hk.expand(info, &mut okm)?;
    Ok(okm)
}

/// Expand to 64 bytes and split into two 32‑byte keys.
///
/// This is the shape of every two‑output derivation in the protocol:
/// `(salt, cipher key)` in the handshake, `(root key, chain key)` in the
/// ratchet and `(write key, read key)` when the handshake finishes.
pub fn derive_pair(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> Result<([u8; HASH_LEN], [u8; HASH_LEN]), CryptoError> {
    let okm = hkdf(salt, ikm, info, 2 * HASH_LEN)?;
    let mut first = [0u8; HASH_LEN];
    let mut second = [0u8; HASH_LEN];
    first.copy_from_slice(&okm[..HASH_LEN]);
    second.copy_from_slice(&okm[HASH_LEN..]);
    Ok((first, second))
}

/// `HMAC-SHA256(key, data)`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `SHA256(parts[0] || parts[1] || ...)`.
pub fn sha256(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
