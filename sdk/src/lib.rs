//! This library secures a client's connection to a messaging server and the
//! messages it exchanges with other devices over that connection.
//!
//! The connection is authenticated and encrypted with a Noise XX handshake
//! followed by AES‑256‑GCM framing. End‑to‑end payloads between devices are
//! protected by a Signal Double Ratchet session per peer device.

/// Cryptographic primitives shared by every layer: AES‑256‑GCM with counter
/// nonces, HKDF and HMAC over SHA‑256, X25519 key pairs and the XEdDSA
/// signing identity key.
#[cfg(feature = "crypto")]
pub mod crypto;

/// A fixed‑capacity map with least‑recently‑used eviction. Bounds every
/// cache of the ratchet.
#[cfg(feature = "signal")]
pub mod bounded;

/// The client side of the Noise XX handshake that opens a server connection.
#[cfg(feature = "noise")]
pub mod noise;

/// Length‑prefixed framing and the post‑handshake frame cipher. With the
/// `transport` feature also the async socket over tokio streams.
#[cfg(feature = "noise")]
pub mod transport;

/// Signal Double Ratchet sessions: X3DH establishment, the ratchet engine,
/// session records, sender-key groups and the injected stores.
#[cfg(feature = "signal")]
pub mod signal;

/// Test helpers: a simulated Noise server and ready‑made Signal devices.
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
