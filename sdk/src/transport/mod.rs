//! # Post‑handshake transport
//!
//! Every frame on the wire is `[len >> 16][len & 0xFFFF as u16 BE][body]`.
//! The very first frame a client sends is preceded by the 4‑byte prologue.
//! Once the handshake has produced [`TransportKeys`](crate::noise::TransportKeys)
//! every body is an AES‑256‑GCM ciphertext under the key of its direction.
//!
//! The async [`NoiseSocket`] (feature `transport`) ties the pieces together
//! over any tokio `AsyncRead + AsyncWrite` stream.

use {
    crate::{crypto::CryptoError, noise::HandshakeError},
    thiserror::Error,
};

pub mod cipher;
pub mod frame;
#[cfg(feature = "transport")]
pub mod pending;
#[cfg(feature = "transport")]
pub mod socket;

pub use {
    cipher::TransportCipher,
    frame::{FrameDecoder, FrameEncoder, FRAME_HEADER_LEN, MAX_FRAME_LEN},
};
#[cfg(feature = "transport")]
pub use {
    pending::PendingRequests,
    socket::{FrameReceiver, FrameSender, NoiseSocket},
};

/// Fatal transport errors. The connection must be torn down on any of them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// Authentication failure of a frame or an exhausted counter.
    #[error("frame crypto failure: {0}")]
    Crypto(#[from] CryptoError),
    #[error("frame of {0} bytes exceeds the 24-bit length field")]
    FrameTooLarge(usize),
    #[error("peer sent an unexpected prologue")]
    InvalidPrologue,
    #[error("connection closed")]
    Closed,
}
