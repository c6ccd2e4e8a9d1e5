use {
    super::codec::{CborHandshakeCodec, HandshakeCodec},
    std::{fmt, sync::Arc},
};

/// The four bytes sent before the first frame and folded into the
/// transcript before anything else.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Prologue {
    /// `WA 06 03`
    #[default]
    Web,
    /// `WA 05 03`
    Mobile,
    Custom([u8; 4]),
}

impl Prologue {
    pub fn bytes(&self) -> [u8; 4] {
        match self {
            Prologue::Web => *b"WA\x06\x03",
            Prologue::Mobile => *b"WA\x05\x03",
            Prologue::Custom(bytes) => *bytes,
        }
    }
}

/// Builder for [`NoiseConfig`].
pub struct NoiseConfigBuilder {
    prologue: Prologue,
    codec: Arc<dyn HandshakeCodec>,
}

impl Default for NoiseConfigBuilder {
    fn default() -> Self {
        Self {
            prologue: Prologue::default(),
            codec: Arc::new(CborHandshakeCodec),
        }
    }
}

impl NoiseConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prologue(mut self, prologue: Prologue) -> Self {
        self.prologue = prologue;
        self
    }

    /// Replace the handshake message encoding.
    pub fn with_codec(mut self, codec: Arc<dyn HandshakeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> NoiseConfig {
        NoiseConfig {
            prologue: self.prologue,
            codec: self.codec,
        }
    }
}

/// Handshake settings shared by every connection of a client.
#[derive(Clone)]
pub struct NoiseConfig {
    prologue: Prologue,
    codec: Arc<dyn HandshakeCodec>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        NoiseConfigBuilder::default().build()
    }
}

impl NoiseConfig {
    pub fn builder() -> NoiseConfigBuilder {
        NoiseConfigBuilder::default()
    }

    pub fn prologue(&self) -> Prologue {
        self.prologue
    }

    pub fn codec(&self) -> &dyn HandshakeCodec {
        self.codec.as_ref()
    }
}

impl fmt::Debug for NoiseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseConfig")
            .field("prologue", &self.prologue)
            .finish_non_exhaustive()
    }
}
