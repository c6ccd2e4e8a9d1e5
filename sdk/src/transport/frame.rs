//! Length‑prefixed framing.

use super::TransportError;

/// `[len >> 16][len & 0xFFFF BE]`
pub const FRAME_HEADER_LEN: usize = 3;
/// Largest body the 24‑bit length field can describe.
pub const MAX_FRAME_LEN: usize = (1 << 24) - 1;
/// Size of the prologue that precedes the first client frame.
pub const PROLOGUE_LEN: usize = 4;

/// Encode the 3‑byte header for a body of `len` bytes.
pub fn encode_header(len: usize) -> Result<[u8; FRAME_HEADER_LEN], TransportError> {
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    let low = ((len & 0xFFFF) as u16).to_be_bytes();
    Ok([(len >> 16) as u8, low[0], low[1]])
}

/// Decode a 3‑byte header.
pub fn decode_header(header: [u8; FRAME_HEADER_LEN]) -> usize {
    ((header[0] as usize) << 16) | (u16::from_be_bytes([header[1], header[2]]) as usize)
}

/// Turns bodies into frames, prefixing the prologue exactly once.
#[derive(Debug, Default, Clone)]
pub struct FrameEncoder {
    prologue: Option<[u8; PROLOGUE_LEN]>,
}

impl FrameEncoder {
    /// An encoder that never writes a prologue.
    pub fn new() -> Self {
        Self::default()
    }

    /// An encoder whose first frame carries `prologue`.
    pub fn with_prologue(prologue: [u8; PROLOGUE_LEN]) -> Self {
        Self {
            prologue: Some(prologue),
        }
    }

    pub fn encode(&mut self, body: &[u8]) -> Result<Vec<u8>, TransportError> {
        let header = encode_header(body.len())?;
        let prologue = self.prologue.take();
        let prologue_len = prologue.map_or(0, |p| p.len());

        let mut out = Vec::with_capacity(prologue_len + FRAME_HEADER_LEN + body.len());
        if let Some(prologue) = prologue {
            out.extend_from_slice(&prologue);
        }
        out.extend_from_slice(&header);
        out.extend_from_slice(body);
        Ok(out)
    }
}

/// Accumulates bytes read from the socket and yields whole frame bodies.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    expected_prologue: Option<[u8; PROLOGUE_LEN]>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder for the accepting side, which first strips and checks the
    /// client's prologue.
    pub fn expecting_prologue(prologue: [u8; PROLOGUE_LEN]) -> Self {
        Self {
            buffer: Vec::new(),
            expected_prologue: Some(prologue),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame body, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(expected) = self.expected_prologue {
            if self.buffer.len() < PROLOGUE_LEN {
                return Ok(None);
            }
            if self.buffer[..PROLOGUE_LEN] != expected {
                return Err(TransportError::InvalidPrologue);
            }
            self.buffer.drain(..PROLOGUE_LEN);
            self.expected_prologue = None;
        }

        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = decode_header([self.buffer[0], self.buffer[1], self.buffer[2]]);
        if self.buffer.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        let body = self.buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
        self.buffer.drain(..FRAME_HEADER_LEN + len);
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches, rstest::rstest};

    #[rstest]
    #[case(0, [0, 0, 0])]
    #[case(5, [0, 0, 5])]
    #[case(0x01_0203, [1, 2, 3])]
    #[case(MAX_FRAME_LEN, [0xff, 0xff, 0xff])]
    fn test_header_layout(#[case] len: usize, #[case] expected: [u8; 3]) {
        assert_eq!(encode_header(len).unwrap(), expected);
        assert_eq!(decode_header(expected), len);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        assert_matches!(
            FrameEncoder::new().encode(&vec![0u8; MAX_FRAME_LEN + 1]),
            Err(TransportError::FrameTooLarge(len)) if len == MAX_FRAME_LEN + 1
        );
    }

    #[test]
    fn test_prologue_only_on_first_frame() {
        let mut encoder = FrameEncoder::with_prologue(*b"WA\x06\x03");
        let first = encoder.encode(b"hi").unwrap();
        let second = encoder.encode(b"yo").unwrap();
        assert_eq!(first, b"WA\x06\x03\x00\x00\x02hi");
        assert_eq!(second, b"\x00\x00\x02yo");
    }

    #[test]
    fn test_decoder_handles_partial_and_coalesced_reads() {
        let mut encoder = FrameEncoder::with_prologue(*b"WA\x06\x03");
        let mut wire = encoder.encode(b"first").unwrap();
        wire.extend(encoder.encode(b"second").unwrap());

        let mut decoder = FrameDecoder::expecting_prologue(*b"WA\x06\x03");
        decoder.extend(&wire[..6]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&wire[6..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"first");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"second");
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_wrong_prologue_rejected() {
        let mut decoder = FrameDecoder::expecting_prologue(*b"WA\x06\x03");
        decoder.extend(b"WA\x05\x03\x00\x00\x00");
        assert_matches!(decoder.next_frame(), Err(TransportError::InvalidPrologue));
    }
}
