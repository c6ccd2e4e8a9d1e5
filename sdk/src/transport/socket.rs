//! Async Noise socket over any tokio stream.
//!
//! # Example
//!
//! ```no_run
//! use secure_channel_sdk::{crypto::KeyPair, noise::NoiseConfig, transport::NoiseSocket};
//!
//! # async fn run(stream: tokio::net::TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let (socket, outcome) =
//!     NoiseSocket::connect(stream, NoiseConfig::default(), KeyPair::generate(), b"login").await?;
//! // Validate `outcome.server_payload` here.
//! let (sender, mut receiver) = socket.split();
//! sender.send(b"request").await?;
//! let response = receiver.recv().await?;
//! # Ok(()) }
//! ```

use {
    super::{FrameDecoder, FrameEncoder, TransportCipher, TransportError},
    crate::{
        crypto::KeyPair,
        noise::{HandshakeOutcome, NoiseConfig, NoiseHandshake, TransportKeys},
    },
    log::debug,
    std::sync::Arc,
    tokio::{
        io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
        sync::Mutex,
    },
};

const READ_CHUNK: usize = 8 * 1024;

/// An established, encrypted connection.
pub struct NoiseSocket<S> {
    stream: S,
    cipher: Arc<TransportCipher>,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
}

impl<S> NoiseSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the client handshake over `stream` with a fresh ephemeral key.
    ///
    /// `payload` is the client payload sent, encrypted, in `ClientFinish`.
    /// Dropping the returned future mid‑handshake drops and wipes the
    /// handshake state.
    pub async fn connect(
        stream: S,
        config: NoiseConfig,
        static_keys: KeyPair,
        payload: &[u8],
    ) -> Result<(Self, HandshakeOutcome), TransportError> {
        let prologue = config.prologue().bytes();
        let handshake = NoiseHandshake::new(config, static_keys);
        Self::connect_with(stream, handshake, prologue, payload).await
    }

    /// Run a prepared handshake engine over `stream`.
    pub async fn connect_with(
        mut stream: S,
        mut handshake: NoiseHandshake,
        prologue: [u8; 4],
        payload: &[u8],
    ) -> Result<(Self, HandshakeOutcome), TransportError> {
        let mut encoder = FrameEncoder::with_prologue(prologue);
        let mut decoder = FrameDecoder::new();

        let hello = handshake.start()?;
        stream.write_all(&encoder.encode(&hello)?).await?;
        stream.flush().await?;

        let server_hello = read_frame(&mut stream, &mut decoder).await?;
        let finish = handshake.process_server_hello(&server_hello, payload)?;
        stream.write_all(&encoder.encode(&finish)?).await?;
        stream.flush().await?;

        let (keys, outcome) = handshake.finish()?;
        debug!("transport: noise socket established");
        Ok((Self::established(stream, &keys, encoder, decoder), outcome))
    }

    /// Wrap a stream whose handshake has already completed. `decoder` may
    /// hold bytes that arrived right after the last handshake frame.
    pub(crate) fn established(
        stream: S,
        keys: &TransportKeys,
        encoder: FrameEncoder,
        decoder: FrameDecoder,
    ) -> Self {
        Self {
            stream,
            cipher: Arc::new(TransportCipher::new(keys)),
            encoder,
            decoder,
        }
    }

    /// Split into a cloneable sender and the single receiver.
    pub fn split(self) -> (FrameSender<WriteHalf<S>>, FrameReceiver<ReadHalf<S>>) {
        let (reader, writer) = split(self.stream);
        let sender = FrameSender {
            inner: Arc::new(Mutex::new(SenderInner {
                writer,
                encoder: self.encoder,
            })),
            cipher: Arc::clone(&self.cipher),
        };
        let receiver = FrameReceiver {
            reader,
            decoder: self.decoder,
            cipher: self.cipher,
        };
        (sender, receiver)
    }
}

struct SenderInner<W> {
    writer: W,
    encoder: FrameEncoder,
}

/// Write half. Clones share one writer; frames are sealed and written under
/// the same lock, so counters reach the wire in order.
pub struct FrameSender<W> {
    inner: Arc<Mutex<SenderInner<W>>>,
    cipher: Arc<TransportCipher>,
}

impl<W> Clone for FrameSender<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cipher: Arc::clone(&self.cipher),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameSender<W> {
    pub async fn send(&self, plaintext: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        let body = self.cipher.seal(plaintext)?;
        let frame = inner.encoder.encode(&body)?;
        inner.writer.write_all(&frame).await?;
        inner.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), TransportError> {
        self.inner.lock().await.writer.shutdown().await?;
        Ok(())
    }
}

/// Read half. Owned by the single reader task.
pub struct FrameReceiver<R> {
    reader: R,
    decoder: FrameDecoder,
    cipher: Arc<TransportCipher>,
}

impl<R: AsyncRead + Unpin + Send> FrameReceiver<R> {
    /// Wait for the next frame and decrypt it.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let body = read_frame(&mut self.reader, &mut self.decoder).await?;
        self.cipher.open(&body)
    }
}

/// Read until `decoder` yields one whole frame body.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame);
        }
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Err(TransportError::Closed);
        }
        decoder.extend(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{noise::HandshakeError, test_utils::noise_server},
        tokio::io::duplex,
    };

    #[tokio::test]
    async fn test_connect_and_exchange_frames() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server_static = KeyPair::generate();
        let server_public = *server_static.public();

        let server = tokio::spawn(async move {
            let (socket, client) =
                noise_server::accept(server_io, NoiseConfig::default(), server_static, b"cert")
                    .await
                    .unwrap();
            let (sender, mut receiver) = socket.split();
            let request = receiver.recv().await.unwrap();
            sender.send(&request).await.unwrap();
            client
        });

        let (socket, outcome) = NoiseSocket::connect(
            client_io,
            NoiseConfig::default(),
            KeyPair::generate(),
            b"login",
        )
        .await
        .unwrap();
        assert_eq!(outcome.server_static, server_public);
        assert_eq!(outcome.server_payload, b"cert");

        let (sender, mut receiver) = socket.split();
        sender.send(b"echo me").await.unwrap();
        assert_eq!(receiver.recv().await.unwrap(), b"echo me");

        let client = server.await.unwrap();
        assert_eq!(client.client_payload, b"login");
    }

    #[tokio::test]
    async fn test_concurrent_senders_share_one_counter() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let (socket, _) = noise_server::accept(
                server_io,
                NoiseConfig::default(),
                KeyPair::generate(),
                b"",
            )
            .await
            .unwrap();
            let (_sender, mut receiver) = socket.split();
            let mut received = Vec::new();
            for _ in 0..20 {
                received.push(receiver.recv().await.unwrap());
            }
            received
        });

        let (socket, _) =
            NoiseSocket::connect(client_io, NoiseConfig::default(), KeyPair::generate(), b"")
                .await
                .unwrap();
        let (sender, _receiver) = socket.split();
        let tasks: Vec<_> = (0..20u8)
            .map(|i| {
                let sender = sender.clone();
                tokio::spawn(async move { sender.send(&[i]).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut received = server.await.unwrap();
        received.sort();
        assert_eq!(received, (0..20u8).map(|i| vec![i]).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_server_closing_mid_handshake() {
        let (client_io, server_io) = duplex(1024);
        drop(server_io);
        let handshake = NoiseHandshake::new(NoiseConfig::default(), KeyPair::generate());
        let result = NoiseSocket::connect_with(client_io, handshake, *b"WA\x06\x03", b"").await;
        assert!(matches!(
            result,
            Err(TransportError::Closed) | Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_server_hello_is_a_handshake_error() {
        let (client_io, mut server_io) = duplex(1024);
        let server = tokio::spawn(async move {
            let mut sink = [0u8; 64];
            let _ = server_io.read(&mut sink).await;
            let mut encoder = FrameEncoder::new();
            server_io
                .write_all(&encoder.encode(b"not a handshake").unwrap())
                .await
                .unwrap();
            server_io
        });

        let handshake = NoiseHandshake::new(NoiseConfig::default(), KeyPair::generate());
        let result = NoiseSocket::connect_with(client_io, handshake, *b"WA\x06\x03", b"").await;
        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::Codec(_)))
        ));
        let _ = server.await;
    }
}
