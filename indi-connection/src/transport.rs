//! Message streams over any reliable, ordered byte transport
//!
//! A [`Connection`] pairs a [`MessageReader`] and a [`MessageWriter`] over
//! the two halves of a byte stream. TCP and in-memory pipes are provided;
//! anything implementing tokio's `AsyncRead`/`AsyncWrite` works.

use std::fmt;

use indi_codec::{Decoder, Encoder, Framer, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::Result;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Capacity of each direction of an in-memory pair
const PIPE_CAPACITY: usize = 64 * 1024;

/// A duplex INDI message stream
pub struct Connection {
    reader: MessageReader,
    writer: MessageWriter,
}

impl Connection {
    /// Wrap the two halves of a byte stream
    pub fn new<R, W>(reader: R, writer: W, peer: impl Into<String>, config: &SessionConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = peer.into();
        Self {
            reader: MessageReader::new(Box::new(reader), peer.clone(), config),
            writer: MessageWriter::new(Box::new(writer), peer, config),
        }
    }

    /// Open a TCP connection, typically to an INDI server on port 7624
    pub async fn connect_tcp(addr: impl ToSocketAddrs, config: &SessionConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_tcp(stream, config))
    }

    /// Wrap an established TCP stream
    pub fn from_tcp(stream: TcpStream, config: &SessionConfig) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", peer, e);
        }
        let (read, write) = stream.into_split();
        Self::new(read, write, peer, config)
    }

    /// Two connections joined back to back in memory
    pub fn pair(config: &SessionConfig) -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (
            Connection::new(a_read, a_write, "memory-a", config),
            Connection::new(b_read, b_write, "memory-b", config),
        )
    }

    pub fn peer(&self) -> &str {
        &self.reader.peer
    }

    pub fn reader(&mut self) -> &mut MessageReader {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut MessageWriter {
        &mut self.writer
    }

    pub fn split(self) -> (MessageReader, MessageWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.reader.peer)
            .finish()
    }
}

/// Receiving half: bytes in, messages out
pub struct MessageReader {
    inner: BoxedRead,
    framer: Framer,
    decoder: Decoder,
    buf: Vec<u8>,
    peer: String,
}

impl MessageReader {
    fn new(inner: BoxedRead, peer: String, config: &SessionConfig) -> Self {
        Self {
            inner,
            framer: Framer::new(config.max_frame_len),
            decoder: Decoder::new().with_max_blob_len(config.max_frame_len),
            buf: vec![0; config.read_buffer_size.max(1)],
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Next decodable message, or `None` once the peer has closed the stream
    ///
    /// Frames that fail to decode are logged and skipped. Framing and I/O
    /// errors are returned: after one of those the stream is unusable.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            while let Some(frame) = self.framer.next_frame()? {
                match self.decoder.decode(&frame) {
                    Ok(message) => {
                        trace!("{} <- {}", self.peer, message.tag());
                        return Ok(Some(message));
                    }
                    Err(e) => {
                        warn!("Dropping undecodable message from {}: {}", self.peer, e);
                    }
                }
            }

            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                if !self.framer.is_idle() {
                    debug!(
                        "{} closed with {} bytes of an incomplete message",
                        self.peer,
                        self.framer.buffered()
                    );
                }
                return Ok(None);
            }
            self.framer.extend(&self.buf[..n]);
        }
    }
}

/// Sending half: messages in, bytes out
pub struct MessageWriter {
    inner: BoxedWrite,
    encoder: Encoder,
    peer: String,
}

impl MessageWriter {
    fn new(inner: BoxedWrite, peer: String, config: &SessionConfig) -> Self {
        Self {
            inner,
            encoder: Encoder::new().with_compression(config.compress_blobs),
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Encode and write one message
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let frame = self.encoder.encode(message)?;
        trace!("{} -> {}", self.peer, message.tag());
        self.send_frame(&frame).await
    }

    /// Write an already encoded frame
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and close the write direction
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
