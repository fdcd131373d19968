//! # TCP Wire Primitives
//!
//! Wraps a TCP stream with the framing primitives every difframe exchange is
//! built from. There is no message enum: the dispatch, handshake, and
//! download flows are strictly alternating sequences of these primitives, so
//! both peers always know which primitive comes next.
//!
//! ## Wire Protocol
//!
//! - **Integer**: 4 bytes, big-endian.
//! - **String**: raw ASCII bytes, no length prefix. The receiver performs a
//!   single read into a 4096-byte buffer; the alternating exchanges guarantee
//!   at most one string is in flight per connection.
//! - **Double**: shortest round-trip decimal rendering, framed as a String.
//! - **Byte array**: `[Integer count] -> "Ready" -> [raw bytes] -> "Ok"`.
//!   The `Ready`/`Ok` gates keep the sender from flooding a receiver that is
//!   still allocating, and confirm complete delivery.
//! - **Integer collection**: split into chunks of at most 60 integers. Each
//!   chunk is a 4-byte count followed by that many 4-byte integers, all
//!   little-endian. The sender announces the chunk count (Integer) and the
//!   receiver echoes it before any chunk flows. A chunk count of zero is the
//!   end-of-stream marker: nothing is echoed and no chunks follow.
//!
//! Framing integers (counts, sizes) travel big-endian; chunk bodies are
//! little-endian. Both ends of this crate agree, so the split is carried as
//! wire-format fact.

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::protocol::{ProtocolError, CHUNK_INT_LIMIT};

/// Receive buffer size for string reads.
const STRING_BUFFER_SIZE: usize = 4096;

/// Maximum allowed byte-array transfer (100MB) to prevent memory exhaustion.
const MAX_TRANSFER_SIZE: usize = 100 * 1024 * 1024;

/// Number of chunks needed to carry `len` integers.
fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_INT_LIMIT)
}

/// TCP connection wrapper speaking the difframe framing primitives.
pub struct Connection {
    /// Underlying TCP stream
    stream: TcpStream,
}

impl Connection {
    /// Create a new Connection from an established TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Remote address of the peer, for log lines.
    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    // ========================================================================
    // INTEGERS
    // ========================================================================

    /// Send a 4-byte big-endian integer.
    pub async fn send_int(&mut self, value: i32) -> Result<()> {
        self.stream.write_all(&value.to_be_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive a 4-byte big-endian integer.
    pub async fn recv_int(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.stream
            .read_exact(&mut buf)
            .await
            .context("connection closed while reading integer")?;
        Ok(i32::from_be_bytes(buf))
    }

    // ========================================================================
    // STRINGS AND DOUBLES
    // ========================================================================

    /// Send a string as raw ASCII bytes.
    ///
    /// There is no length prefix: every exchange in the protocol alternates,
    /// so the peer always reads exactly one pending string.
    pub async fn send_string(&mut self, value: &str) -> Result<()> {
        if value.len() > STRING_BUFFER_SIZE {
            return Err(ProtocolError::OversizedTransfer {
                size: value.len(),
                limit: STRING_BUFFER_SIZE,
            }
            .into());
        }
        self.stream.write_all(value.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive a string with a single read into a fixed buffer.
    ///
    /// Assumes the peer's write arrives whole, which holds for the short
    /// control strings this protocol sends between alternation points.
    pub async fn recv_string(&mut self) -> Result<String> {
        let mut buf = vec![0u8; STRING_BUFFER_SIZE];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            anyhow::bail!("connection closed while reading string");
        }
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Send a double as its shortest round-trip decimal string.
    pub async fn send_double(&mut self, value: f64) -> Result<()> {
        self.send_string(&value.to_string()).await
    }

    /// Receive a double framed as a decimal string.
    pub async fn recv_double(&mut self) -> Result<f64> {
        let raw = self.recv_string().await?;
        raw.trim()
            .parse::<f64>()
            .with_context(|| format!("malformed double on wire: {:?}", raw))
    }

    // ========================================================================
    // BYTE ARRAYS
    // ========================================================================

    /// Send a byte array with the Ready/Ok gating exchange.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.send_int(bytes.len() as i32).await?;

        let response = self.recv_string().await?;
        if response != "Ready" {
            return Err(ProtocolError::EchoMismatch {
                sent: "Ready".to_string(),
                got: response,
            }
            .into());
        }

        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;

        let response = self.recv_string().await?;
        if response != "Ok" {
            return Err(ProtocolError::EchoMismatch {
                sent: "Ok".to_string(),
                got: response,
            }
            .into());
        }

        Ok(())
    }

    /// Receive a byte array, answering the Ready/Ok gates.
    pub async fn recv_bytes(&mut self) -> Result<Vec<u8>> {
        let expected = self.recv_int().await?;
        if expected < 0 || expected as usize > MAX_TRANSFER_SIZE {
            return Err(ProtocolError::OversizedTransfer {
                size: expected as usize,
                limit: MAX_TRANSFER_SIZE,
            }
            .into());
        }

        self.send_string("Ready").await?;

        let mut data = vec![0u8; expected as usize];
        self.stream
            .read_exact(&mut data)
            .await
            .context("connection closed mid byte transfer")?;

        self.send_string("Ok").await?;

        Ok(data)
    }

    // ========================================================================
    // INTEGER COLLECTIONS
    // ========================================================================

    /// Send an integer collection as chunks of at most 60 values.
    ///
    /// An empty collection sends only the zero chunk count, which the peer
    /// reads as end-of-stream; no echo is exchanged in that case.
    pub async fn send_int_collection(&mut self, values: &[i32]) -> Result<()> {
        let chunks = chunk_count(values.len());
        self.send_int(chunks as i32).await?;
        if chunks == 0 {
            return Ok(());
        }

        let echo = self.recv_int().await?;
        if echo != chunks as i32 {
            return Err(ProtocolError::EchoMismatch {
                sent: chunks.to_string(),
                got: echo.to_string(),
            }
            .into());
        }

        for chunk in values.chunks(CHUNK_INT_LIMIT) {
            let mut frame = Vec::with_capacity(4 + chunk.len() * 4);
            frame.extend_from_slice(&(chunk.len() as i32).to_le_bytes());
            for value in chunk {
                frame.extend_from_slice(&value.to_le_bytes());
            }
            self.stream.write_all(&frame).await?;
        }
        self.stream.flush().await?;

        Ok(())
    }

    /// Receive an integer collection.
    ///
    /// Returns `Ok(None)` when the peer sends the zero chunk count, which
    /// marks the end of a collection stream.
    pub async fn recv_int_collection(&mut self) -> Result<Option<Vec<i32>>> {
        let chunks = self.recv_int().await?;
        if chunks == 0 {
            return Ok(None);
        }
        if chunks < 0 {
            anyhow::bail!("negative chunk count on wire: {}", chunks);
        }

        self.send_int(chunks).await?;

        let mut values = Vec::new();
        for _ in 0..chunks {
            let mut count_buf = [0u8; 4];
            self.stream
                .read_exact(&mut count_buf)
                .await
                .context("connection closed mid collection chunk")?;
            let count = i32::from_le_bytes(count_buf);
            if count < 0 || count as usize > CHUNK_INT_LIMIT {
                return Err(ProtocolError::OversizedChunk {
                    count: count.max(0) as usize,
                    limit: CHUNK_INT_LIMIT,
                }
                .into());
            }

            let mut body = vec![0u8; count as usize * 4];
            self.stream
                .read_exact(&mut body)
                .await
                .context("connection closed mid collection chunk")?;
            for word in body.chunks_exact(4) {
                values.push(i32::from_le_bytes([word[0], word[1], word[2], word[3]]));
            }
        }

        Ok(Some(values))
    }
}
