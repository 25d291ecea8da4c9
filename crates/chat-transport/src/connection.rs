//! Framed connection over one transport stream.
//!
//! Wire format per record: a 4-byte big-endian length prefix followed by
//! that many bytes of UTF-8 JSON. Reads are bounded by a caller-supplied
//! timeout; writes are not timed out. A connection, once closed, is never
//! reused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::record::{trimmed_for_log, Record};
use crate::transport::{StreamReader, StreamWriter};

/// Default bound for each read step.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on a declared frame length. Protects against reading a
/// garbage prefix as a multi-gigabyte allocation; generous enough for
/// image-bearing messages.
const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// One framed, bidirectional connection.
pub struct FramedConnection {
    reader: Mutex<BufReader<StreamReader>>,
    writer: Mutex<StreamWriter>,
    closed: AtomicBool,
}

impl FramedConnection {
    /// Wraps a split transport stream.
    pub fn new(reader: StreamReader, writer: StreamWriter) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    /// Serializes and sends one record.
    pub async fn send(&self, record: &Record) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let payload = record.encode()?;
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        write.await.map_err(|e| {
            if is_broken_pipe(&e) {
                self.closed.store(true, Ordering::Relaxed);
                Error::ConnectionClosed
            } else {
                Error::SendFailed(e)
            }
        })?;

        debug!(record = %trimmed_for_log(&record.to_value()), "sent record");
        Ok(())
    }

    /// Receives one record, each read step bounded by `recv_timeout`.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly before
    /// the next frame started. A timeout, a stream that ends inside a
    /// frame, or a payload that is not a JSON object are all errors — the
    /// connection is no longer usable after any of them.
    pub async fn recv(&self, recv_timeout: Duration) -> Result<Option<Value>> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let mut reader = self.reader.lock().await;

        // Length prefix. The first byte tells a clean close apart from a
        // truncated frame.
        let mut prefix = [0u8; 4];
        let first = timeout(recv_timeout, reader.read(&mut prefix[..1]))
            .await
            .map_err(|_| self.broke(Error::Timeout))?
            .map_err(Error::ReceiveFailed)?;
        if first == 0 {
            self.closed.store(true, Ordering::Relaxed);
            return Ok(None);
        }
        timeout(recv_timeout, reader.read_exact(&mut prefix[1..]))
            .await
            .map_err(|_| self.broke(Error::Timeout))?
            .map_err(|e| self.broke(map_eof(e)))?;

        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(len));
        }
        trace!(len, "reading frame payload");

        let mut payload = vec![0u8; len];
        timeout(recv_timeout, reader.read_exact(&mut payload))
            .await
            .map_err(|_| self.broke(Error::Timeout))?
            .map_err(|e| self.broke(map_eof(e)))?;

        let value: Value =
            serde_json::from_slice(&payload).map_err(|e| Error::ParseError(e.to_string()))?;
        if !value.is_object() {
            return Err(Error::ParseError("payload is not an object".into()));
        }

        debug!(record = %trimmed_for_log(&value), "received record");
        Ok(Some(value))
    }

    /// Reads one `\n`-terminated line, unbounded in time.
    ///
    /// Used for the peer-identity preamble on accepted streams, which only
    /// arrives once a peer has actually dialed us. Returns `Ok(None)` if
    /// the stream ends first.
    pub async fn recv_line(&self) -> Result<Option<String>> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(Error::ReceiveFailed)?;
        if read == 0 {
            self.closed.store(true, Ordering::Relaxed);
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_owned()))
    }

    /// Closes the connection. Idempotent; pending reads and writes on
    /// other tasks fail once the writer is shut down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            if e.kind() != std::io::ErrorKind::NotConnected {
                warn!(error = %e, "error shutting down connection");
            }
        }
    }

    /// Returns whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn broke(&self, error: Error) -> Error {
        self.closed.store(true, Ordering::Relaxed);
        error
    }
}

impl std::fmt::Debug for FramedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn is_broken_pipe(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
    )
}

fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::StreamClosed
    } else {
        Error::ReceiveFailed(e)
    }
}
