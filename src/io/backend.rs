//! TCP connection to the simulation engine
//!
//! The engine speaks unframed JSON-ish text over a raw stream socket:
//! outbound commands are compact JSON objects, inbound is whatever the
//! engine prints. One read is treated as one logical message and handed to
//! the tolerant parser; there is no length prefix or delimiter, so a message
//! split across two reads is accepted data loss, not something to reassemble.

use crate::domain::types::{Command, ResponseFrame};
use crate::infra::config::Config;
use crate::io::parser;
use bytes::BytesMut;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const READ_BUF_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("backend connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("backend command encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("backend write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("backend read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("backend connection is closed")]
    Closed,
}

/// One unit of inbound backend traffic, normalized.
#[derive(Debug)]
pub enum BackendEvent {
    Frame(ResponseFrame),
    /// Malformed text the parser could not recover anything from; the caller
    /// skips it and keeps streaming.
    ParseSkipped,
    /// Peer closed the stream (0-byte read).
    EndOfStream,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub warmup: Duration,
    pub dial_timeout: Duration,
}

impl BackendConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.backend_host().to_string(),
            port: config.backend_port(),
            warmup: config.backend_warmup(),
            dial_timeout: config.backend_dial_timeout(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12345,
            warmup: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(10),
        }
    }
}

/// One-time latch for the engine warm-up wait. The engine process takes a
/// while to become reachable after the surrounding system starts; later
/// connects in the same process skip the wait.
static WARMUP_DONE: OnceCell<()> = OnceCell::const_new();

async fn warmup_once(delay: Duration) {
    WARMUP_DONE
        .get_or_init(|| async move {
            if !delay.is_zero() {
                info!(delay_secs = delay.as_secs(), "backend_warmup_wait");
                tokio::time::sleep(delay).await;
            }
        })
        .await;
}

/// Owns exactly one stream socket to the simulation engine.
///
/// Created on session start, reused across updates, torn down on stop,
/// error, or peer disconnect. Never shared across sessions.
pub struct BackendConnection {
    stream: Option<TcpStream>,
    buf: BytesMut,
}

impl BackendConnection {
    /// Single connect attempt bounded by the dial timeout. Retry policy, if
    /// any, belongs to the caller.
    pub async fn connect(config: &BackendConfig) -> Result<Self, BackendError> {
        warmup_once(config.warmup).await;

        let addr = format!("{}:{}", config.host, config.port);
        debug!(addr = %addr, "backend_connecting");

        let stream = tokio::time::timeout(config.dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BackendError::ConnectTimeout(config.dial_timeout))?
            .map_err(BackendError::Connect)?;
        stream.set_nodelay(true).map_err(BackendError::Connect)?;

        info!(addr = %addr, "backend_connected");
        Ok(Self { stream: Some(stream), buf: BytesMut::with_capacity(READ_BUF_SIZE) })
    }

    /// Serialize a command to the engine's textual format and write it.
    pub async fn send(&mut self, command: &Command) -> Result<(), BackendError> {
        let stream = self.stream.as_mut().ok_or(BackendError::Closed)?;
        let payload = serde_json::to_string(command)?;

        stream.write_all(payload.as_bytes()).await.map_err(BackendError::Write)?;
        debug!(command = command.kind(), len = payload.len(), "backend_command_sent");
        Ok(())
    }

    /// Read one logical message and normalize it through the parser.
    ///
    /// Cancel-safe: the read either consumes one chunk or nothing, so this
    /// can sit in a `select!` arm.
    pub async fn receive_frame(&mut self) -> Result<BackendEvent, BackendError> {
        let stream = self.stream.as_mut().ok_or(BackendError::Closed)?;

        self.buf.clear();
        let n = stream.read_buf(&mut self.buf).await.map_err(BackendError::Read)?;
        if n == 0 {
            debug!("backend_end_of_stream");
            return Ok(BackendEvent::EndOfStream);
        }

        let text = String::from_utf8_lossy(&self.buf);
        match parser::parse(&text) {
            Ok(frame) => Ok(BackendEvent::Frame(frame)),
            Err(_) => {
                warn!(len = n, "backend_frame_unparseable");
                Ok(BackendEvent::ParseSkipped)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Idempotent teardown; dropping the stream releases the socket.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("backend_closed");
        }
    }
}

impl Drop for BackendConnection {
    fn drop(&mut self) {
        self.close();
    }
}
