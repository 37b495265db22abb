//! Transport abstraction. The core carries two payload kinds over a
//! message-oriented full-duplex stream; the canonical embedding is
//! WebSocket, but nothing here depends on that.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed: {0}")]
    Closed(String),
    #[error("transport I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Clone)]
pub enum TransportMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// A connected, message-oriented duplex stream.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;
    /// `None` signals the transport closed without error.
    async fn recv(&mut self) -> Option<Result<TransportMessage, TransportError>>;
}

/// Opens a fresh [`Transport`] on demand — lets the reconnect supervisor
/// retry without the Session Controller knowing anything about URLs or
/// handshakes below the WebSocket layer.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}
