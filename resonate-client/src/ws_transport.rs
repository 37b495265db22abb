//! [`Transport`] implementation over `tokio-tungstenite`, the canonical
//! WebSocket embedding. Framing itself (text vs.
//! binary) is the transport's job; the core never sees a `tungstenite`
//! type.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use resonate_session::transport::{Transport, TransportConnector, TransportError, TransportMessage};

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<TransportMessage, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(TransportMessage::Text(text.as_str().to_string())))
                }
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(TransportMessage::Binary(bytes.to_vec())))
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_else(|| "closed".to_string());
                    return Some(Err(TransportError::Closed(reason)));
                }
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }
}
