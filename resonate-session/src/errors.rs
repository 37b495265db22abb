use thiserror::Error;

use crate::transport::TransportError;
use resonate_proto::Codec;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(std::time::Duration),
    #[error("server offered unsupported codec {0:?}")]
    UnsupportedCodec(Codec),
    #[error("audio sink rejected chunk: {0}")]
    SinkUnavailable(String),
}
