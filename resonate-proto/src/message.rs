//! JSON text envelope: `{ "type": <string>, "payload": { ... } }`.
//!
//! Recognized message types are modeled as adjacently-tagged enums so that
//! serde handles the envelope shape for us; an unrecognized `type` or a
//! malformed payload is a [`TransientProtocol`](ParseError) condition —
//! logged and ignored, never surfaced as an `Event`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AudioFormat, BitDepth, Codec, Role};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognized message type {0:?}")]
    UnknownType(String),
}

/// Optional free-form device description sent in `client/hello`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSupport {
    pub supported_codecs: Vec<Codec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkSupport {
    pub channels: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizerSupport {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    pub client_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    pub version: i32,
    pub supported_roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_support: Option<PlayerSupport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_support: Option<ArtworkSupport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualizer_support: Option<VisualizerSupport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    pub server_id: String,
    pub name: String,
    pub version: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTime {
    pub client_transmitted: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTime {
    pub client_transmitted: i64,
    pub server_received: i64,
    pub server_transmitted: i64,
}

/// Wire spelling of [`crate::`]`PlayerReport::sync_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStateWire {
    Synchronized,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub state: SyncStateWire,
    pub volume: u8,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStreamStart {
    pub codec: Codec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_header: Option<String>,
}

impl PlayerStreamStart {
    /// Decodes `codec_header` from its base64 wire encoding, if present.
    pub fn codec_header_bytes(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.codec_header
            .as_deref()
            .map(|b64| {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.decode(b64)
            })
            .transpose()
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        BitDepth::from_bits(self.bit_depth)
            .map(|depth| AudioFormat::new(self.codec, self.channels, self.sample_rate, depth))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerStreamStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualizer: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEnd {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "client/hello")]
    ClientHello(ClientHello),
    #[serde(rename = "client/time")]
    ClientTime(ClientTime),
    #[serde(rename = "player/update")]
    PlayerUpdate(PlayerUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "server/hello")]
    ServerHello(ServerHello),
    #[serde(rename = "server/time")]
    ServerTime(ServerTime),
    #[serde(rename = "stream/start")]
    StreamStart(StreamStart),
    #[serde(rename = "stream/end")]
    StreamEnd(StreamEnd),
    #[serde(rename = "group/update")]
    GroupUpdate(GroupUpdate),
    #[serde(rename = "session/update")]
    SessionUpdate(SessionUpdate),
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage serializes infallibly")
    }
}

impl ServerMessage {
    /// Parses one JSON text frame. Unknown `type` values and malformed
    /// JSON both become [`ParseError`] — the caller logs and ignores them,
    /// per the *TransientProtocol* category of the error taxonomy.
    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let Some(type_name) = value.get("type").and_then(|t| t.as_str()) else {
            return Err(ParseError::UnknownType(String::new()));
        };
        match type_name {
            "server/hello" | "server/time" | "stream/start" | "stream/end" | "group/update"
            | "session/update" => Ok(serde_json::from_value(value)?),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_client(msg: ClientMessage) {
        let json = msg.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("type").is_some());
        let back: ClientMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn client_hello_roundtrip() {
        roundtrip_client(ClientMessage::ClientHello(ClientHello {
            client_id: "abc-123".into(),
            name: "Kitchen".into(),
            device_info: Some(DeviceInfo {
                platform: "linux".into(),
                model: None,
            }),
            version: 1,
            supported_roles: vec![Role::Player],
            player_support: Some(PlayerSupport {
                supported_codecs: vec![Codec::Pcm, Codec::Opus],
            }),
            artwork_support: None,
            visualizer_support: None,
        }));
    }

    #[test]
    fn client_time_roundtrip() {
        roundtrip_client(ClientMessage::ClientTime(ClientTime {
            client_transmitted: 12_345,
        }));
    }

    #[test]
    fn player_update_uses_snake_case_field_names() {
        let msg = ClientMessage::PlayerUpdate(PlayerUpdate {
            state: SyncStateWire::Synchronized,
            volume: 80,
            muted: false,
        });
        let json = msg.to_json();
        assert!(json.contains("\"volume\":80"));
        assert!(json.contains("\"muted\":false"));
        roundtrip_client(msg);
    }

    #[test]
    fn server_hello_parses() {
        let text = r#"{"type":"server/hello","payload":{"server_id":"s1","name":"Resonate Server","version":1}}"#;
        let msg = ServerMessage::from_json(text).unwrap();
        assert_eq!(
            msg,
            ServerMessage::ServerHello(ServerHello {
                server_id: "s1".into(),
                name: "Resonate Server".into(),
                version: 1,
            })
        );
    }

    #[test]
    fn stream_end_has_empty_payload() {
        let text = r#"{"type":"stream/end","payload":{}}"#;
        let msg = ServerMessage::from_json(text).unwrap();
        assert_eq!(msg, ServerMessage::StreamEnd(StreamEnd {}));
    }

    #[test]
    fn unknown_type_is_transient_protocol_error() {
        let text = r#"{"type":"unknown/thing","payload":{}}"#;
        assert!(matches!(
            ServerMessage::from_json(text),
            Err(ParseError::UnknownType(_))
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ServerMessage::from_json("not json").is_err());
    }

    #[test]
    fn session_update_all_metadata_subfields_optional() {
        let text = r#"{"type":"session/update","payload":{"metadata":{}}}"#;
        let msg = ServerMessage::from_json(text).unwrap();
        assert_eq!(
            msg,
            ServerMessage::SessionUpdate(SessionUpdate {
                group_id: None,
                playback_state: None,
                metadata: Some(SessionMetadata::default()),
            })
        );
    }
}
