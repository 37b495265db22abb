//! End-to-end drive of the Session Controller against a fake in-memory
//! transport: handshake, clock-sync probe, stream start, one audio chunk,
//! stream end, disconnect. Exercises the state machine transitions
//! without a real WebSocket or audio device.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use resonate_proto::frame::{BinaryFrame, FrameKind};
use resonate_proto::message::{
    ClientMessage, PlayerStreamStart, ServerHello, ServerMessage, StreamEnd, StreamStart,
};
use resonate_proto::{Codec, ServerMicros};
use resonate_session::transport::{Transport, TransportConnector, TransportError, TransportMessage};
use resonate_session::{ClientIdentity, Event, SessionConfig, SessionController};
use resonate_sink::NullAudioSink;

struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<TransportMessage>,
    outgoing: mpsc::UnboundedSender<TransportMessage>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(TransportMessage::Text(text))
            .map_err(|_| TransportError::Closed("test harness dropped".into()))
    }

    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.outgoing
            .send(TransportMessage::Binary(bytes))
            .map_err(|_| TransportError::Closed("test harness dropped".into()))
    }

    async fn recv(&mut self) -> Option<Result<TransportMessage, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }
}

type FakeChannels = (
    mpsc::UnboundedReceiver<TransportMessage>,
    mpsc::UnboundedSender<TransportMessage>,
);

struct FakeConnector {
    slot: Mutex<Option<FakeChannels>>,
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        match self.slot.lock().unwrap().take() {
            Some((incoming, outgoing)) => Ok(Box::new(FakeTransport { incoming, outgoing })),
            None => Err(TransportError::Closed("single-use fake exhausted".into())),
        }
    }
}

/// Reads the next text message sent by the client, parsed as JSON.
async fn next_client_text(rx: &mut mpsc::UnboundedReceiver<TransportMessage>) -> ClientMessage {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("client did not send anything in time")
            .expect("client channel closed")
        {
            TransportMessage::Text(text) => {
                return serde_json::from_str(&text).expect("client sent non-envelope JSON")
            }
            TransportMessage::Binary(_) => continue,
        }
    }
}

#[tokio::test]
async fn full_session_lifecycle_over_fake_transport() {
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<TransportMessage>();
    let (from_client_tx, mut from_client_rx) = mpsc::unbounded_channel::<TransportMessage>();

    let connector = std::sync::Arc::new(FakeConnector {
        slot: Mutex::new(Some((to_client_rx, from_client_tx))),
    });

    let identity = ClientIdentity {
        client_id: "test-client".into(),
        name: "Integration Test Client".into(),
        device_info: None,
    };

    let sink = std::sync::Arc::new(NullAudioSink::new());
    let (handle, mut events) = SessionController::spawn(
        connector,
        identity,
        SessionConfig::default(),
        sink.clone(),
    );

    // 1. Handshake: client sends hello first.
    match next_client_text(&mut from_client_rx).await {
        ClientMessage::ClientHello(hello) => {
            assert_eq!(hello.client_id, "test-client");
        }
        other => panic!("expected client/hello, got {other:?}"),
    }

    // Server replies with its hello.
    to_client_tx
        .send(TransportMessage::Text(
            ServerMessage::ServerHello(ServerHello {
                server_id: "srv-1".into(),
                name: "Fake Server".into(),
                version: 1,
            })
            .to_json_for_test(),
        ))
        .unwrap();

    // Client should report connected and send an initial player/update.
    assert!(matches!(events.recv().await, Some(Event::ServerConnected)));
    match next_client_text(&mut from_client_rx).await {
        ClientMessage::PlayerUpdate(update) => assert_eq!(update.volume, 100),
        other => panic!("expected initial player/update, got {other:?}"),
    }

    // The handshake burst starts probing immediately.
    match next_client_text(&mut from_client_rx).await {
        ClientMessage::ClientTime(_) => {}
        other => panic!("expected client/time probe, got {other:?}"),
    }

    // 2. Stream start with a PCM format.
    to_client_tx
        .send(TransportMessage::Text(
            ServerMessage::StreamStart(StreamStart {
                player: Some(PlayerStreamStart {
                    codec: Codec::Pcm,
                    sample_rate: 48_000,
                    channels: 2,
                    bit_depth: 16,
                    codec_header: None,
                }),
                artwork: None,
                visualizer: None,
            })
            .to_json_for_test(),
        ))
        .unwrap();

    match events.recv().await {
        Some(Event::StreamStarted(fmt)) => {
            assert_eq!(fmt.codec, Codec::Pcm);
            assert_eq!(fmt.channels, 2);
        }
        other => panic!("expected StreamStarted, got {other:?}"),
    }

    // 3. One audio chunk, well inside the playout window (far-future
    // timestamp so it is scheduled rather than immediately dropped-late).
    let frame = BinaryFrame::new(
        FrameKind::AudioChunk,
        ServerMicros::new(9_999_000_000),
        vec![0u8; 16],
    );
    to_client_tx
        .send(TransportMessage::Binary(frame.encode().unwrap()))
        .unwrap();

    // Give the controller a moment to decode+schedule the chunk, then
    // confirm no error counters moved.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = handle.stats();
    assert_eq!(stats.decode_errors, 0);

    // 4. Stream end.
    to_client_tx
        .send(TransportMessage::Text(
            ServerMessage::StreamEnd(StreamEnd {}).to_json_for_test(),
        ))
        .unwrap();
    assert!(matches!(events.recv().await, Some(Event::StreamEnded)));

    // 5. Disconnect is idempotent.
    handle.disconnect();
    handle.disconnect();

    // Drain remaining events without hanging the test if none arrive.
    let _ = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
}

/// `ServerMessage` has no public JSON encoder (servers are out of scope
/// for this crate) — the test harness only needs one to play the
/// server's side of the handshake, so it is added here rather than on
/// the type itself.
trait ServerMessageTestExt {
    fn to_json_for_test(&self) -> String;
}

impl ServerMessageTestExt for ServerMessage {
    fn to_json_for_test(&self) -> String {
        serde_json::to_string(self).expect("ServerMessage serializes infallibly")
    }
}
