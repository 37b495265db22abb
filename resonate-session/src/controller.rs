//! The Session Controller itself: connection lifecycle, handshake, and
//! frame demultiplexing.
//!
//! A `Transport` is a single exclusively-owned duplex stream, so text
//! receive, binary receive, outbound sends, probe scheduling, and
//! telemetry all cooperate inside one `tokio::select!` loop rather than
//! as independent tasks — the alternative would need a transport split
//! into separate read/write halves, which the trait doesn't model.
//! The Scheduler's tick loop and the Sink's drive loop remain genuinely
//! separate tasks, owned by their respective crates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use resonate_decode::Decoder;
use resonate_proto::frame::{BinaryFrame, FrameKind};
use resonate_proto::message::{
    ClientHello, ClientMessage, ClientTime, PlayerSupport, PlayerUpdate, ServerMessage,
};
use resonate_proto::{AudioFormat, LocalMicros, ServerMicros};
use resonate_scheduler::{ScheduleOutcome, Scheduler};
use resonate_sink::AudioSink;
use resonate_sync::ClockSync;

use crate::errors::SessionError;
use crate::handle::SessionHandle;
use crate::state::SessionState;
use crate::transport::{Transport, TransportConnector, TransportMessage};
use crate::{ClientIdentity, Event, SessionConfig, SessionStats, SyncState};

pub(crate) enum ControlMsg {
    SetVolume(f32),
    SetMute(bool),
}

/// Monotonic local microsecond clock anchored at process start, matching
/// the domain the server uses for its own timestamps ("Server clock
/// domain").
struct LocalClock {
    origin: Instant,
}

impl LocalClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    fn now(&self) -> LocalMicros {
        LocalMicros::new(self.origin.elapsed().as_micros() as i64)
    }
}

#[derive(Clone, Copy)]
struct PlayerReportState {
    volume: u8,
    muted: bool,
    sync_state: SyncState,
    dirty: bool,
}

impl Default for PlayerReportState {
    fn default() -> Self {
        Self {
            volume: 100,
            muted: false,
            sync_state: SyncState::Synchronized,
            dirty: true,
        }
    }
}

/// Logs at most once per unique cause per second.
#[derive(Default)]
struct RateLimitedLog {
    last_logged: HashMap<String, Instant>,
}

impl RateLimitedLog {
    fn should_log(&mut self, cause: &str) -> bool {
        let now = Instant::now();
        match self.last_logged.get(cause) {
            Some(last) if now.duration_since(*last) < Duration::from_secs(1) => false,
            _ => {
                self.last_logged.insert(cause.to_string(), now);
                true
            }
        }
    }
}

/// Resources live only while a stream is active; torn down on
/// `stream/end`, an unsupported codec, or disconnect.
struct StreamRuntime {
    decoder: Decoder,
    scheduler: Arc<Scheduler>,
    sink_cancel: CancellationToken,
    sink_task: tokio::task::JoinHandle<()>,
}

impl StreamRuntime {
    async fn shutdown(self) {
        self.scheduler.finish().await;
        self.sink_cancel.cancel();
        let _ = self.sink_task.await;
    }
}

enum EpochExit {
    Shutdown,
    Lost(SessionError),
}

/// Entry point: no methods beyond [`Self::spawn`] — the connected session
/// lives entirely inside the task this spawns, addressed only through the
/// returned [`SessionHandle`] and event stream.
pub struct SessionController;

impl SessionController {
    pub fn spawn(
        connector: Arc<dyn TransportConnector>,
        identity: ClientIdentity,
        config: SessionConfig,
        sink: Arc<dyn AudioSink>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<Event>) {
        let state = Arc::new(Mutex::new(SessionState::Disconnected));
        let stats = Arc::new(Mutex::new(SessionStats::default()));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let handle = SessionHandle::new(
            state.clone(),
            stats.clone(),
            control_tx,
            shutdown.clone(),
        );

        tokio::spawn(run_supervisor(
            connector, identity, config, sink, state, stats, control_rx, events_tx, shutdown,
        ));

        (handle, events_rx)
    }
}

fn set_state(state: &Arc<Mutex<SessionState>>, new: SessionState) {
    *state.lock().unwrap() = new;
}

#[allow(clippy::too_many_arguments)]
async fn run_supervisor(
    connector: Arc<dyn TransportConnector>,
    identity: ClientIdentity,
    config: SessionConfig,
    sink: Arc<dyn AudioSink>,
    state: Arc<Mutex<SessionState>>,
    stats: Arc<Mutex<SessionStats>>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    events_tx: mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
) {
    let local_clock = Arc::new(LocalClock::new());
    let player = Arc::new(Mutex::new(PlayerReportState::default()));

    loop {
        if shutdown.is_cancelled() {
            set_state(&state, SessionState::Disconnected);
            return;
        }

        set_state(&state, SessionState::Connecting);
        let exit = run_connection_epoch(
            connector.as_ref(),
            &identity,
            &config,
            sink.clone(),
            &state,
            &stats,
            &player,
            &local_clock,
            &mut control_rx,
            &events_tx,
            shutdown.clone(),
        )
        .await;

        set_state(&state, SessionState::Disconnected);

        match exit {
            EpochExit::Shutdown => return,
            EpochExit::Lost(err) => {
                tracing::warn!(error = %err, "session lost, reconnecting");
                let _ = events_tx.send(Event::Error(err.to_string()));
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(config.reconnect_backoff) => {}
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_epoch(
    connector: &dyn TransportConnector,
    identity: &ClientIdentity,
    config: &SessionConfig,
    sink: Arc<dyn AudioSink>,
    state: &Arc<Mutex<SessionState>>,
    stats: &Arc<Mutex<SessionStats>>,
    player: &Arc<Mutex<PlayerReportState>>,
    local_clock: &Arc<LocalClock>,
    control_rx: &mut mpsc::UnboundedReceiver<ControlMsg>,
    events_tx: &mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
) -> EpochExit {
    let mut transport = match connector.connect().await {
        Ok(t) => t,
        Err(e) => return EpochExit::Lost(e.into()),
    };

    set_state(state, SessionState::HandshakePending);
    let hello = ClientMessage::ClientHello(ClientHello {
        client_id: identity.client_id.clone(),
        name: identity.name.clone(),
        device_info: identity.device_info.clone(),
        version: 1,
        supported_roles: vec![resonate_proto::Role::Player],
        player_support: Some(PlayerSupport {
            supported_codecs: resonate_decode::available_codecs(),
        }),
        artwork_support: None,
        visualizer_support: None,
    });
    if let Err(e) = transport.send_text(hello.to_json()).await {
        return EpochExit::Lost(e.into());
    }

    let handshake = tokio::time::timeout(config.handshake_timeout, async {
        loop {
            match transport.recv().await {
                Some(Ok(TransportMessage::Text(text))) => {
                    match ServerMessage::from_json(&text) {
                        Ok(ServerMessage::ServerHello(hello)) => return Ok(hello),
                        Ok(_) => continue, // anything else before hello is ignored
                        Err(_) => continue, // TransientProtocol: log and ignore
                    }
                }
                Some(Ok(TransportMessage::Binary(_))) => continue,
                Some(Err(e)) => return Err(SessionError::from(e)),
                None => {
                    return Err(SessionError::Transport(crate::transport::TransportError::Closed(
                        "closed during handshake".to_string(),
                    )))
                }
            }
        }
    })
    .await;

    match handshake {
        Ok(Ok(_server_hello)) => {}
        Ok(Err(e)) => return EpochExit::Lost(e),
        Err(_) => return EpochExit::Lost(SessionError::HandshakeTimeout(config.handshake_timeout)),
    }

    set_state(state, SessionState::Ready);
    let _ = events_tx.send(Event::ServerConnected);

    let snapshot = {
        let mut p = player.lock().unwrap();
        *p = PlayerReportState::default();
        p.dirty = false;
        *p
    };
    if send_player_update(&mut *transport, &snapshot).await.is_err() {
        return EpochExit::Lost(SessionError::Transport(
            crate::transport::TransportError::Closed("write failed after hello".to_string()),
        ));
    }

    let mut clock = ClockSync::new();
    let mut rate_limit = RateLimitedLog::default();
    let mut stream: Option<StreamRuntime> = None;
    let mut auto_started = false;

    // The first probe fires immediately (the zero-delay `probe_sleep`
    // below); `probe_remaining` only gates the *subsequent* ones, so it
    // starts one short of the configured burst count to land exactly
    // `probe_burst_count` rapid probes before falling back to the steady
    // cadence.
    let mut probe_remaining = config.probe_burst_count.saturating_sub(1);
    let mut probe_sleep = Box::pin(tokio::time::sleep(Duration::from_millis(0)));
    let mut telemetry = tokio::time::interval(config.telemetry_interval);

    let exit = 'session: loop {
        tokio::select! {
            _ = shutdown.cancelled() => break 'session EpochExit::Shutdown,

            msg = transport.recv() => {
                match msg {
                    Some(Ok(TransportMessage::Text(text))) => {
                        match ServerMessage::from_json(&text) {
                            Ok(server_msg) => {
                                if let Err(exit) = handle_server_message(
                                    server_msg, &mut *transport, &mut clock, local_clock,
                                    state, stats, player, events_tx, &mut stream, &mut auto_started, sink.clone(), config,
                                ).await {
                                    break 'session exit;
                                }
                            }
                            Err(e) => {
                                stats.lock().unwrap().transient_protocol += 1;
                                if rate_limit.should_log(&e.to_string()) {
                                    tracing::debug!(error = %e, "ignoring malformed/unrecognized message");
                                }
                            }
                        }
                    }
                    Some(Ok(TransportMessage::Binary(bytes))) => {
                        handle_binary_frame(
                            bytes, &mut *transport, &mut clock, local_clock, state, stats,
                            player, events_tx, &mut stream, &mut auto_started, sink.clone(), config, &mut rate_limit,
                        ).await;
                    }
                    Some(Err(e)) => break 'session EpochExit::Lost(e.into()),
                    None => break 'session EpochExit::Lost(SessionError::Transport(
                        crate::transport::TransportError::Closed("transport closed".to_string()),
                    )),
                }
            }

            _ = &mut probe_sleep => {
                let t1 = local_clock.now();
                let probe = ClientMessage::ClientTime(ClientTime { client_transmitted: t1.get() });
                if transport.send_text(probe.to_json()).await.is_err() {
                    break 'session EpochExit::Lost(SessionError::Transport(
                        crate::transport::TransportError::Closed("probe send failed".to_string()),
                    ));
                }
                let delay = if probe_remaining > 0 {
                    probe_remaining -= 1;
                    config.probe_burst_spacing
                } else {
                    config.probe_steady_cadence
                };
                probe_sleep.as_mut().reset(tokio::time::Instant::now() + delay);
            }

            _ = telemetry.tick() => {
                let snapshot = {
                    let mut p = player.lock().unwrap();
                    let was_dirty = p.dirty;
                    p.dirty = false;
                    was_dirty.then_some(*p)
                };
                if let Some(snapshot) = snapshot {
                    if send_player_update(&mut *transport, &snapshot).await.is_err() {
                        break 'session EpochExit::Lost(SessionError::Transport(
                            crate::transport::TransportError::Closed("telemetry send failed".to_string()),
                        ));
                    }
                }
            }

            ctrl = control_rx.recv() => {
                match ctrl {
                    Some(ControlMsg::SetVolume(v)) => {
                        let mut p = player.lock().unwrap();
                        p.volume = (v * 100.0).round() as u8;
                        p.dirty = true;
                    }
                    Some(ControlMsg::SetMute(m)) => {
                        let mut p = player.lock().unwrap();
                        p.muted = m;
                        p.dirty = true;
                    }
                    None => {}
                }
            }
        }
    };

    if let Some(runtime) = stream.take() {
        runtime.shutdown().await;
    }

    exit
}

async fn send_player_update(
    transport: &mut dyn Transport,
    player: &PlayerReportState,
) -> Result<(), crate::transport::TransportError> {
    let msg = ClientMessage::PlayerUpdate(PlayerUpdate {
        state: player.sync_state.into(),
        volume: player.volume,
        muted: player.muted,
    });
    transport.send_text(msg.to_json()).await
}

/// `Err` carries the reason the epoch must end; `Ok` means keep going.
#[allow(clippy::too_many_arguments)]
async fn handle_server_message(
    msg: ServerMessage,
    transport: &mut dyn Transport,
    clock: &mut ClockSync,
    local_clock: &LocalClock,
    state: &Arc<Mutex<SessionState>>,
    stats: &Arc<Mutex<SessionStats>>,
    player: &Arc<Mutex<PlayerReportState>>,
    events_tx: &mpsc::UnboundedSender<Event>,
    stream: &mut Option<StreamRuntime>,
    auto_started: &mut bool,
    sink: Arc<dyn AudioSink>,
    config: &SessionConfig,
) -> Result<(), EpochExit> {
    match msg {
        ServerMessage::ServerHello(_) => {}
        ServerMessage::ServerTime(t) => {
            let t4 = local_clock.now();
            clock.process_sample(
                LocalMicros::new(t.client_transmitted),
                ServerMicros::new(t.server_received),
                ServerMicros::new(t.server_transmitted),
                t4,
            );
        }
        ServerMessage::StreamStart(start) => {
            if let Some(player_start) = start.player {
                match player_start.audio_format() {
                    Some(fmt) => {
                        let codec_header = player_start.codec_header_bytes().ok().flatten();
                        begin_stream(
                            fmt, codec_header, transport, local_clock, state, player, events_tx,
                            stream, auto_started, sink, config,
                        )
                        .await?;
                    }
                    None => {
                        tracing::warn!(bit_depth = player_start.bit_depth, "stream/start has invalid bit_depth");
                    }
                }
            }
        }
        ServerMessage::StreamEnd(_) => {
            if let Some(runtime) = stream.take() {
                runtime.shutdown().await;
            }
            set_state(state, SessionState::Ready);
            let _ = events_tx.send(Event::StreamEnded);
        }
        ServerMessage::GroupUpdate(update) => {
            let _ = events_tx.send(Event::GroupUpdated(update));
        }
        ServerMessage::SessionUpdate(update) => {
            tracing::debug!(?update, "session/update received");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn begin_stream(
    fmt: AudioFormat,
    codec_header: Option<Vec<u8>>,
    transport: &mut dyn Transport,
    local_clock: &LocalClock,
    state: &Arc<Mutex<SessionState>>,
    player: &Arc<Mutex<PlayerReportState>>,
    events_tx: &mpsc::UnboundedSender<Event>,
    stream: &mut Option<StreamRuntime>,
    auto_started: &mut bool,
    sink: Arc<dyn AudioSink>,
    config: &SessionConfig,
) -> Result<(), EpochExit> {
    if !resonate_decode::available_codecs().contains(&fmt.codec) {
        set_state(state, SessionState::Error(format!("unsupported codec {:?}", fmt.codec)));
        let snapshot = {
            let mut p = player.lock().unwrap();
            p.sync_state = SyncState::Error;
            p.dirty = true;
            *p
        };
        let _ = send_player_update(transport, &snapshot).await;
        let _ = events_tx.send(Event::Error(format!("unsupported codec {:?}", fmt.codec)));
        return Ok(());
    }

    if let Some(old) = stream.take() {
        old.shutdown().await;
    }

    let decoder = match Decoder::new(fmt, codec_header.as_deref()) {
        Ok(d) => d,
        Err(e) => {
            set_state(state, SessionState::Error(e.to_string()));
            let mut p = player.lock().unwrap();
            p.sync_state = SyncState::Error;
            p.dirty = true;
            let _ = send_player_update(transport, &p).await;
            let _ = events_tx.send(Event::Error(e.to_string()));
            return Ok(());
        }
    };

    // Must share LocalClock's origin, not a fresh one: `play_at_local` on
    // scheduled chunks is computed via `clock.server_to_local`, which is
    // itself anchored on every `t1`/`t4` sample ever fed through
    // `local_clock.now()`. A separate origin here would offset every
    // scheduling decision by the gap between process start and this call.
    let origin = local_clock.origin;
    let now_fn: resonate_scheduler::NowFn =
        Arc::new(move || LocalMicros::new(origin.elapsed().as_micros() as i64));
    let scheduler = Arc::new(Scheduler::new(now_fn, config.scheduler));
    scheduler.start();
    let Some(emitted) = scheduler.emitted() else {
        return Ok(());
    };

    let sink_cancel = CancellationToken::new();
    let sink_task = tokio::spawn(resonate_sink::drive_sink(sink, emitted, sink_cancel.clone()));

    *stream = Some(StreamRuntime {
        decoder,
        scheduler,
        sink_cancel,
        sink_task,
    });
    *auto_started = false;

    set_state(state, SessionState::Streaming(fmt));
    {
        let mut p = player.lock().unwrap();
        p.sync_state = SyncState::Synchronized;
        p.dirty = true;
        let _ = send_player_update(transport, &p).await;
    }
    let _ = events_tx.send(Event::StreamStarted(fmt));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_binary_frame(
    bytes: Vec<u8>,
    transport: &mut dyn Transport,
    clock: &mut ClockSync,
    local_clock: &LocalClock,
    state: &Arc<Mutex<SessionState>>,
    stats: &Arc<Mutex<SessionStats>>,
    player: &Arc<Mutex<PlayerReportState>>,
    events_tx: &mpsc::UnboundedSender<Event>,
    stream: &mut Option<StreamRuntime>,
    auto_started: &mut bool,
    sink: Arc<dyn AudioSink>,
    config: &SessionConfig,
    rate_limit: &mut RateLimitedLog,
) {
    let Some(frame) = BinaryFrame::decode(&bytes) else {
        stats.lock().unwrap().transient_protocol += 1;
        return;
    };

    match frame.kind {
        FrameKind::Artwork(ch) => {
            let _ = events_tx.send(Event::ArtworkReceived(ch, frame.payload));
            return;
        }
        FrameKind::Visualizer => {
            let _ = events_tx.send(Event::VisualizerData(frame.payload));
            return;
        }
        FrameKind::AudioChunk => {}
    }

    if stream.is_none() && !*auto_started {
        *auto_started = true;
        stats.lock().unwrap().auto_starts += 1;
        tracing::warn!("stream/start never arrived; auto-starting with default PCM format");
        let _ = begin_stream(
            AudioFormat::default_auto_start(),
            None,
            transport,
            local_clock,
            state,
            player,
            events_tx,
            stream,
            auto_started,
            sink,
            config,
        )
        .await;
    }

    let Some(runtime) = stream.as_mut() else {
        return;
    };

    match runtime.decoder.decode(&frame.payload) {
        Ok(pcm) => match runtime.scheduler.schedule(pcm, frame.server_ts, clock) {
            ScheduleOutcome::Scheduled => {}
            ScheduleOutcome::ScheduledWithOverflow => {
                stats.lock().unwrap().schedule_drops += 1;
            }
            ScheduleOutcome::BackPressure => {
                stats.lock().unwrap().back_pressure += 1;
            }
        },
        Err(e) => {
            stats.lock().unwrap().decode_errors += 1;
            if rate_limit.should_log(&e.to_string()) {
                tracing::warn!(error = %e, "dropping undecodable chunk");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_log_suppresses_within_one_second() {
        let mut log = RateLimitedLog::default();
        assert!(log.should_log("boom"));
        assert!(!log.should_log("boom"));
        assert!(log.should_log("other"));
    }

    #[test]
    fn player_report_defaults_to_full_volume_unmuted_synchronized() {
        let p = PlayerReportState::default();
        assert_eq!(p.volume, 100);
        assert!(!p.muted);
        assert_eq!(p.sync_state, SyncState::Synchronized);
    }
}
