//! Session Controller: drives the protocol handshake, demultiplexes text
//! and binary messages, and integrates Clock Sync, the Decode Pipeline,
//! the Scheduler, and the Audio Sink into one connected session.

mod controller;
mod errors;
mod handle;
mod state;
pub mod transport;

pub use controller::SessionController;
pub use errors::SessionError;
pub use handle::SessionHandle;
pub use state::SessionState;
pub use transport::{Transport, TransportConnector, TransportError, TransportMessage};

use std::time::Duration;

use resonate_proto::message::{DeviceInfo, GroupUpdate};
use resonate_proto::{AudioFormat, Codec};

/// Identity this client presents in `client/hello`.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub name: String,
    pub device_info: Option<DeviceInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub probe_burst_count: usize,
    pub probe_burst_spacing: Duration,
    pub probe_steady_cadence: Duration,
    pub telemetry_interval: Duration,
    pub reconnect_backoff: Duration,
    pub scheduler: resonate_scheduler::SchedulerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            probe_burst_count: 5,
            probe_burst_spacing: Duration::from_millis(100),
            probe_steady_cadence: Duration::from_secs(5),
            telemetry_interval: Duration::from_secs(1),
            reconnect_backoff: Duration::from_secs(2),
            scheduler: resonate_scheduler::SchedulerConfig::default(),
        }
    }
}

/// Internal synchronization state reported to the server, distinct from
/// the wire spelling in [`resonate_proto::message::SyncStateWire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synchronized,
    Error,
}

impl From<SyncState> for resonate_proto::message::SyncStateWire {
    fn from(value: SyncState) -> Self {
        match value {
            SyncState::Synchronized => resonate_proto::message::SyncStateWire::Synchronized,
            SyncState::Error => resonate_proto::message::SyncStateWire::Error,
        }
    }
}

/// One-shot-observer sequence exposed to consumers.
#[derive(Debug, Clone)]
pub enum Event {
    ServerConnected,
    StreamStarted(AudioFormat),
    StreamEnded,
    GroupUpdated(GroupUpdate),
    ArtworkReceived(u8, Vec<u8>),
    VisualizerData(Vec<u8>),
    Error(String),
}

/// Error-taxonomy counters. Audio-pipeline errors never
/// propagate past the session; they accumulate here instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub transient_protocol: u64,
    pub decode_errors: u64,
    pub schedule_drops: u64,
    pub back_pressure: u64,
    pub auto_starts: u64,
}

/// Codecs this client can decode, used to populate
/// `client/hello.player_support.supported_codecs` so an unavailable codec
/// is never advertised.
pub fn supported_codecs() -> Vec<Codec> {
    resonate_decode::available_codecs()
}
