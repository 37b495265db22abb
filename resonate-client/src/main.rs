//! Reference CLI client for Resonate. Discovers a server via mDNS when no
//! URL is given, opens a WebSocket transport, and wires Clock Sync +
//! Decode + Scheduler + Sink behind a [`resonate_session::SessionController`].

mod discovery;
mod ws_transport;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use resonate_session::transport::TransportConnector;
use resonate_session::{ClientIdentity, Event, SessionConfig, SessionController};
use resonate_sink::{AudioSink, CpalAudioSink, NullAudioSink};

use ws_transport::WsConnector;

/// Reference client for the Resonate synchronized multi-room audio protocol.
#[derive(Parser, Debug)]
#[command(name = "resonate-client", version)]
struct Cli {
    /// Skip the terminal UI; log plain events to stderr instead (no TUI is
    /// implemented in this core — the flag is accepted for CLI-surface
    /// parity with the documented CLI surface and always behaves this way).
    #[arg(long)]
    no_tui: bool,

    /// Server WebSocket URL, e.g. ws://host:port/resonate. When omitted,
    /// the client discovers one via mDNS (`_resonate._tcp`).
    url: Option<String>,

    /// Name this client presents in `client/hello`.
    client_name: Option<String>,

    /// Discovery timeout when `url` is omitted.
    #[arg(long, default_value = "3")]
    discovery_timeout_secs: u64,
}

fn device_name() -> String {
    std::env::var("RESONATE_CLIENT_NAME")
        .ok()
        .or_else(|| hostname_fallback())
        .unwrap_or_else(|| "resonate-client".to_string())
}

fn hostname_fallback() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let url = match cli.url.clone() {
        Some(url) => url,
        None => {
            let timeout = Duration::from_secs(cli.discovery_timeout_secs);
            tracing::info!(?timeout, "no URL given, discovering Resonate servers via mDNS");
            match discovery::discover_one(timeout).await {
                Some(url) => {
                    tracing::info!(%url, "discovered server");
                    url
                }
                None => {
                    tracing::error!("no Resonate servers found");
                    return std::process::ExitCode::from(1);
                }
            }
        }
    };

    let name = cli.client_name.unwrap_or_else(device_name);
    let client_id = uuid::Uuid::new_v4().to_string();

    let sink: Arc<dyn AudioSink> = match CpalAudioSink::open_default() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output device, running headless");
            Arc::new(NullAudioSink::new())
        }
    };

    let identity = ClientIdentity {
        client_id,
        name,
        device_info: Some(resonate_proto::message::DeviceInfo {
            platform: std::env::consts::OS.to_string(),
            model: None,
        }),
    };

    let connector: Arc<dyn TransportConnector> = Arc::new(WsConnector::new(url));
    let (handle, mut events) =
        SessionController::spawn(connector, identity, SessionConfig::default(), sink);

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Ctrl+C received, disconnecting");
                handle.disconnect();
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => log_event(&event, cli.no_tui),
                    None => break,
                }
            }
        }
    }

    // Drain remaining events so the final StreamEnded/Error from teardown
    // is still observed before the process exits.
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), events.recv()).await
    {
        log_event(&event, cli.no_tui);
    }

    std::process::ExitCode::from(0)
}

fn log_event(event: &Event, _no_tui: bool) {
    match event {
        Event::ServerConnected => tracing::info!("connected to server"),
        Event::StreamStarted(fmt) => tracing::info!(?fmt, "stream started"),
        Event::StreamEnded => tracing::info!("stream ended"),
        Event::GroupUpdated(update) => tracing::info!(?update, "group updated"),
        Event::ArtworkReceived(channel, bytes) => {
            tracing::debug!(channel, len = bytes.len(), "artwork received")
        }
        Event::VisualizerData(bytes) => tracing::debug!(len = bytes.len(), "visualizer data"),
        Event::Error(msg) => tracing::error!(%msg, "session error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_url_and_name_positionals() {
        let cli = Cli::parse_from(["resonate-client", "ws://host:1234/resonate", "Kitchen"]);
        assert_eq!(cli.url.as_deref(), Some("ws://host:1234/resonate"));
        assert_eq!(cli.client_name.as_deref(), Some("Kitchen"));
        assert!(!cli.no_tui);
    }

    #[test]
    fn cli_allows_discovery_mode_with_no_positionals() {
        let cli = Cli::parse_from(["resonate-client", "--no-tui"]);
        assert!(cli.url.is_none());
        assert!(cli.client_name.is_none());
        assert!(cli.no_tui);
        assert_eq!(cli.discovery_timeout_secs, 3);
    }
}
