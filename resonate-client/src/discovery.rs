//! Server discovery via mDNS ("Discovery", an external collaborator).
//! Out of scope for the core itself — this module only
//! resolves a `_resonate._tcp` service into a `ws://host:port/resonate`
//! URL and hands it to `SessionController::spawn`'s connector.

use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};

const SERVICE_TYPE: &str = "_resonate._tcp.local.";

/// Resolves the first responding `_resonate._tcp` service into a
/// `ws://host:port/resonate` URL, or `None` on timeout / daemon failure.
pub async fn discover_one(timeout: Duration) -> Option<String> {
    let daemon = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "failed to start mDNS daemon");
            return None;
        }
    };

    let receiver = match daemon.browse(SERVICE_TYPE) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to browse for {}", SERVICE_TYPE);
            return None;
        }
    };

    let result = tokio::time::timeout(timeout, async {
        while let Ok(event) = receiver.recv_async().await {
            if let ServiceEvent::ServiceResolved(info) = event {
                if let Some(addr) = info.get_addresses().iter().next() {
                    let port = info.get_port();
                    return Some(format!("ws://{addr}:{port}/resonate"));
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    let _ = daemon.shutdown();
    result
}
