//! Connection heartbeat: periodic `ping`, silent close on a missed pong
//! deadline or overall inactivity.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dm_domain::config::StreamingConfig;
use dm_protocol::ServerEvent;

use super::registry::ConnectionHealth;

/// Runs until the connection token is cancelled or a deadline trips.
/// Tripping a deadline cancels the token itself, which unwinds the read
/// loop; no farewell event is sent.
pub(crate) async fn run_heartbeat(
    outbound: mpsc::Sender<ServerEvent>,
    health: Arc<ConnectionHealth>,
    cancel: CancellationToken,
    streaming: StreamingConfig,
    connection_id: String,
) {
    let mut interval = tokio::time::interval(streaming.ping_interval());
    // The first tick fires immediately; the connection just authorized,
    // so skip it.
    interval.tick().await;

    let pong_deadline = chrono::Duration::from_std(streaming.pong_deadline())
        .unwrap_or_else(|_| chrono::Duration::seconds(40));
    let inactivity = chrono::Duration::from_std(streaming.inactivity_timeout())
        .unwrap_or_else(|_| chrono::Duration::seconds(300));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        if health.pong_age() > pong_deadline {
            tracing::warn!(connection_id = %connection_id, "pong deadline missed; closing connection");
            cancel.cancel();
            return;
        }
        if health.inbound_age() > inactivity {
            tracing::warn!(connection_id = %connection_id, "connection inactive; closing");
            cancel.cancel();
            return;
        }

        if outbound.send(ServerEvent::Ping {}).await.is_err() {
            // Writer gone — the connection is already tearing down.
            return;
        }
    }
}
