//! Background tasks that keep the bridge connection alive

use super::backoff::ReconnectBackoff;
use super::gateway::{CloseReason, TransportGateway};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How long a due ping waits for a connection before it is skipped
const PING_CONNECT_WAIT: Duration = Duration::from_secs(15);

/// Connect, serve, and reconnect with backoff until stopped or cancelled.
pub async fn run_reconnect_loop(
    gateway: Arc<TransportGateway>,
    mut backoff: ReconnectBackoff,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() || gateway.is_stopped() {
            break;
        }

        match gateway.connect_and_serve().await {
            Ok(CloseReason::ManualStop) => break,
            Ok(CloseReason::ConnectionReplaced) => {
                tracing::warn!("Bridge connection taken over by another agent")
            }
            Ok(CloseReason::ServerShuttingDown) => tracing::info!("Bridge is restarting"),
            Ok(reason) => tracing::warn!(?reason, "Bridge connection lost"),
            Err(e) => tracing::warn!("Failed to connect to bridge: {}", e),
        }

        if gateway.is_stopped() {
            break;
        }

        let delay = backoff.next_delay(Instant::now());
        tracing::info!(delay_secs = delay.as_secs(), "Reconnecting to bridge");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::info!("Bridge reconnect loop stopped");
}

/// Send a heartbeat every `interval` while connected.
pub async fn run_pinger(
    gateway: Arc<TransportGateway>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if !gateway.wait_connected(PING_CONNECT_WAIT).await {
            tracing::debug!("No bridge connection; skipping ping");
            continue;
        }
        if let Err(e) = gateway.ping().await {
            tracing::warn!("Failed to ping bridge: {}", e);
        }
    }
}
