//! Ping/heartbeat health checks. A dedicated
//! periodic task, distinct from the engine's own read/write worker so a
//! stalled socket can never block the health check itself — grounded on
//! the `ping_ticker`/`interval` pattern in `arkin-ws/src/ws.rs`'s
//! `Handler::run`, pulled out into its own task and wired to `hard_reset`
//! through a control channel instead of calling the socket directly.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::ws::engine::ControlMessage;
use crate::ws::state::SharedState;

pub struct PingTask {
    state: Arc<SharedState>,
    control: kanal::AsyncSender<ControlMessage>,
    ping_interval: Duration,
    max_ping_interval: Duration,
    shutdown: CancellationToken,
}

impl PingTask {
    pub fn new(
        state: Arc<SharedState>,
        control: kanal::AsyncSender<ControlMessage>,
        ping_interval: Duration,
        max_ping_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            control,
            ping_interval,
            max_ping_interval,
            shutdown,
        }
    }

    /// Runs until `shutdown` is cancelled. Sends a ping request every
    /// `ping_interval`; if no ping response has been observed within
    /// `max_ping_interval`, requests `hard_reset(restart=true)`.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.ping_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.control.send(ControlMessage::SendPing).await {
                        warn!(target: "ws", "ping task could not reach the worker: {e}");
                        return;
                    }
                    // The engine seeds a baseline pong timestamp at connect
                    // time, so `None` here only happens before any connection
                    // has ever been established and is not itself staleness.
                    let stale = self
                        .state
                        .health
                        .ping_response_age()
                        .map(|age| age > self.max_ping_interval)
                        .unwrap_or(false);
                    if stale {
                        warn!(target: "ws", "no ping response within {:?}, requesting hard reset", self.max_ping_interval);
                        if self.control.send(ControlMessage::HardReset { restart: true }).await.is_err() {
                            return;
                        }
                    }
                }
                _ = self.shutdown.cancelled() => return,
            }
        }
    }
}
