//! Connection state machine and health bookkeeping shared between the
//! engine's worker, the dispatcher, and the ping task.

use std::time::Duration;

use parking_lot::Mutex;
use strum::Display;
use tokio::time::Instant;

/// `strum::Display` + `snake_case`, matching `arkin-core/src/service.rs`'s
/// `ServiceState` convention for lifecycle enums logged by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Ready,
    Disconnecting,
    Closed,
}

/// Tracks the two timestamps the health monitor inspects: the last inbound
/// session/heartbeat frame, and the last observed response to an
/// application-level ping.
#[derive(Default)]
pub struct ConnectionHealth {
    last_heartbeat: Mutex<Option<Instant>>,
    last_ping_response: Mutex<Option<Instant>>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_heartbeat(&self) {
        *self.last_heartbeat.lock() = Some(Instant::now());
    }

    pub fn record_ping_response(&self) {
        *self.last_ping_response.lock() = Some(Instant::now());
    }

    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.last_heartbeat.lock().map(|t| t.elapsed())
    }

    pub fn ping_response_age(&self) -> Option<Duration> {
        self.last_ping_response.lock().map(|t| t.elapsed())
    }
}

/// Shared mutable connection state: current state plus health timestamps.
/// Held behind one `Arc` by the engine, the dispatcher, and the ping task.
pub struct SharedState {
    state: Mutex<ConnectionState>,
    pub health: ConnectionHealth,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            health: ConnectionHealth::new(),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set(&self, state: ConnectionState) {
        tracing::debug!(target: "ws", state = %state, "connection state transition");
        *self.state.lock() = state;
    }

    /// Transitions `Connected -> Ready` on the first session/heartbeat
    /// frame; a no-op in any other state.
    pub fn mark_ready(&self) {
        let mut guard = self.state.lock();
        if *guard == ConnectionState::Connected {
            *guard = ConnectionState::Ready;
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
