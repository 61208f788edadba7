//! The health monitor: combines ping/heartbeat timing from the WebSocket
//! engine with a brokerage-session REST probe. The failure-mode handling
//! (auth failure, timeout, and any other exception all collapse to
//! "unhealthy") is grounded on `arkin-binance/src/http/error.rs`'s error
//! taxonomy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::ws::WsEngine;

/// Probes whether the brokerage session is still authenticated
/// (`iserver.authStatus.authenticated`).
#[async_trait]
pub trait SessionProbe: Send + Sync {
    async fn check_session(&self) -> GatewayResult<bool>;
}

pub struct HealthMonitor {
    ws: Arc<WsEngine>,
    session_probe: Arc<dyn SessionProbe>,
    max_ping_interval: Duration,
    max_heartbeat_age: Duration,
}

impl HealthMonitor {
    pub fn new(
        ws: Arc<WsEngine>,
        session_probe: Arc<dyn SessionProbe>,
        max_ping_interval: Duration,
        max_heartbeat_age: Duration,
    ) -> Self {
        Self {
            ws,
            session_probe,
            max_ping_interval,
            max_heartbeat_age,
        }
    }

    /// Returns `true` only if the ping response, the heartbeat, and the
    /// brokerage session are all healthy; otherwise triggers a WebSocket
    /// hard reset and returns `false`.
    ///
    /// A timestamp that has never been recorded is treated as healthy —
    /// the engine has not had a chance to observe one yet, which is not
    /// itself evidence of a problem.
    pub async fn check_health(&self) -> bool {
        let ping_ok = self
            .ws
            .health()
            .ping_response_age()
            .map(|age| age <= self.max_ping_interval)
            .unwrap_or(true);
        let heartbeat_ok = self
            .ws
            .health()
            .heartbeat_age()
            .map(|age| age <= self.max_heartbeat_age)
            .unwrap_or(true);
        let session_ok = self.probe_session_healthy().await;

        let healthy = ping_ok && heartbeat_ok && session_ok;
        if !healthy {
            warn!(
                target: "health",
                ping_ok, heartbeat_ok, session_ok, "websocket health degraded, requesting hard reset"
            );
            self.ws.hard_reset(true).await;
        }
        healthy
    }

    async fn probe_session_healthy(&self) -> bool {
        match self.session_probe.check_session().await {
            Ok(authenticated) => authenticated,
            Err(GatewayError::Auth(msg)) => {
                warn!(target: "health", "session probe auth failure: {msg}");
                false
            }
            Err(GatewayError::TransientIo { method, url, .. }) => {
                warn!(target: "health", "session probe timed out for {method} {url}");
                false
            }
            Err(e) => {
                warn!(target: "health", "session probe failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::WsEngineConfig;
    use url::Url;

    struct AlwaysHealthy;
    #[async_trait]
    impl SessionProbe for AlwaysHealthy {
        async fn check_session(&self) -> GatewayResult<bool> {
            Ok(true)
        }
    }

    struct AuthFailure;
    #[async_trait]
    impl SessionProbe for AuthFailure {
        async fn check_session(&self) -> GatewayResult<bool> {
            Err(GatewayError::Auth("session expired".into()))
        }
    }

    fn engine() -> Arc<WsEngine> {
        let config = WsEngineConfig {
            url: Url::parse("wss://example.com/ws").unwrap(),
            ..Default::default()
        };
        let (engine, _subs, _queues) = WsEngine::new(config, 3, Duration::from_secs(5));
        engine
    }

    #[test_log::test]
    #[tokio::test]
    async fn healthy_when_no_timestamps_recorded_yet_and_session_ok() {
        let monitor = HealthMonitor::new(
            engine(),
            Arc::new(AlwaysHealthy),
            Duration::from_secs(90),
            Duration::from_secs(90),
        );
        assert!(monitor.check_health().await);
    }

    #[tokio::test]
    async fn auth_failure_makes_health_check_return_false() {
        let monitor = HealthMonitor::new(
            engine(),
            Arc::new(AuthFailure),
            Duration::from_secs(90),
            Duration::from_secs(90),
        );
        assert!(!monitor.check_health().await);
    }

    #[test_log::test]
    #[tokio::test]
    async fn stale_heartbeat_fails_health_check_even_with_healthy_session() {
        let eng = engine();
        eng.health().record_heartbeat();
        let monitor = HealthMonitor::new(eng, Arc::new(AlwaysHealthy), Duration::from_secs(90), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!monitor.check_health().await);
    }
}
