//! The self-healing WebSocket engine. Grounded on
//! `arkin-ws/src/ws.rs`'s `WSManager`/`Handler` split (connect, `select!`
//! loop over inbound frames + ping ticker + shutdown) and on
//! `arkin-core/src/service.rs`'s `ServiceCtx` lifecycle (`TaskTracker` +
//! `CancellationToken`, idempotent start/stop), generalized to a bounded,
//! automatic reconnect with subscription replay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use url::Url;

use crate::topics::Topic;
use crate::ws::dispatch::{Dispatcher, UnwrapFn};
use crate::ws::ping::PingTask;
use crate::ws::queue::QueueHub;
use crate::ws::state::{ConnectionState, SharedState};
use crate::ws::subscription::{SubscriptionController, SubscriptionRegistry};

#[derive(Debug)]
pub enum ControlMessage {
    SendPing,
    HardReset { restart: bool },
}

enum ConnectionOutcome {
    ClosedByPeer,
    Fatal,
    HardReset { restart: bool },
    ShuttingDown,
}

pub struct WsEngineConfig {
    pub url: Url,
    pub ping_interval: Duration,
    pub max_ping_interval: Duration,
    pub max_connection_attempts: u64,
    pub restart_on_close: bool,
    pub restart_on_critical: bool,
    pub unsolicited_channels_to_be_queued: HashSet<Topic>,
    pub unwrap: Option<UnwrapFn>,
}

impl Default for WsEngineConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("wss://localhost/ws").expect("static url"),
            ping_interval: Duration::from_secs(45),
            max_ping_interval: Duration::from_secs(90),
            max_connection_attempts: 10,
            restart_on_close: true,
            restart_on_critical: true,
            unsolicited_channels_to_be_queued: HashSet::new(),
            unwrap: None,
        }
    }
}

pub struct WsEngine {
    config: WsEngineConfig,
    state: Arc<SharedState>,
    dispatcher: Arc<Dispatcher>,
    queue_hub: Arc<QueueHub>,
    subscriptions: Arc<SubscriptionController>,
    control_tx: kanal::AsyncSender<ControlMessage>,
    control_rx: kanal::AsyncReceiver<ControlMessage>,
    outbound_rx: kanal::AsyncReceiver<String>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    attempts: AtomicU64,
}

impl WsEngine {
    pub fn new(
        config: WsEngineConfig,
        subscription_retries: u64,
        subscription_timeout: Duration,
    ) -> (Arc<Self>, Arc<SubscriptionController>, Arc<QueueHub>) {
        let queue_hub = Arc::new(QueueHub::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let state = Arc::new(SharedState::new());
        let (outbound_tx, outbound_rx) = kanal::unbounded_async::<String>();
        let (control_tx, control_rx) = kanal::unbounded_async::<ControlMessage>();

        let dispatcher = Arc::new(Dispatcher::new(
            queue_hub.clone(),
            registry.clone(),
            state.clone(),
            config.unsolicited_channels_to_be_queued.clone(),
            config.unwrap.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionController::new(
            registry,
            outbound_tx,
            subscription_retries,
            subscription_timeout,
        ));

        let engine = Arc::new(Self {
            config,
            state,
            dispatcher,
            queue_hub: queue_hub.clone(),
            subscriptions: subscriptions.clone(),
            control_tx,
            control_rx,
            outbound_rx,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            attempts: AtomicU64::new(0),
        });
        (engine, subscriptions, queue_hub)
    }

    pub fn queue_hub(&self) -> &Arc<QueueHub> {
        &self.queue_hub
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionController> {
        &self.subscriptions
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn health(&self) -> &crate::ws::state::ConnectionHealth {
        &self.state.health
    }

    /// Starts the connection-management worker and the ping task, each on
    /// the shared `TaskTracker`. Idempotent: calling twice on an already
    /// running engine is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.state() != ConnectionState::Idle {
            return;
        }
        let engine = self.clone();
        self.tracker.reopen();
        self.tracker.spawn(async move { engine.run().await });

        let ping = PingTask::new(
            self.state.clone(),
            self.control_tx.clone(),
            self.config.ping_interval,
            self.config.max_ping_interval,
            self.shutdown.clone(),
        );
        self.tracker.spawn(ping.run());
    }

    /// Idempotent shutdown: cancels the shared token and waits for both
    /// tasks to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.state.set(ConnectionState::Closed);
    }

    /// Forcibly closes the current socket and, if `restart`, re-enters the
    /// connecting state. Must only be reached
    /// via the control channel, never called directly from the worker.
    pub async fn hard_reset(&self, restart: bool) {
        let _ = self.control_tx.send(ControlMessage::HardReset { restart }).await;
    }

    async fn run(self: Arc<Self>) {
        self.state.set(ConnectionState::Connecting);
        loop {
            if self.shutdown.is_cancelled() {
                self.state.set(ConnectionState::Closed);
                return;
            }

            match connect_async(self.config.url.as_str()).await {
                Ok((stream, _response)) => {
                    self.attempts.store(0, Ordering::SeqCst);
                    self.state.set(ConnectionState::Connected);
                    // Seed a baseline so the ping task measures staleness from
                    // connect time instead of treating "no pong yet" as healthy
                    // forever when the socket never answers a single ping.
                    self.state.health.record_ping_response();
                    if let Err(e) = self.subscriptions.replay().await {
                        warn!(target: "ws", "subscription replay after connect failed: {e}");
                    }

                    let outcome = self.run_connection(stream).await;
                    match outcome {
                        ConnectionOutcome::ShuttingDown => {
                            self.state.set(ConnectionState::Closed);
                            return;
                        }
                        ConnectionOutcome::HardReset { restart: false } => {
                            self.state.set(ConnectionState::Closed);
                            return;
                        }
                        ConnectionOutcome::ClosedByPeer if !self.config.restart_on_close => {
                            self.state.set(ConnectionState::Closed);
                            return;
                        }
                        ConnectionOutcome::Fatal if !self.config.restart_on_critical => {
                            self.state.set(ConnectionState::Closed);
                            return;
                        }
                        _ => {
                            if !self.bump_attempts_and_check_bound() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "ws", "connect failed: {e}");
                    if !self.bump_attempts_and_check_bound() {
                        return;
                    }
                }
            }
        }
    }

    fn bump_attempts_and_check_bound(&self) -> bool {
        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts >= self.config.max_connection_attempts {
            error!(target: "ws", "reached max connection attempts ({}), giving up", self.config.max_connection_attempts);
            self.state.set(ConnectionState::Closed);
            return false;
        }
        self.state.set(ConnectionState::Connecting);
        true
    }

    async fn run_connection(
        &self,
        stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    ) -> ConnectionOutcome {
        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.dispatcher.handle_frame(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                return ConnectionOutcome::Fatal;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => self.state.health.record_ping_response(),
                        Some(Ok(Message::Close(_))) => return ConnectionOutcome::ClosedByPeer,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(target: "ws", "socket read error: {e}");
                            return ConnectionOutcome::Fatal;
                        }
                        None => return ConnectionOutcome::ClosedByPeer,
                    }
                }
                Ok(outgoing) = self.outbound_rx.recv() => {
                    if write.send(Message::Text(outgoing.into())).await.is_err() {
                        return ConnectionOutcome::Fatal;
                    }
                }
                Ok(ctrl) = self.control_rx.recv() => {
                    match ctrl {
                        ControlMessage::SendPing => {
                            if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                                return ConnectionOutcome::Fatal;
                            }
                        }
                        ControlMessage::HardReset { restart } => {
                            let _ = write.close().await;
                            return ConnectionOutcome::HardReset { restart };
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    let _ = write.close().await;
                    return ConnectionOutcome::ShuttingDown;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    #[tokio::test]
    async fn new_engine_starts_idle() {
        let config = WsEngineConfig {
            url: Url::parse("wss://example.com/ws").unwrap(),
            ..Default::default()
        };
        let (engine, _subs, _queues) = WsEngine::new(config, 3, Duration::from_secs(5));
        assert_eq!(engine.state(), ConnectionState::Idle);
    }

    /// A socket that never answers a single ping must still be detected as
    /// stale eventually: connecting seeds a baseline pong timestamp so
    /// staleness is measured from connect time, not left as `None` forever.
    #[test_log::test]
    #[tokio::test]
    async fn connecting_seeds_a_baseline_ping_response_timestamp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                std::future::pending::<()>().await;
            }
        });

        let config = WsEngineConfig {
            url: Url::parse(&format!("ws://{addr}/ws")).unwrap(),
            ..Default::default()
        };
        let (engine, _subs, _queues) = WsEngine::new(config, 3, Duration::from_secs(5));
        engine.start();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while engine.health().ping_response_age().is_none() {
            if tokio::time::Instant::now() >= deadline {
                panic!("ping response baseline was never seeded after connect");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        engine.shutdown().await;
    }
}
