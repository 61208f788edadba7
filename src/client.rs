//! Top-level orchestrator wiring the REST engine, the OAuth signer, the
//! WebSocket engine, the tickler and the health monitor together. Grounded
//! on `arkin-binance`'s top-level execution client, which assembles an HTTP
//! client plus a signer plus a WS client behind one public surface instead
//! of leaving callers to wire the pieces by hand.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthMonitor, SessionProbe};
use crate::oauth::OAuthSigner;
use crate::rest::{GatewayResponse, RestEngine, Signer};
use crate::tickler::{Tickle, Tickler};
use crate::topics::Topic;
use crate::ws::{QueueHub, SubscriptionController, WsEngine, WsEngineConfig};

/// The keep-alive/tickle endpoint. Also doubles as the auth-status probe
/// the health monitor consults.
const TICKLE_ENDPOINT: &str = "tickle";

/// Adapts `RestEngine` to the tickler's narrow `Tickle` trait, keeping the
/// tickler from needing to know about the full REST surface.
struct RestTickle {
    rest: Arc<RestEngine>,
}

#[async_trait]
impl Tickle for RestTickle {
    async fn tickle(&self) -> GatewayResult<()> {
        self.rest.get(TICKLE_ENDPOINT, None).await.map(|_| ())
    }
}

/// Adapts `RestEngine` to the health monitor's `SessionProbe`:
/// `iserver.authStatus.authenticated`.
struct RestSessionProbe {
    rest: Arc<RestEngine>,
}

#[async_trait]
impl SessionProbe for RestSessionProbe {
    async fn check_session(&self) -> GatewayResult<bool> {
        let response = self.rest.get(TICKLE_ENDPOINT, None).await?;
        Ok(authenticated(&response.data))
    }
}

/// Reads `iserver.authStatus` and requires `authenticated && !competing &&
/// connected`, defaulting every missing
/// field to unhealthy rather than treating an unparsable probe response as
/// healthy.
fn authenticated(body: &Value) -> bool {
    let Some(status) = body.get("iserver").and_then(|v| v.get("authStatus")) else {
        return false;
    };
    let flag = |name: &str| status.get(name).and_then(Value::as_bool).unwrap_or(false);
    flag("authenticated") && !flag("competing") && flag("connected")
}

/// The assembled client. Owns the REST engine, the optional OAuth signer,
/// the WebSocket engine plus its subscription controller and queue hub, the
/// tickler, and the health monitor.
pub struct GatewayClient {
    rest: Arc<RestEngine>,
    signer: Option<Arc<OAuthSigner>>,
    ws: Arc<WsEngine>,
    subscriptions: Arc<SubscriptionController>,
    queues: Arc<QueueHub>,
    tickler: Tickler,
    health: HealthMonitor,
}

impl GatewayClient {
    /// Builds every component from a fully resolved `Config`, which is
    /// built once at startup and never mutated afterwards.
    pub fn new(config: &Config) -> GatewayResult<Self> {
        let base_url = url::Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Config(format!("invalid base_url {:?}: {e}", config.base_url)))?;
        let ws_url = url::Url::parse(&config.ws_url)
            .map_err(|e| GatewayError::Config(format!("invalid ws_url {:?}: {e}", config.ws_url)))?;

        let signer: Option<Arc<OAuthSigner>> = match (&config.oauth, config.use_oauth) {
            (Some(oauth_cfg), true) => Some(Arc::new(OAuthSigner::new(oauth_cfg.clone(), Client::new())?)),
            (None, true) => {
                return Err(GatewayError::Config(
                    "use_oauth is enabled but no OAuth credentials were resolved".into(),
                ))
            }
            _ => None,
        };

        let mut rest_builder = RestEngine::builder()
            .base_url(base_url)
            .max_retries(config.max_retries)
            .default_timeout(config.default_timeout)
            .use_session(config.use_session)
            .log_responses(config.log_responses)
            .verify_ssl(config.verify_ssl);
        if let Some(cacert) = &config.cacert {
            rest_builder = rest_builder.cacert(cacert.clone());
        }
        if let Some(s) = &signer {
            rest_builder = rest_builder.signer(s.clone() as Arc<dyn Signer>);
        }
        let rest = Arc::new(rest_builder.build());

        let ws_config = WsEngineConfig {
            url: ws_url,
            ping_interval: config.ping_interval,
            max_ping_interval: config.max_ping_interval,
            ..WsEngineConfig::default()
        };
        let (ws, subscriptions, queues) = WsEngine::new(ws_config, config.subscription_retries, config.subscription_timeout);

        let tickler = Tickler::new(Arc::new(RestTickle { rest: rest.clone() }), config.tickler_interval);
        let health = HealthMonitor::new(
            ws.clone(),
            Arc::new(RestSessionProbe { rest: rest.clone() }),
            config.max_ping_interval,
            config.max_ping_interval,
        );

        Ok(Self {
            rest,
            signer,
            ws,
            subscriptions,
            queues,
            tickler,
            health,
        })
    }

    pub fn rest(&self) -> &Arc<RestEngine> {
        &self.rest
    }

    pub fn signer(&self) -> Option<&Arc<OAuthSigner>> {
        self.signer.as_ref()
    }

    pub fn ws(&self) -> &Arc<WsEngine> {
        &self.ws
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionController> {
        &self.subscriptions
    }

    pub fn queues(&self) -> &Arc<QueueHub> {
        &self.queues
    }

    pub fn queue_hub(&self) -> &Arc<QueueHub> {
        &self.queues
    }

    pub async fn get(&self, endpoint: &str, params: Option<serde_json::Map<String, Value>>) -> GatewayResult<GatewayResponse> {
        self.rest.get(endpoint, params).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        params: Option<serde_json::Map<String, Value>>,
        body: Option<Value>,
    ) -> GatewayResult<GatewayResponse> {
        self.rest.post(endpoint, params, body).await
    }

    pub async fn delete(&self, endpoint: &str, params: Option<serde_json::Map<String, Value>>) -> GatewayResult<GatewayResponse> {
        self.rest.delete(endpoint, params).await
    }

    /// Pulls one item off `topic`'s queue, blocking up to `timeout` if
    /// nothing is queued yet (`block=false` for a non-blocking peek).
    pub fn next(&self, topic: Topic, block: bool, timeout: Option<Duration>) -> Option<Value> {
        self.queues.get(topic, block, timeout)
    }

    /// Starts the WebSocket worker, the ping task and the tickler.
    /// Idempotent because each underlying worker is.
    pub fn start(self: &Arc<Self>) {
        self.ws.start();
        self.tickler.start();
    }

    /// One-shot health check. Triggers a WebSocket hard reset and returns
    /// `false` on any degraded signal.
    pub async fn check_health(&self) -> bool {
        self.health.check_health().await
    }

    /// Graceful shutdown of every worker, in the order they were started.
    pub async fn shutdown(&self) {
        self.tickler.stop().await;
        self.ws.shutdown().await;
        self.rest.shutdown().await;
    }
}
