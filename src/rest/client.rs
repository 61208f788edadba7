//! The REST engine: session-oriented HTTP client with
//! connection reuse, the request pipeline (normalize → elide nulls → sign →
//! retry → classify → decode), and idempotent shutdown.
//!
//! Grounded on `arkin-binance/src/http/client.rs`'s `BinanceHttpClient`
//! (`TypedBuilder`, one reusable `reqwest::Client`, `send` pipeline) and its
//! `BinanceHttpClientError`/`HttpError` shape (`arkin-binance/src/http/error.rs`)
//! generalized from Binance's fixed HMAC-query signing to the pluggable
//! `Signer` hook the OAuth handshake needs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use typed_builder::TypedBuilder;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::rest::request::{elide_nulls, HttpMethod, RequestEnvelope};
use crate::rest::response::GatewayResponse;
use crate::rest::retry::{is_transient, retry_transient};

/// The marker text the brokerage gateway returns on a 400 when the
/// brokerage session has not been initialized yet.
const NO_BRIDGE_MARKER: &str = "Bad Request: no bridge";

/// Per-request signing hook. Implemented by `OAuthSigner` for the protected
/// gateway, and trivially (no-op) when OAuth is disabled.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(
        &self,
        method: &str,
        url: &str,
        params: Option<&[(String, String)]>,
    ) -> GatewayResult<String>;

    /// The signer must not be consulted for requests to its own handshake
    /// endpoint.
    fn excluded_url(&self) -> Option<&str> {
        None
    }
}

#[derive(Clone, TypedBuilder)]
pub struct RestEngine {
    #[builder(default = Client::new(), setter(skip))]
    initial_client: Client,
    base_url: Url,
    #[builder(default = 3)]
    max_retries: u64,
    #[builder(default = Duration::from_secs(10))]
    default_timeout: Duration,
    #[builder(default = true)]
    use_session: bool,
    #[builder(default)]
    log_responses: bool,
    /// When `false`, certificate verification is disabled
    /// (`Client::danger_accept_invalid_certs`).
    #[builder(default = true)]
    verify_ssl: bool,
    /// Path to a custom CA-certificate PEM; added as an extra trusted root
    /// alongside the platform's native roots.
    #[builder(default, setter(strip_option))]
    cacert: Option<PathBuf>,
    #[builder(default, setter(strip_option))]
    signer: Option<Arc<dyn Signer>>,
    #[builder(default = Arc::new(RwLock::new(None)), setter(skip))]
    client: Arc<RwLock<Option<Client>>>,
    #[builder(default = Arc::new(AtomicBool::new(false)), setter(skip))]
    closed: Arc<AtomicBool>,
    /// Serializes order-submission calls per client instance so two
    /// concurrent callers can never race two order mutations against the
    /// same brokerage session.
    #[builder(default = Arc::new(tokio::sync::Mutex::new(())), setter(skip))]
    order_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for RestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestEngine")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("use_session", &self.use_session)
            .field("verify_ssl", &self.verify_ssl)
            .field("cacert", &self.cacert)
            .field("signer", &self.signer.is_some())
            .finish()
    }
}

impl RestEngine {
    fn build_client(&self) -> GatewayResult<Client> {
        let mut builder = Client::builder()
            .timeout(self.default_timeout)
            .danger_accept_invalid_certs(!self.verify_ssl);
        if let Some(cacert) = &self.cacert {
            let pem = std::fs::read(cacert)
                .map_err(|e| GatewayError::Config(format!("cannot read cacert {}: {e}", cacert.display())))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| GatewayError::Config(format!("invalid cacert {}: {e}", cacert.display())))?;
            builder = builder.add_root_certificate(cert);
        }
        builder
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))
    }

    /// Returns the reusable client if session reuse is enabled, creating it
    /// on first use; otherwise builds a fresh one-shot client per call.
    async fn client_for_request(&self) -> GatewayResult<Client> {
        if !self.use_session {
            return self.build_client();
        }
        {
            let guard = self.client.read().await;
            if let Some(c) = guard.as_ref() {
                return Ok(c.clone());
            }
        }
        let mut guard = self.client.write().await;
        if let Some(c) = guard.as_ref() {
            return Ok(c.clone());
        }
        let built = self.build_client().unwrap_or_else(|_| self.initial_client.clone());
        *guard = Some(built.clone());
        Ok(built)
    }

    /// Discards the reusable client so the next request rebuilds it: on
    /// connection reset, close and rebuild rather than keep reusing a
    /// socket the peer has already torn down.
    async fn rebuild_client(&self) -> GatewayResult<()> {
        if !self.use_session {
            return Ok(());
        }
        let fresh = self.build_client()?;
        *self.client.write().await = Some(fresh);
        Ok(())
    }

    /// Idempotent shutdown hook. Safe to call repeatedly.
    /// Shared lock endpoint wrappers use to serialize order submission per
    /// client instance.
    pub fn order_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.order_lock
    }

    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.client.write().await = None;
        debug!(target: "rest", "rest engine shut down");
    }

    pub async fn get(&self, endpoint: &str, params: Option<serde_json::Map<String, Value>>) -> GatewayResult<GatewayResponse> {
        let mut envelope = RequestEnvelope::new(HttpMethod::Get, self.compose_url(endpoint)?);
        if let Some(p) = params {
            envelope = envelope.with_params(p);
        }
        self.send(envelope).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        params: Option<serde_json::Map<String, Value>>,
        body: Option<Value>,
    ) -> GatewayResult<GatewayResponse> {
        let mut envelope = RequestEnvelope::new(HttpMethod::Post, self.compose_url(endpoint)?);
        if let Some(p) = params {
            envelope = envelope.with_params(p);
        }
        if let Some(b) = body {
            envelope = envelope.with_body(b);
        }
        self.send(envelope).await
    }

    pub async fn delete(&self, endpoint: &str, params: Option<serde_json::Map<String, Value>>) -> GatewayResult<GatewayResponse> {
        let mut envelope = RequestEnvelope::new(HttpMethod::Delete, self.compose_url(endpoint)?);
        if let Some(p) = params {
            envelope = envelope.with_params(p);
        }
        self.send(envelope).await
    }

    fn compose_url(&self, endpoint: &str) -> GatewayResult<Url> {
        let trimmed = endpoint.trim_start_matches('/');
        self.base_url
            .join(trimmed)
            .map_err(|e| GatewayError::Protocol(format!("invalid endpoint {endpoint:?}: {e}")))
    }

    /// Runs the full request pipeline for `envelope`.
    pub async fn send(&self, envelope: RequestEnvelope) -> GatewayResult<GatewayResponse> {
        let query_pairs = envelope.query_pairs();
        let body = envelope.elided_body();

        let auth_header = if let Some(signer) = &self.signer {
            let skip = signer
                .excluded_url()
                .map(|lst| lst == envelope.url.as_str())
                .unwrap_or(false);
            if skip {
                None
            } else {
                Some(
                    signer
                        .sign(envelope.method.as_str(), envelope.url.as_str(), Some(&query_pairs))
                        .await?,
                )
            }
        } else {
            None
        };

        let response = retry_transient(
            self.max_retries,
            || {
                let client_fut = self.client_for_request();
                let method = envelope.method;
                let url = envelope.url.clone();
                let query_pairs = query_pairs.clone();
                let body = body.clone();
                let auth_header = auth_header.clone();
                let extra_headers = envelope.extra_headers.clone();
                async move {
                    let client = match client_fut.await {
                        Ok(c) => c,
                        Err(_) => Client::new(),
                    };
                    let mut builder = client.request(method.into(), url).query(&query_pairs);
                    if let Some(header) = &auth_header {
                        builder = builder.header("Authorization", header.as_str());
                    }
                    for (k, v) in &extra_headers {
                        builder = builder.header(k.as_str(), v.as_str());
                    }
                    if let Some(b) = &body {
                        builder = builder.json(b);
                    }
                    client.execute(builder.build()?).await
                }
            },
            is_transient,
        )
        .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if e.is_connect() {
                    self.rebuild_client().await?;
                }
                return Err(GatewayError::transient_io(&envelope, self.max_retries, e));
            }
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transient_io(&envelope, self.max_retries, e))?;

        if self.log_responses {
            debug!(target: "rest", status = %status, body = %text, "rest response");
        }

        if status.is_client_error() || status.is_server_error() {
            let rewritten = if status.as_u16() == 400 && text.contains(NO_BRIDGE_MARKER) {
                "brokerage session is not initialized; call the keep-alive/init endpoint before retrying".to_string()
            } else {
                text
            };
            return Err(GatewayError::external_broker(&envelope, status.as_u16(), rewritten));
        }

        let data: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| GatewayError::external_broker(&envelope, status.as_u16(), format!("invalid JSON: {e}")))?
        };

        let data = elide_nulls(data);
        Ok(GatewayResponse::new(data, envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(base: &str) -> RestEngine {
        RestEngine::builder()
            .base_url(Url::parse(base).unwrap())
            .max_retries(3)
            .build()
    }

    #[tokio::test]
    async fn get_decodes_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let result = engine(&server.uri()).get("ok", None).await.unwrap();
        assert_eq!(result.data, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn empty_body_yields_null_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = engine(&server.uri()).get("empty", None).await.unwrap();
        assert_eq!(result.data, Value::Null);
    }

    #[test_log::test]
    #[tokio::test]
    async fn server_error_raises_external_broker_with_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("kaboom"))
            .mount(&server)
            .await;

        let err = engine(&server.uri()).get("broken", None).await.unwrap_err();
        match err {
            GatewayError::ExternalBroker { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "kaboom");
            }
            other => panic!("expected ExternalBroker, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_bridge_body_is_rewritten_with_a_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/needs-session"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Bad Request: no bridge"))
            .mount(&server)
            .await;

        let err = engine(&server.uri()).get("needs-session", None).await.unwrap_err();
        match err {
            GatewayError::ExternalBroker { status, body, .. } => {
                assert_eq!(status, 400);
                assert!(body.contains("brokerage session"));
            }
            other => panic!("expected ExternalBroker, got {other:?}"),
        }
    }

    #[test_log::test]
    #[tokio::test]
    async fn retries_on_timeout_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)).set_body_json(serde_json::json!({"ok": true})))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let eng = RestEngine::builder()
            .base_url(Url::parse(&server.uri()).unwrap())
            .max_retries(3)
            .default_timeout(Duration::from_millis(5))
            .build();
        let result = eng.get("flaky", None).await.unwrap();
        assert_eq!(result.data, serde_json::json!({"ok": true}));
    }

    #[test_log::test]
    #[tokio::test]
    async fn strips_leading_slash_and_composes_against_base() {
        let eng = engine("https://example.com/v1/api/");
        let url = eng.compose_url("/portfolio/accounts").unwrap();
        assert_eq!(url.as_str(), "https://example.com/v1/api/portfolio/accounts");
    }

    #[test]
    fn verify_ssl_false_builds_a_client_that_accepts_invalid_certs() {
        let eng = RestEngine::builder()
            .base_url(Url::parse("https://example.com").unwrap())
            .verify_ssl(false)
            .build();
        assert!(eng.build_client().is_ok());
    }

    #[test]
    fn unreadable_cacert_path_is_a_config_error() {
        let eng = RestEngine::builder()
            .base_url(Url::parse("https://example.com").unwrap())
            .cacert(PathBuf::from("/nonexistent/ca.pem"))
            .build();
        let err = eng.build_client().unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
