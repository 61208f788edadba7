//! OAuth 1.0a live-session-token handshake and per-request signing
//!. Grounded on `arkin-binance/src/http/client.rs`'s
//! `sign_payload` hook (a per-request signing callback invoked by the REST
//! client) generalized from Binance's simple HMAC query-string signing to
//! the full LST handshake + OAuth Authorization header.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::config::OAuth1aConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::oauth::crypto;
use crate::oauth::dh::{self, DhRandom};
use crate::rest::Signer;

/// Safety margin before the reported expiration at which a fresh handshake
/// is triggered, so no request is ever signed with a token that could
/// expire mid-flight.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    HmacSha256,
    RsaSha256,
}

impl SignatureMethod {
    fn as_str(self) -> &'static str {
        match self {
            SignatureMethod::HmacSha256 => "HMAC-SHA256",
            SignatureMethod::RsaSha256 => "RSA-SHA256",
        }
    }
}

/// The live session token produced by the handshake.
#[derive(Debug, Clone)]
pub struct LiveSessionToken {
    pub token_b64: String,
    pub expiration_ms: i64,
    pub signature_hex: String,
}

impl LiveSessionToken {
    fn decoded(&self) -> GatewayResult<Vec<u8>> {
        STANDARD
            .decode(&self.token_b64)
            .map_err(|e| GatewayError::Auth(format!("live session token is not valid base64: {e}")))
    }

    fn is_fresh(&self) -> bool {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        now_ms + EXPIRY_SAFETY_MARGIN.as_millis() as i64 < self.expiration_ms
    }
}

#[derive(Debug, Deserialize)]
struct LstHandshakeResponse {
    diffie_hellman_response: String,
    live_session_token_expiration: i64,
    live_session_token_signature: String,
}

/// RFC 3986 unreserved characters are left alone; everything else is
/// percent-encoded, then a literal space is remapped to `+` to match the
/// gateway's OAuth parameter encoding convention.
const OAUTH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'~');

fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, OAUTH_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

fn generate_nonce() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..16).map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char).collect()
}

fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Builds the `method&url&params` OAuth base string:
/// all authorization + query parameters sorted by byte-lexicographic key
/// order, `k=v` joined by `&`, each component percent-encoded.
fn base_string(method: &str, url: &str, all_params: &BTreeMap<String, String>) -> String {
    let param_str = all_params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}&{}&{}", method, percent_encode(url), percent_encode(&param_str))
}

/// Renders `OAuth realm="...", k1="v1", ...` with keys sorted
/// lexicographically after the leading `realm`.
fn render_auth_header(realm: &str, params: &BTreeMap<String, String>) -> String {
    let mut parts = vec![format!("realm=\"{}\"", realm)];
    for (k, v) in params {
        parts.push(format!("{}=\"{}\"", k, percent_encode(v)));
    }
    format!("OAuth {}", parts.join(", "))
}

pub struct OAuthSigner {
    config: OAuth1aConfig,
    http: Client,
    state: parking_lot::Mutex<Option<LiveSessionToken>>,
    handshake_lock: tokio::sync::Mutex<()>,
}

impl OAuthSigner {
    pub fn new(config: OAuth1aConfig, http: Client) -> GatewayResult<Self> {
        config.verify()?;
        Ok(Self {
            config,
            http,
            state: parking_lot::Mutex::new(None),
            handshake_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn current_token(&self) -> Option<LiveSessionToken> {
        self.state.lock().clone()
    }

    /// Builds the Authorization header for one request. `params` are the
    /// query/body parameters that participate in the signature base
    /// string (not the header itself). `live_session_token` is the raw,
    /// base64-decoded token bytes used as the HMAC-SHA256 key; pass `None`
    /// together with `signature_method = RsaSha256` for the handshake call
    /// itself.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_oauth_headers(
        &self,
        method: &str,
        url: &str,
        live_session_token: Option<&[u8]>,
        extra_auth_params: Option<&BTreeMap<String, String>>,
        params: Option<&[(String, String)]>,
        signature_method: SignatureMethod,
        prepend: Option<&str>,
    ) -> GatewayResult<String> {
        let mut auth_params = BTreeMap::new();
        auth_params.insert("oauth_consumer_key".to_string(), self.config.consumer_key.clone());
        auth_params.insert("oauth_nonce".to_string(), generate_nonce());
        auth_params.insert("oauth_signature_method".to_string(), signature_method.as_str().to_string());
        auth_params.insert("oauth_timestamp".to_string(), unix_timestamp().to_string());
        auth_params.insert("oauth_token".to_string(), self.config.access_token.clone());
        if let Some(extra) = extra_auth_params {
            for (k, v) in extra {
                auth_params.insert(k.clone(), v.clone());
            }
        }

        let mut all_params = auth_params.clone();
        if let Some(p) = params {
            for (k, v) in p {
                all_params.insert(k.clone(), v.clone());
            }
        }

        let mut base = base_string(method, url, &all_params);
        if let Some(p) = prepend {
            base = format!("{p}{base}");
        }

        let signature = match signature_method {
            SignatureMethod::RsaSha256 => {
                let key = crypto::load_private_key(&self.config.signature_key_fp)?;
                let sig_bytes = crypto::sign_rsa_sha256(&key, base.as_bytes())?;
                STANDARD.encode(sig_bytes)
            }
            SignatureMethod::HmacSha256 => {
                let key_bytes = live_session_token
                    .ok_or_else(|| GatewayError::Auth("HMAC-SHA256 signing requires a live session token".into()))?;
                let mut mac = Hmac::<Sha256>::new_from_slice(key_bytes)
                    .map_err(|e| GatewayError::Auth(format!("invalid HMAC key: {e}")))?;
                mac.update(base.as_bytes());
                STANDARD.encode(mac.finalize().into_bytes())
            }
        };
        auth_params.insert("oauth_signature".to_string(), signature);

        Ok(render_auth_header(&self.config.realm, &auth_params))
    }

    /// Performs the full LST handshake.
    pub async fn request_live_session_token(&self) -> GatewayResult<LiveSessionToken> {
        let dh_random = DhRandom::generate();
        let dh_random_big = dh_random.as_biguint();
        let dh_challenge = dh::dh_challenge(self.config.dh_generator, &dh_random_big, &self.config.dh_prime)?;

        let enc_key = crypto::load_private_key(&self.config.encryption_key_fp)?;
        let secret_bytes = crypto::decrypt_access_token_secret(&enc_key, &self.config.access_token_secret)?;
        let prepend = hex::encode(&secret_bytes);

        let mut extra = BTreeMap::new();
        extra.insert("diffie_hellman_challenge".to_string(), dh_challenge);

        let auth_header = self.generate_oauth_headers(
            "POST",
            &self.config.live_session_token_endpoint,
            None,
            Some(&extra),
            None,
            SignatureMethod::RsaSha256,
            Some(&prepend),
        )?;

        debug!(target: "oauth", "posting LST handshake to {}", self.config.live_session_token_endpoint);
        let response = self
            .http
            .post(&self.config.live_session_token_endpoint)
            .header("Authorization", auth_header)
            .send()
            .await
            .map_err(|e| GatewayError::Auth(format!("LST handshake request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!(
                "LST handshake rejected with status {status}: {body}"
            )));
        }

        let parsed: LstHandshakeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Auth(format!("LST handshake response was not valid JSON: {e}")))?;

        let shared = dh::shared_secret(&parsed.diffie_hellman_response, &dh_random_big, &self.config.dh_prime)?;
        let k_bytes = dh::to_signed_bytes(&shared);

        let mut mac = Hmac::<Sha1>::new_from_slice(&k_bytes)
            .map_err(|e| GatewayError::Auth(format!("invalid derived HMAC key: {e}")))?;
        mac.update(&secret_bytes);
        let token_b64 = STANDARD.encode(mac.finalize().into_bytes());

        let token_bytes = STANDARD
            .decode(&token_b64)
            .map_err(|e| GatewayError::Auth(format!("derived token failed to round-trip base64: {e}")))?;
        let mut validation_mac = Hmac::<Sha1>::new_from_slice(&token_bytes)
            .map_err(|e| GatewayError::Auth(format!("invalid validation HMAC key: {e}")))?;
        validation_mac.update(self.config.consumer_key.as_bytes());
        let validation_hex = hex::encode(validation_mac.finalize().into_bytes());

        if validation_hex != parsed.live_session_token_signature {
            return Err(GatewayError::Auth(
                "live session token signature validation failed".to_string(),
            ));
        }

        let token = LiveSessionToken {
            token_b64,
            expiration_ms: parsed.live_session_token_expiration,
            signature_hex: parsed.live_session_token_signature,
        };
        *self.state.lock() = Some(token.clone());
        Ok(token)
    }

    /// Ensures a fresh LST is present (handshaking if needed, serialized so
    /// only one handshake runs concurrently) and signs one protected
    /// request.
    pub async fn sign(&self, method: &str, url: &str, params: Option<&[(String, String)]>) -> GatewayResult<String> {
        let needs_handshake = match self.state.lock().as_ref() {
            Some(token) => !token.is_fresh(),
            None => true,
        };

        if needs_handshake {
            let _guard = self.handshake_lock.lock().await;
            // Re-check after acquiring the lock: another task may have
            // already refreshed the token while we were waiting.
            let still_needs = match self.state.lock().as_ref() {
                Some(token) => !token.is_fresh(),
                None => true,
            };
            if still_needs {
                warn!(target: "oauth", "live session token missing or expiring, re-running handshake");
                self.request_live_session_token().await?;
            }
        }

        let token = self
            .state
            .lock()
            .clone()
            .ok_or_else(|| GatewayError::Auth("no live session token available after handshake".into()))?;
        let key_bytes = token.decoded()?;

        self.generate_oauth_headers(
            method,
            url,
            Some(&key_bytes),
            None,
            params,
            SignatureMethod::HmacSha256,
            None,
        )
    }
}

#[async_trait]
impl Signer for OAuthSigner {
    async fn sign(&self, method: &str, url: &str, params: Option<&[(String, String)]>) -> GatewayResult<String> {
        self.sign(method, url, params).await
    }

    fn excluded_url(&self) -> Option<&str> {
        Some(&self.config.live_session_token_endpoint)
    }
}
