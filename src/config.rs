//! Layered configuration: explicit override < named environment variable < default.
//!
//! Grounded on `arkin-core/src/utils/config_loader.rs`'s "load config once,
//! fail loudly" shape, adapted to a precise per-key explicit/env/default
//! contract rather than a generic layered merge. The boolean vocabulary and
//! hard-error-on-malformed-integer behavior are part of that contract, not
//! something a general config crate would reproduce as-is.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

const ENV_PREFIX: &str = "GATEWAY";

fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}_{name}")
}

fn resolve_string(explicit: Option<String>, name: &str, default: &str) -> String {
    explicit
        .or_else(|| env::var(env_key(name)).ok())
        .unwrap_or_else(|| default.to_owned())
}

fn resolve_opt_string(explicit: Option<String>, name: &str) -> Option<String> {
    explicit.or_else(|| env::var(env_key(name)).ok())
}

fn parse_bool(raw: &str, name: &str) -> GatewayResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        other => Err(GatewayError::Config(format!(
            "invalid boolean value {other:?} for {name}"
        ))),
    }
}

fn resolve_bool(explicit: Option<bool>, name: &str, default: bool) -> GatewayResult<bool> {
    if let Some(v) = explicit {
        return Ok(v);
    }
    match env::var(env_key(name)) {
        Ok(raw) => parse_bool(&raw, name),
        Err(_) => Ok(default),
    }
}

fn resolve_u64(explicit: Option<u64>, name: &str, default: u64) -> GatewayResult<u64> {
    if let Some(v) = explicit {
        return Ok(v);
    }
    match env::var(env_key(name)) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| GatewayError::Config(format!("invalid integer {raw:?} for {name}"))),
        Err(_) => Ok(default),
    }
}

fn resolve_f64(explicit: Option<f64>, name: &str, default: f64) -> GatewayResult<f64> {
    if let Some(v) = explicit {
        return Ok(v);
    }
    match env::var(env_key(name)) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| GatewayError::Config(format!("invalid number {raw:?} for {name}"))),
        Err(_) => Ok(default),
    }
}

/// Explicit overrides supplied by the caller; every field is optional so the
/// resolver can fall through to environment then default.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub ws_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u64>,
    pub cacert: Option<String>,
    pub verify_ssl: Option<bool>,
    pub default_timeout_secs: Option<f64>,
    pub max_retries: Option<u64>,
    pub use_session: Option<bool>,
    pub auto_register_shutdown: Option<bool>,
    pub log_responses: Option<bool>,
    pub use_oauth: Option<bool>,
    pub ping_interval_secs: Option<f64>,
    pub max_ping_interval_secs: Option<f64>,
    pub subscription_retries: Option<u64>,
    pub subscription_timeout_secs: Option<f64>,
    pub tickler_interval_secs: Option<f64>,
    pub oauth: Option<OAuth1aOverrides>,
}

#[derive(Debug, Default, Clone)]
pub struct OAuth1aOverrides {
    pub consumer_key: Option<String>,
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
    pub dh_prime: Option<String>,
    pub dh_generator: Option<u64>,
    pub realm: Option<String>,
    pub encryption_key_fp: Option<String>,
    pub signature_key_fp: Option<String>,
    pub oauth_rest_url: Option<String>,
    pub live_session_token_endpoint: Option<String>,
}

/// Immutable, fully resolved configuration. Built once at startup; never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub ws_url: String,
    pub host: String,
    pub port: u64,
    pub cacert: Option<PathBuf>,
    pub verify_ssl: bool,
    pub default_timeout: Duration,
    pub max_retries: u64,
    pub use_session: bool,
    pub auto_register_shutdown: bool,
    pub log_responses: bool,
    pub use_oauth: bool,
    pub oauth: Option<OAuth1aConfig>,
    pub ping_interval: Duration,
    pub max_ping_interval: Duration,
    pub subscription_retries: u64,
    pub subscription_timeout: Duration,
    pub tickler_interval: Duration,
}

/// OAuth 1.0a credential bundle. Required whenever `use_oauth` is set.
#[derive(Debug, Clone)]
pub struct OAuth1aConfig {
    pub consumer_key: String,
    pub access_token: String,
    pub access_token_secret: String,
    pub dh_prime: String,
    pub dh_generator: u64,
    pub realm: String,
    pub encryption_key_fp: PathBuf,
    pub signature_key_fp: PathBuf,
    pub oauth_rest_url: String,
    pub live_session_token_endpoint: String,
}

impl OAuth1aConfig {
    /// Enforce presence-and-file-existence for every required field. Raises
    /// loudly and exactly once, at construction time.
    pub fn verify(&self) -> GatewayResult<()> {
        let required = [
            ("consumer_key", &self.consumer_key),
            ("access_token", &self.access_token),
            ("access_token_secret", &self.access_token_secret),
            ("dh_prime", &self.dh_prime),
            ("realm", &self.realm),
            ("oauth_rest_url", &self.oauth_rest_url),
            ("live_session_token_endpoint", &self.live_session_token_endpoint),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(GatewayError::Config(format!("missing required OAuth field: {name}")));
            }
        }
        for (name, path) in [
            ("encryption_key_fp", &self.encryption_key_fp),
            ("signature_key_fp", &self.signature_key_fp),
        ] {
            if !path.is_file() {
                return Err(GatewayError::Config(format!(
                    "OAuth key file for {name} is not readable: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl Config {
    pub fn resolve(overrides: ConfigOverrides) -> GatewayResult<Self> {
        let base_url = resolve_string(overrides.base_url, "REST_URL", "https://api.gateway.example.com/v1/api");
        let ws_url = resolve_string(overrides.ws_url, "WS_URL", "wss://api.gateway.example.com/v1/api/ws");
        let host = resolve_string(overrides.host, "HOST", "api.gateway.example.com");
        let port = resolve_u64(overrides.port, "PORT", 443)?;
        let cacert = resolve_opt_string(overrides.cacert, "CACERT").map(PathBuf::from);
        let verify_ssl = resolve_bool(overrides.verify_ssl, "VERIFY_SSL", true)?;
        let default_timeout_secs = resolve_f64(overrides.default_timeout_secs, "TIMEOUT", 10.0)?;
        let max_retries = resolve_u64(overrides.max_retries, "MAX_RETRIES", 3)?;
        let use_session = resolve_bool(overrides.use_session, "USE_SESSION", true)?;
        let auto_register_shutdown =
            resolve_bool(overrides.auto_register_shutdown, "AUTO_REGISTER_SHUTDOWN", true)?;
        let log_responses = resolve_bool(overrides.log_responses, "LOG_RESPONSES", false)?;
        let use_oauth = resolve_bool(overrides.use_oauth, "USE_OAUTH", false)?;
        let ping_interval_secs = resolve_f64(overrides.ping_interval_secs, "WS_PING_INTERVAL", 45.0)?;
        let max_ping_interval_secs = resolve_f64(overrides.max_ping_interval_secs, "WS_MAX_PING_INTERVAL", 90.0)?;
        let subscription_retries = resolve_u64(overrides.subscription_retries, "WS_SUBSCRIPTION_RETRIES", 3)?;
        let subscription_timeout_secs =
            resolve_f64(overrides.subscription_timeout_secs, "WS_SUBSCRIPTION_TIMEOUT", 5.0)?;
        let tickler_interval_secs = resolve_f64(overrides.tickler_interval_secs, "TICKLER_INTERVAL", 60.0)?;

        let oauth = if use_oauth {
            let o = overrides.oauth.unwrap_or_default();
            Some(OAuth1aConfig {
                consumer_key: resolve_string(o.consumer_key, "OAUTH1A_CONSUMER_KEY", ""),
                access_token: resolve_string(o.access_token, "OAUTH1A_ACCESS_TOKEN", ""),
                access_token_secret: resolve_string(o.access_token_secret, "OAUTH1A_ACCESS_TOKEN_SECRET", ""),
                dh_prime: resolve_string(o.dh_prime, "OAUTH1A_DH_PRIME", ""),
                dh_generator: resolve_u64(o.dh_generator, "OAUTH1A_DH_GENERATOR", 2)?,
                realm: resolve_string(o.realm, "OAUTH1A_REALM", ""),
                encryption_key_fp: PathBuf::from(resolve_string(o.encryption_key_fp, "OAUTH1A_ENCRYPTION_KEY_FP", "")),
                signature_key_fp: PathBuf::from(resolve_string(o.signature_key_fp, "OAUTH1A_SIGNATURE_KEY_FP", "")),
                oauth_rest_url: resolve_string(o.oauth_rest_url, "OAUTH1A_REST_URL", &base_url),
                live_session_token_endpoint: resolve_string(
                    o.live_session_token_endpoint,
                    "OAUTH1A_LIVE_SESSION_TOKEN_ENDPOINT",
                    "",
                ),
            })
        } else {
            None
        };

        Ok(Config {
            base_url,
            ws_url,
            host,
            port,
            cacert,
            verify_ssl,
            default_timeout: Duration::from_secs_f64(default_timeout_secs),
            max_retries,
            use_session,
            auto_register_shutdown,
            log_responses,
            use_oauth,
            oauth,
            ping_interval: Duration::from_secs_f64(ping_interval_secs),
            max_ping_interval: Duration::from_secs_f64(max_ping_interval_secs),
            subscription_retries,
            subscription_timeout: Duration::from_secs_f64(subscription_timeout_secs),
            tickler_interval: Duration::from_secs_f64(tickler_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn explicit_overrides_win_over_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("GATEWAY_MAX_RETRIES", "9") };
        let cfg = Config::resolve(ConfigOverrides {
            max_retries: Some(2),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.max_retries, 2);
        unsafe { env::remove_var("GATEWAY_MAX_RETRIES") };
    }

    #[test]
    fn env_wins_over_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("GATEWAY_MAX_RETRIES", "7") };
        let cfg = Config::resolve(ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.max_retries, 7);
        unsafe { env::remove_var("GATEWAY_MAX_RETRIES") };
    }

    #[test]
    fn default_applies_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::remove_var("GATEWAY_MAX_RETRIES") };
        let cfg = Config::resolve(ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn boolean_vocabulary_accepts_aliases() {
        let _guard = ENV_LOCK.lock().unwrap();
        for (raw, expected) in [
            ("y", true),
            ("YES", true),
            ("t", true),
            ("TRUE", true),
            ("on", true),
            ("1", true),
            ("n", false),
            ("NO", false),
            ("f", false),
            ("false", false),
            ("off", false),
            ("0", false),
        ] {
            unsafe { env::set_var("GATEWAY_USE_SESSION", raw) };
            let cfg = Config::resolve(ConfigOverrides::default()).unwrap();
            assert_eq!(cfg.use_session, expected, "raw={raw}");
        }
        unsafe { env::remove_var("GATEWAY_USE_SESSION") };
    }

    #[test]
    fn boolean_vocabulary_rejects_garbage() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("GATEWAY_USE_SESSION", "maybe") };
        let err = Config::resolve(ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        unsafe { env::remove_var("GATEWAY_USE_SESSION") };
    }

    #[test]
    fn malformed_integer_is_hard_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("GATEWAY_MAX_RETRIES", "not-a-number") };
        let err = Config::resolve(ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        unsafe { env::remove_var("GATEWAY_MAX_RETRIES") };
    }

    #[test]
    fn parsing_same_environment_twice_is_structurally_equal() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("GATEWAY_MAX_RETRIES", "5") };
        let a = Config::resolve(ConfigOverrides::default()).unwrap();
        let b = Config::resolve(ConfigOverrides::default()).unwrap();
        assert_eq!(a.max_retries, b.max_retries);
        assert_eq!(a.base_url, b.base_url);
        assert_eq!(a.default_timeout, b.default_timeout);
        unsafe { env::remove_var("GATEWAY_MAX_RETRIES") };
    }

    #[test]
    fn oauth_verify_requires_key_files() {
        let cfg = OAuth1aConfig {
            consumer_key: "k".into(),
            access_token: "t".into(),
            access_token_secret: "s".into(),
            dh_prime: "ff".into(),
            dh_generator: 2,
            realm: "test".into(),
            encryption_key_fp: PathBuf::from("/nonexistent/enc.pem"),
            signature_key_fp: PathBuf::from("/nonexistent/sig.pem"),
            oauth_rest_url: "https://example.com".into(),
            live_session_token_endpoint: "https://example.com/lst".into(),
        };
        assert!(cfg.verify().is_err());
    }

    #[test]
    fn oauth_verify_rejects_empty_required_field() {
        let cfg = OAuth1aConfig {
            consumer_key: "".into(),
            access_token: "t".into(),
            access_token_secret: "s".into(),
            dh_prime: "ff".into(),
            dh_generator: 2,
            realm: "test".into(),
            encryption_key_fp: PathBuf::from("/nonexistent/enc.pem"),
            signature_key_fp: PathBuf::from("/nonexistent/sig.pem"),
            oauth_rest_url: "https://example.com".into(),
            live_session_token_endpoint: "https://example.com/lst".into(),
        };
        let err = cfg.verify().unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
