use thiserror::Error;

use crate::rest::RequestEnvelope;

/// Every way a call into this client can fail.
///
/// `Config` and `Auth` never retry, `TransientIo` is retried internally up
/// to the configured ceiling before surfacing, `ExternalBroker` and
/// `Protocol` surface immediately, `SubscriptionTimeout` is only ever
/// returned as a `bool` by the subscription controller (kept here for
/// completeness / logging), and `Health` is handled internally by the
/// health monitor.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("transient io error for {method} {url}: reached max retries ({max_retries}): {source}")]
    TransientIo {
        method: String,
        url: String,
        max_retries: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("external broker error ({status}) for {method} {url}: {body}")]
    ExternalBroker {
        status: u16,
        method: String,
        url: String,
        body: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("subscription {0} not confirmed within budget")]
    SubscriptionTimeout(String),

    #[error("websocket health degraded: {0}")]
    Health(String),
}

impl GatewayError {
    pub fn external_broker(envelope: &RequestEnvelope, status: u16, body: impl Into<String>) -> Self {
        GatewayError::ExternalBroker {
            status,
            method: envelope.method.as_str().to_owned(),
            url: envelope.url.to_string(),
            body: body.into(),
        }
    }

    pub fn transient_io(envelope: &RequestEnvelope, max_retries: u64, source: reqwest::Error) -> Self {
        GatewayError::TransientIo {
            method: envelope.method.as_str().to_owned(),
            url: envelope.url.to_string(),
            max_retries,
            source,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
