//! Client library for a brokerage trading platform's HTTP+WebSocket gateway:
//! a session-oriented REST engine with OAuth 1.0a live-session-token
//! signing, and a self-healing WebSocket engine with confirmation-driven
//! subscriptions. Endpoint-specific wrappers, field-id maps and CLI tooling
//! are left to callers; this crate is the core engine the two protocols
//! share.

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod oauth;
pub mod rest;
pub mod tickler;
pub mod topics;
pub mod ws;

pub use client::GatewayClient;
pub use config::{Config, ConfigOverrides, OAuth1aConfig, OAuth1aOverrides};
pub use error::{GatewayError, GatewayResult};
pub use health::{HealthMonitor, SessionProbe};
pub use oauth::{LiveSessionToken, OAuthSigner, SignatureMethod};
pub use rest::{elide_nulls, run_parallel, run_parallel_keyed, GatewayResponse, HttpMethod, RequestEnvelope, RestEngine, Signer};
pub use tickler::{Tickle, Tickler};
pub use topics::Topic;
pub use ws::{
    ConnectionHealth, ConnectionState, ControlMessage, DefaultPayloadProcessor, ModifyRequest, Patch, PayloadProcessor, QueueHub,
    SubscriptionController, SubscriptionRegistry, UnwrapFn, WsEngine, WsEngineConfig,
};
