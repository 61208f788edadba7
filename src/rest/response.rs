use serde_json::Value;

use crate::rest::request::RequestEnvelope;

/// Response envelope returned from every REST call: the decoded JSON body
/// alongside the request that produced it, so a caller can correlate a
/// result with its origin without re-threading context.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub data: Value,
    pub request: RequestEnvelope,
}

impl GatewayResponse {
    pub fn new(data: Value, request: RequestEnvelope) -> Self {
        Self { data, request }
    }
}
