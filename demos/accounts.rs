//! One representative topic module: a small struct wrapping a reference to the REST engine rather
//! than a mixin trait. Not part of the public crate surface — endpoint
//! wrappers are explicitly out of scope and ship as a standalone
//! demonstration of the pattern.

use gateway_client::{GatewayResponse, GatewayResult, RestEngine};
use serde_json::json;

pub struct AccountsApi<'a> {
    rest: &'a RestEngine,
}

impl<'a> AccountsApi<'a> {
    pub fn new(rest: &'a RestEngine) -> Self {
        Self { rest }
    }

    /// `GET /portfolio/accounts` — the pre-flight call most other portfolio
    /// endpoints require.
    pub async fn portfolio_accounts(&self) -> GatewayResult<GatewayResponse> {
        self.rest.get("portfolio/accounts", None).await
    }

    /// `GET /portfolio/{account_id}/summary`.
    pub async fn portfolio_summary(&self, account_id: &str) -> GatewayResult<GatewayResponse> {
        self.rest.get(&format!("portfolio/{account_id}/summary"), None).await
    }

    /// `POST /portfolio/{account_id}/positions/invalidate` — forces a
    /// refresh of the cached position snapshot the gateway holds.
    pub async fn invalidate_positions(&self, account_id: &str) -> GatewayResult<GatewayResponse> {
        self.rest
            .post(&format!("portfolio/{account_id}/positions/invalidate"), None, Some(json!({})))
            .await
    }
}
