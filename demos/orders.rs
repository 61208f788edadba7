//! Second representative topic module (see `accounts.rs`). Order
//! submission additionally serializes through `RestEngine::order_lock`
//!.

use gateway_client::{GatewayResponse, GatewayResult, RestEngine};
use serde_json::{json, Value};

pub struct OrdersApi<'a> {
    rest: &'a RestEngine,
}

impl<'a> OrdersApi<'a> {
    pub fn new(rest: &'a RestEngine) -> Self {
        Self { rest }
    }

    /// `GET /iserver/account/orders`.
    pub async fn live_orders(&self) -> GatewayResult<GatewayResponse> {
        self.rest.get("iserver/account/orders", None).await
    }

    /// `POST /iserver/account/{account_id}/orders`. Holds `order_lock` for
    /// the duration of the call so concurrent callers never race two order
    /// submissions against the same brokerage session.
    pub async fn place_order(&self, account_id: &str, order: Value) -> GatewayResult<GatewayResponse> {
        let _guard = self.rest.order_lock().lock().await;
        self.rest
            .post(&format!("iserver/account/{account_id}/orders"), None, Some(json!({ "orders": [order] })))
            .await
    }

    /// `DELETE /iserver/account/{account_id}/order/{order_id}`.
    pub async fn cancel_order(&self, account_id: &str, order_id: &str) -> GatewayResult<GatewayResponse> {
        let _guard = self.rest.order_lock().lock().await;
        self.rest
            .delete(&format!("iserver/account/{account_id}/order/{order_id}"), None)
            .await
    }
}
