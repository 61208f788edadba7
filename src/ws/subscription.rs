//! Subscription registry and controller. No teacher module owns this shape directly; grounded on the
//! `dashmap`-backed registry idiom used for shared mutable state across the
//! pack (e.g. `arkin-core`'s asset/instrument caches) and on the
//! `kanal`-channel handoff to the socket writer from `arkin-ws/src/ws.rs`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};

/// Injectable payload formatting, so callers can target a different wire
/// convention than the default `s`/`u` + channel + JSON scheme.
pub trait PayloadProcessor: Send + Sync {
    fn make_subscribe_payload(&self, channel: &str, data: Option<&Value>) -> String;
    fn make_unsubscribe_payload(&self, channel: &str, data: Option<&Value>) -> String;
}

#[derive(Debug, Default)]
pub struct DefaultPayloadProcessor;

impl PayloadProcessor for DefaultPayloadProcessor {
    fn make_subscribe_payload(&self, channel: &str, data: Option<&Value>) -> String {
        match data {
            Some(d) => format!("s{channel}+{}", compact(d)),
            None => format!("s{channel}"),
        }
    }

    fn make_unsubscribe_payload(&self, channel: &str, data: Option<&Value>) -> String {
        let d = data.cloned().unwrap_or_else(|| Value::Object(Default::default()));
        format!("u{channel}+{}", compact(&d))
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Leaves a field unchanged in a `modify` call when `Unchanged`.
pub enum Patch<T> {
    Unchanged,
    Set(T),
}

impl<T> Patch<T> {
    fn apply(self, target: &mut T) {
        if let Patch::Set(v) = self {
            *target = v;
        }
    }
}

pub struct SubscriptionRecord {
    pub desired: bool,
    pub confirmed: bool,
    pub data: Option<Value>,
    pub needs_confirmation: bool,
    pub processor: Arc<dyn PayloadProcessor>,
}

#[derive(Default)]
pub struct ModifyRequest {
    pub desired: Patch<bool>,
    pub data: Patch<Option<Value>>,
    pub needs_confirmation: Patch<bool>,
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unchanged
    }
}

/// The single source of truth for what must be active after any reconnect
///.
#[derive(Default)]
pub struct SubscriptionRegistry {
    records: DashMap<String, SubscriptionRecord>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, channel: &str) -> bool {
        self.records.get(channel).map(|r| r.confirmed).unwrap_or(false)
    }

    pub fn set_confirmed(&self, channel: &str, confirmed: bool) {
        if let Some(mut record) = self.records.get_mut(channel) {
            record.confirmed = confirmed;
        }
    }

    pub fn remove(&self, channel: &str) {
        self.records.remove(channel);
    }

    pub fn modify(&self, channel: &str, patch: ModifyRequest) -> GatewayResult<()> {
        let mut record = self
            .records
            .get_mut(channel)
            .ok_or_else(|| GatewayError::Protocol(format!("channel {channel} is not registered")))?;
        patch.desired.apply(&mut record.desired);
        patch.data.apply(&mut record.data);
        patch.needs_confirmation.apply(&mut record.needs_confirmation);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record whose subscription is still desired, used
    /// for replay after reconnect.
    pub fn desired_records(&self) -> BTreeMap<String, (Option<Value>, Arc<dyn PayloadProcessor>)> {
        self.records
            .iter()
            .filter(|r| r.desired)
            .map(|r| (r.key().clone(), (r.data.clone(), r.processor.clone())))
            .collect()
    }

    fn reset_unconfirmed(&self, channel: &str) {
        if let Some(mut record) = self.records.get_mut(channel) {
            record.confirmed = false;
        }
    }
}

/// Subscribe/unsubscribe orchestration: builds payloads via the
/// registry's processor, sends them over `outbound`, and waits for
/// confirmation by polling the registry.
pub struct SubscriptionController {
    registry: Arc<SubscriptionRegistry>,
    outbound: kanal::AsyncSender<String>,
    subscription_retries: u64,
    subscription_timeout: Duration,
}

impl SubscriptionController {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        outbound: kanal::AsyncSender<String>,
        subscription_retries: u64,
        subscription_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            outbound,
            subscription_retries,
            subscription_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        data: Option<Value>,
        needs_confirmation: Option<bool>,
        processor: Option<Arc<dyn PayloadProcessor>>,
    ) -> GatewayResult<bool> {
        let channel = channel.into();
        let needs_confirmation = needs_confirmation.unwrap_or(true);
        let processor = processor.unwrap_or_else(|| Arc::new(DefaultPayloadProcessor));

        self.registry.records.insert(
            channel.clone(),
            SubscriptionRecord {
                desired: true,
                confirmed: false,
                data: data.clone(),
                needs_confirmation,
                processor: processor.clone(),
            },
        );

        let payload = processor.make_subscribe_payload(&channel, data.as_ref());
        self.send_until_confirmed_or_exhausted(&channel, payload, needs_confirmation).await
    }

    pub async fn unsubscribe(&self, channel: &str) -> GatewayResult<bool> {
        let (data, processor, needs_confirmation) = match self.registry.records.get(channel) {
            Some(r) => (r.data.clone(), r.processor.clone(), r.needs_confirmation),
            None => return Ok(true),
        };
        self.registry.reset_unconfirmed(channel);
        let payload = processor.make_unsubscribe_payload(channel, data.as_ref());

        let confirmed = self
            .send_until_confirmed_or_exhausted(channel, payload, needs_confirmation)
            .await?;
        if confirmed {
            self.registry.remove(channel);
        }
        Ok(confirmed)
    }

    pub fn modify(&self, channel: &str, patch: ModifyRequest) -> GatewayResult<()> {
        self.registry.modify(channel, patch)
    }

    /// Re-issues subscribe for every desired record using its stored
    /// processor and data. Does not wait for
    /// confirmation — confirmations arrive asynchronously via dispatch.
    pub async fn replay(&self) -> GatewayResult<()> {
        for (channel, (data, processor)) in self.registry.desired_records() {
            self.registry.reset_unconfirmed(&channel);
            let payload = processor.make_subscribe_payload(&channel, data.as_ref());
            self.outbound
                .send(payload)
                .await
                .map_err(|e| GatewayError::Protocol(format!("failed to replay subscription for {channel}: {e}")))?;
        }
        Ok(())
    }

    async fn send_until_confirmed_or_exhausted(
        &self,
        channel: &str,
        payload: String,
        needs_confirmation: bool,
    ) -> GatewayResult<bool> {
        self.outbound
            .send(payload.clone())
            .await
            .map_err(|e| GatewayError::Protocol(format!("failed to send subscription frame for {channel}: {e}")))?;

        if !needs_confirmation {
            return Ok(true);
        }

        let deadline = Instant::now() + self.subscription_timeout;
        let mut retries_used = 0;
        loop {
            if self.registry.is_active(channel) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                break;
            }
            if retries_used < self.subscription_retries {
                retries_used += 1;
                if let Err(e) = self.outbound.send(payload.clone()).await {
                    warn!(target: "ws", "resend of subscription frame for {channel} failed: {e}");
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(50))).await;
        }
        Ok(self.registry.is_active(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_subscribe_payload_with_data() {
        let proc = DefaultPayloadProcessor;
        let data = serde_json::json!({"fields": ["31", "84", "86"]});
        assert_eq!(
            proc.make_subscribe_payload("md+265598", Some(&data)),
            "smd+265598+{\"fields\":[\"31\",\"84\",\"86\"]}"
        );
    }

    #[test]
    fn default_subscribe_payload_without_data() {
        let proc = DefaultPayloadProcessor;
        assert_eq!(proc.make_subscribe_payload("system", None), "ssystem");
    }

    #[test]
    fn default_unsubscribe_payload_defaults_to_empty_object() {
        let proc = DefaultPayloadProcessor;
        assert_eq!(proc.make_unsubscribe_payload("md+265598", None), "umd+265598+{}");
    }

    #[tokio::test]
    async fn subscribe_without_confirmation_returns_true_immediately() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, rx) = kanal::unbounded_async::<String>();
        let controller = SubscriptionController::new(registry.clone(), tx, 2, Duration::from_millis(100));

        let ok = controller
            .subscribe("md+265598", Some(serde_json::json!({"fields": ["31"]})), Some(false), None)
            .await
            .unwrap();
        assert!(ok);
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent, "smd+265598+{\"fields\":[\"31\"]}");
    }

    #[tokio::test]
    async fn subscribe_confirmation_timeout_exhausts_retries_and_returns_false() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, rx) = kanal::unbounded_async::<String>();
        let controller = SubscriptionController::new(registry.clone(), tx, 2, Duration::from_millis(150));

        let ok = controller.subscribe("sd+1234", None, Some(true), None).await.unwrap();
        assert!(!ok);
        assert!(!registry.is_active("sd+1234"));

        let mut frames = vec![];
        while let Ok(frame) = rx.try_recv() {
            match frame {
                Some(f) => frames.push(f),
                None => break,
            }
        }
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f == "ssd+1234"));
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_leaves_registry_empty() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, _rx) = kanal::unbounded_async::<String>();
        let controller = SubscriptionController::new(registry.clone(), tx, 0, Duration::from_millis(50));

        controller.subscribe("md+1", None, Some(false), None).await.unwrap();
        registry.set_confirmed("md+1", true);
        // needs_confirmation=false was stored on the record, so unsubscribe
        // does not wait for a confirmation frame either.
        let ok = controller.unsubscribe("md+1").await.unwrap();
        assert!(ok);
        assert!(registry.is_empty());
    }
}
