//! Inbound frame routing. Grounded on the
//! `Message::Text` match arm in `arkin-ws/src/ws.rs`'s `Handler::run`,
//! generalized from a single typed inbound channel to the topic-keyed
//! queue hub plus the subscription registry's confirmation bookkeeping.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::topics::Topic;
use crate::ws::queue::QueueHub;
use crate::ws::state::SharedState;
use crate::ws::subscription::SubscriptionRegistry;

/// Pure `frame -> frame` transform applied to market-data payloads before
/// they are queued. The concrete field-id mapping
/// is an external collaborator the core does not need to know; callers inject their own or leave it as identity.
pub type UnwrapFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

pub struct Dispatcher {
    queue_hub: Arc<QueueHub>,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<SharedState>,
    unsolicited_channels_to_be_queued: HashSet<Topic>,
    unwrap: Option<UnwrapFn>,
}

impl Dispatcher {
    pub fn new(
        queue_hub: Arc<QueueHub>,
        registry: Arc<SubscriptionRegistry>,
        state: Arc<SharedState>,
        unsolicited_channels_to_be_queued: HashSet<Topic>,
        unwrap: Option<UnwrapFn>,
    ) -> Self {
        Self {
            queue_hub,
            registry,
            state,
            unsolicited_channels_to_be_queued,
            unwrap,
        }
    }

    /// Routes one inbound text frame. Malformed JSON is logged and dropped
    /// rather than propagated — a single bad frame must not tear down the
    /// connection.
    pub fn handle_frame(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "ws", "dropping frame that is not valid JSON: {e}");
                return;
            }
        };

        let topic = value.get("topic").and_then(Value::as_str);

        // Any frame carrying a `message` field is a session/heartbeat frame
        //: record it and let the engine become ready.
        if value.get("message").is_some() {
            self.state.health.record_heartbeat();
            self.state.mark_ready();
        }

        let Some(topic) = topic else {
            return;
        };

        // Receiving any frame for a channel the controller is waiting to
        // confirm is itself the confirmation (the gateway only starts
        // streaming a channel once the subscribe has been accepted).
        self.registry.set_confirmed(topic, true);

        match Topic::from_channel(topic) {
            Some(t) if !t.is_unsolicited() => {
                self.queue_hub.push(t, self.apply_unwrap(t, value));
            }
            Some(t) if self.unsolicited_channels_to_be_queued.contains(&t) => {
                self.queue_hub.push(t, value);
            }
            Some(t) => {
                debug!(target: "ws", "dropping unsolicited frame for {t}, not opted in");
            }
            None => {
                warn!(target: "ws", "dropping frame with unrecognized topic {topic:?}");
            }
        }
    }

    fn apply_unwrap(&self, topic: Topic, value: Value) -> Value {
        if topic == Topic::MarketData {
            if let Some(unwrap) = &self.unwrap {
                return unwrap(value);
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::queue::QueueHub;

    fn dispatcher(unsolicited: HashSet<Topic>, unwrap: Option<UnwrapFn>) -> (Dispatcher, Arc<QueueHub>, Arc<SubscriptionRegistry>, Arc<SharedState>) {
        let queue_hub = Arc::new(QueueHub::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let state = Arc::new(SharedState::new());
        let d = Dispatcher::new(queue_hub.clone(), registry.clone(), state.clone(), unsolicited, unwrap);
        (d, queue_hub, registry, state)
    }

    #[test]
    fn heartbeat_frame_marks_engine_ready_from_connected() {
        let (d, _, _, state) = dispatcher(HashSet::new(), None);
        state.set(crate::ws::state::ConnectionState::Connected);
        d.handle_frame(r#"{"message": "server hi"}"#);
        assert_eq!(state.get(), crate::ws::state::ConnectionState::Ready);
        assert!(state.health.heartbeat_age().is_some());
    }

    #[test]
    fn solicited_frame_is_queued_and_confirms_the_subscription() {
        let (d, queue_hub, registry, _) = dispatcher(HashSet::new(), None);
        d.handle_frame(r#"{"topic": "md+265598", "31": "100.2"}"#);
        assert!(registry.is_active("md+265598"));
        assert!(!queue_hub.is_empty(Topic::MarketData));
    }

    #[test]
    fn unsolicited_frame_dropped_unless_opted_in() {
        let (d, queue_hub, _, _) = dispatcher(HashSet::new(), None);
        d.handle_frame(r#"{"topic": "blt", "text": "maintenance window"}"#);
        assert!(queue_hub.is_empty(Topic::Bulletins));

        let mut opted_in = HashSet::new();
        opted_in.insert(Topic::Bulletins);
        let (d2, queue_hub2, _, _) = dispatcher(opted_in, None);
        d2.handle_frame(r#"{"topic": "blt", "text": "maintenance window"}"#);
        assert!(!queue_hub2.is_empty(Topic::Bulletins));
    }

    #[test]
    fn unwrap_transform_is_applied_only_to_market_data() {
        let unwrap: UnwrapFn = Arc::new(|v| serde_json::json!({"rewrapped": v}));
        let (d, queue_hub, _, _) = dispatcher(HashSet::new(), Some(unwrap));
        d.handle_frame(r#"{"topic": "md+1", "31": "1"}"#);
        let got = queue_hub.get(Topic::MarketData, false, None).unwrap();
        assert!(got.get("rewrapped").is_some());
    }

    #[test]
    fn unrecognized_topic_is_dropped_without_panicking() {
        let (d, _, _, _) = dispatcher(HashSet::new(), None);
        d.handle_frame(r#"{"topic": "zz+1"}"#);
    }

    #[test]
    fn malformed_json_is_dropped_without_panicking() {
        let (d, _, _, _) = dispatcher(HashSet::new(), None);
        d.handle_frame("not json");
    }
}
