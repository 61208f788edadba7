//! The queue hub: one unbounded FIFO per topic identifier,
//! created lazily, with non-blocking and blocking reads. Grounded on the
//! `kanal` channel idiom `arkin-ws/src/ws.rs` already uses for inbound
//! frame delivery, keyed here by `Topic` instead of a single stream.

use std::time::Duration;

use dashmap::DashMap;
use kanal::{Receiver, Sender};
use serde_json::Value;

use crate::topics::Topic;

pub struct QueueHub {
    queues: DashMap<Topic, (Sender<Value>, Receiver<Value>)>,
}

impl QueueHub {
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    fn channel_for(&self, topic: Topic) -> (Sender<Value>, Receiver<Value>) {
        self.queues
            .entry(topic)
            .or_insert_with(kanal::unbounded)
            .value()
            .clone()
    }

    /// Appends `item` to `topic`'s queue without blocking. Called by the
    /// dispatcher only.
    pub fn push(&self, topic: Topic, item: Value) {
        let (sender, _) = self.channel_for(topic);
        // Unbounded: send only fails if every receiver has been dropped,
        // which cannot happen while this hub is alive.
        let _ = sender.send(item);
    }

    pub fn is_empty(&self, topic: Topic) -> bool {
        let (_, receiver) = self.channel_for(topic);
        receiver.is_empty()
    }

    /// `block=false` returns `None` immediately if nothing is queued.
    /// `block=true` waits up to `timeout` (`None` = indefinite).
    pub fn get(&self, topic: Topic, block: bool, timeout: Option<Duration>) -> Option<Value> {
        let (_, receiver) = self.channel_for(topic);
        if !block {
            return receiver.try_recv().ok().flatten();
        }
        match timeout {
            Some(t) => receiver.recv_timeout(t).ok(),
            None => receiver.recv().ok(),
        }
    }
}

impl Default for QueueHub {
    fn default() -> Self {
        Self::new()
    }
}
