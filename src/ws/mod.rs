mod dispatch;
mod engine;
mod ping;
mod queue;
mod state;
mod subscription;

pub use dispatch::UnwrapFn;
pub use engine::{ControlMessage, WsEngine, WsEngineConfig};
pub use queue::QueueHub;
pub use state::{ConnectionHealth, ConnectionState};
pub use subscription::{DefaultPayloadProcessor, ModifyRequest, Patch, PayloadProcessor, SubscriptionController, SubscriptionRegistry};
