mod bus;
mod channel;
mod event_types;
mod hooks;
mod publisher;

pub use bus::{InboundMessage, MessageBus, OffsetCommitter};
pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
pub use publisher::{EventPublisher, PublishError};
