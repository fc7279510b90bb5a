use std::sync::Arc;

use thiserror::Error;

use crate::events::{OutboundEvent, Topic};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("No producer is registered for {0}")]
    NoRoute(Topic),
    #[error("The event channel has closed")]
    ChannelClosed,
    #[error("Could not commit the consumer offset: {0}")]
    CommitFailed(String),
}

/// Anything that can durably hand an [`OutboundEvent`] on to its topic.
///
/// A successful return means the event has been accepted by the transport. Callers rely on this before they
/// acknowledge the inbound message that caused the event.
#[allow(async_fn_in_trait)]
pub trait EventPublisher {
    async fn publish(&self, event: OutboundEvent) -> Result<(), PublishError>;
}

impl<P: EventPublisher> EventPublisher for Arc<P> {
    async fn publish(&self, event: OutboundEvent) -> Result<(), PublishError> {
        self.as_ref().publish(event).await
    }
}
