use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::events::{EventHandler, EventProducer, EventPublisher, Handler, OutboundEvent, PublishError, Topic};

/// The producer side of the registered hooks. Events are routed to every hook registered for their topic.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub fulfil_producer: Vec<EventProducer<OutboundEvent>>,
    pub notification_producer: Vec<EventProducer<OutboundEvent>>,
    pub position_producer: Vec<EventProducer<OutboundEvent>>,
}

impl EventProducers {
    fn producers_for(&self, topic: Topic) -> &[EventProducer<OutboundEvent>] {
        match topic {
            Topic::Fulfil => self.fulfil_producer.as_slice(),
            Topic::Notification => self.notification_producer.as_slice(),
            Topic::Position => self.position_producer.as_slice(),
            Topic::BulkFulfil => &[],
        }
    }
}

impl EventPublisher for EventProducers {
    async fn publish(&self, event: OutboundEvent) -> Result<(), PublishError> {
        let producers = self.producers_for(event.topic);
        if producers.is_empty() {
            warn!("📬️ No hook is registered for {}. Message {} cannot be sent", event.topic, event.message.id);
            return Err(PublishError::NoRoute(event.topic));
        }
        for producer in producers {
            trace!("📬️ Publishing {} event for message {}", event.topic, event.message.id);
            producer.publish_event(event.clone()).await?;
        }
        Ok(())
    }
}

pub struct EventHandlers {
    pub on_fulfil: Option<EventHandler<OutboundEvent>>,
    pub on_notification: Option<EventHandler<OutboundEvent>>,
    pub on_position: Option<EventHandler<OutboundEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_fulfil = hooks.on_fulfil.map(|f| EventHandler::new(buffer_size, f));
        let on_notification = hooks.on_notification.map(|f| EventHandler::new(buffer_size, f));
        let on_position = hooks.on_position.map(|f| EventHandler::new(buffer_size, f));
        Self { on_fulfil, on_notification, on_position }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_fulfil {
            result.fulfil_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_notification {
            result.notification_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_position {
            result.position_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        for handler in [self.on_fulfil, self.on_notification, self.on_position].into_iter().flatten() {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_fulfil: Option<Handler<OutboundEvent>>,
    pub on_notification: Option<Handler<OutboundEvent>>,
    pub on_position: Option<Handler<OutboundEvent>>,
}

impl EventHooks {
    pub fn on_fulfil<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OutboundEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_fulfil = Some(Arc::new(f));
        self
    }

    pub fn on_notification<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OutboundEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_notification = Some(Arc::new(f));
        self
    }

    pub fn on_position<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OutboundEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_position = Some(Arc::new(f));
        self
    }
}
