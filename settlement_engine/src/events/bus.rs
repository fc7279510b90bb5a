//! An in-process, partitioned message log.
//!
//! Each topic is split into a fixed number of partitions. Messages with the same key always land on the same
//! partition, so their relative order is preserved. Every partition tracks two offsets: the read position of its
//! consumer and the last offset the consumer *committed*. A consumer that fails part way through a message simply
//! does not commit it; rewinding to the committed offset then redelivers it.
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
        MutexGuard,
    },
};

use log::*;
use tokio::sync::Notify;

use crate::events::{EventPublisher, Message, OutboundEvent, PublishError};

/// A message as seen by a consumer, with its position in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub value: Message,
}

/// Acknowledges that a message has been fully processed and must not be redelivered.
#[allow(async_fn_in_trait)]
pub trait OffsetCommitter {
    async fn commit(&self, message: &InboundMessage) -> Result<(), PublishError>;
}

#[derive(Default)]
struct Partition {
    log: Vec<Message>,
    position: u64,
    committed: u64,
}

pub struct MessageBus {
    partitions: usize,
    topics: Mutex<HashMap<String, Vec<Partition>>>,
    arrivals: Notify,
    round_robin: AtomicUsize,
}

impl MessageBus {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Mutex::new(HashMap::new()),
            arrivals: Notify::new(),
            round_robin: AtomicUsize::new(0),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Partition>>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_for(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as usize
            },
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % self.partitions,
        }
    }

    /// Appends a message to the topic. Returns the partition and offset it was written at.
    pub fn produce(&self, topic: &str, key: Option<&str>, message: Message) -> (usize, u64) {
        let partition = self.partition_for(key);
        let offset = {
            let mut topics = self.lock();
            let partitions = topics
                .entry(topic.to_string())
                .or_insert_with(|| (0..self.partitions).map(|_| Partition::default()).collect());
            let log = &mut partitions[partition].log;
            log.push(message);
            (log.len() - 1) as u64
        };
        trace!("🚌️ Message written to {topic}[{partition}] at offset {offset}");
        self.arrivals.notify_waiters();
        (partition, offset)
    }

    /// Returns the next undelivered message on the partition, if there is one, and advances the read position.
    pub fn poll(&self, topic: &str, partition: usize) -> Option<InboundMessage> {
        let mut topics = self.lock();
        let p = topics.get_mut(topic)?.get_mut(partition)?;
        let message = p.log.get(p.position as usize)?.clone();
        let offset = p.position;
        p.position += 1;
        Some(InboundMessage { topic: topic.to_string(), partition, offset, value: message })
    }

    /// Waits for the next message on the partition.
    pub async fn next(&self, topic: &str, partition: usize) -> InboundMessage {
        loop {
            let arrival = self.arrivals.notified();
            if let Some(message) = self.poll(topic, partition) {
                return message;
            }
            arrival.await;
        }
    }

    /// Moves the read position back to the first uncommitted message, so that it is delivered again.
    pub fn rewind_to_committed(&self, topic: &str, partition: usize) {
        let mut topics = self.lock();
        if let Some(p) = topics.get_mut(topic).and_then(|t| t.get_mut(partition)) {
            if p.position != p.committed {
                debug!("🚌️ Rewinding {topic}[{partition}] from offset {} to {}", p.position, p.committed);
            }
            p.position = p.committed;
        }
    }

    /// The offset of the first message on the partition that has not been committed.
    pub fn committed_offset(&self, topic: &str, partition: usize) -> u64 {
        let topics = self.lock();
        topics.get(topic).and_then(|t| t.get(partition)).map(|p| p.committed).unwrap_or(0)
    }

    /// Every message written to the topic, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let topics = self.lock();
        topics.get(topic).map(|t| t.iter().flat_map(|p| p.log.iter().cloned()).collect()).unwrap_or_default()
    }
}

impl OffsetCommitter for MessageBus {
    async fn commit(&self, message: &InboundMessage) -> Result<(), PublishError> {
        let mut topics = self.lock();
        let p = topics.get_mut(&message.topic).and_then(|t| t.get_mut(message.partition)).ok_or_else(|| {
            PublishError::CommitFailed(format!("{}[{}] does not exist", message.topic, message.partition))
        })?;
        p.committed = p.committed.max(message.offset + 1);
        trace!("🚌️ Committed {}[{}] up to offset {}", message.topic, message.partition, p.committed);
        Ok(())
    }
}

impl EventPublisher for MessageBus {
    async fn publish(&self, event: OutboundEvent) -> Result<(), PublishError> {
        self.produce(&event.topic.name(), event.key.as_deref(), event.message);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::events::{EventAction, EventMetadata, EventState, EventType, Headers, MessageContent, MessageMetadata};

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            from: "payeefsp".into(),
            to: "payerfsp".into(),
            content_type: "application/json".into(),
            content: MessageContent { headers: Headers::default(), payload: json!({}), uri_params: None },
            metadata: MessageMetadata {
                correlation_id: None,
                event: EventMetadata {
                    id: format!("event-{id}"),
                    response_to: None,
                    event_type: EventType::Bulk,
                    action: EventAction::BulkCommit,
                    created_at: Utc::now(),
                    state: EventState::success(),
                },
            },
        }
    }

    #[test]
    fn same_key_same_partition() {
        let bus = MessageBus::new(4);
        let (p1, o1) = bus.produce("t", Some("b1"), message("1"));
        let (p2, o2) = bus.produce("t", Some("b1"), message("2"));
        assert_eq!(p1, p2);
        assert_eq!((o1, o2), (0, 1));
        assert_eq!(bus.messages("t").len(), 2);
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered() {
        let bus = MessageBus::new(1);
        bus.produce("t", None, message("1"));
        bus.produce("t", None, message("2"));
        let first = bus.poll("t", 0).unwrap();
        bus.commit(&first).await.unwrap();
        let second = bus.poll("t", 0).unwrap();
        assert_eq!(second.value.id, "2");
        assert!(bus.poll("t", 0).is_none());
        // Consumer dies before committing the second message
        bus.rewind_to_committed("t", 0);
        let again = bus.poll("t", 0).unwrap();
        assert_eq!(again.offset, second.offset);
        assert_eq!(again.value.id, "2");
        assert_eq!(bus.committed_offset("t", 0), 1);
    }

    #[tokio::test]
    async fn next_waits_for_a_message() {
        let bus = std::sync::Arc::new(MessageBus::new(1));
        let consumer = bus.clone();
        let waiter = tokio::spawn(async move { consumer.next("t", 0).await });
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        bus.produce("t", None, message("late"));
        let received = tokio::time::timeout(tokio::time::Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert_eq!(received.value.id, "late");
    }
}
