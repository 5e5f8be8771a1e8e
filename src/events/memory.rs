//! Embedded in-process broker.
//!
//! Implements the broker contract without an external service: every
//! consumer group gets its own copy of each message sent after the group
//! first connected; within a group a message goes to one receiver. A
//! received message stays invisible until acknowledged or until its
//! invisible duration expires, after which it is delivered again.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::broker::{
    Broker, BrokerConsumer, BrokerProducer, OutboundMessage, ReceivedMessage, TransportError,
};

/// Timing knobs of the embedded broker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBrokerSettings {
    /// How long `receive` waits for messages before returning an empty batch
    pub await_duration: Duration,

    /// How long a received, unacknowledged message stays hidden
    pub invisible_duration: Duration,
}

impl Default for MemoryBrokerSettings {
    fn default() -> Self {
        Self {
            await_duration: Duration::from_millis(3000),
            invisible_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: Uuid,
    tag: String,
    body: Vec<u8>,
    properties: HashMap<String, String>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct GroupQueue {
    ready: VecDeque<StoredMessage>,
    inflight: HashMap<Uuid, (StoredMessage, Instant)>,
}

impl GroupQueue {
    /// Move expired in-flight messages back to the front of the queue
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .inflight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        for receipt in expired {
            if let Some((message, _)) = self.inflight.remove(&receipt) {
                debug!(message_id = %message.message_id, "Redelivering unacknowledged message");
                self.ready.push_front(message);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    groups: Mutex<HashMap<String, GroupQueue>>,
    notify: Notify,
    receive_failures: AtomicUsize,
    send_failures: AtomicUsize,
}

impl Shared {
    fn groups(&self) -> MutexGuard<'_, HashMap<String, GroupQueue>> {
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consume one injected failure, if any are pending
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-process broker bound to one topic
pub struct InMemoryBroker {
    topic: String,
    settings: MemoryBrokerSettings,
    shared: Arc<Shared>,
    producer_connections: AtomicUsize,
    consumer_connections: AtomicUsize,
}

impl InMemoryBroker {
    pub fn new(topic: impl Into<String>) -> Self {
        Self::with_settings(topic, MemoryBrokerSettings::default())
    }

    pub fn with_settings(topic: impl Into<String>, settings: MemoryBrokerSettings) -> Self {
        Self {
            topic: topic.into(),
            settings,
            shared: Arc::new(Shared::default()),
            producer_connections: AtomicUsize::new(0),
            consumer_connections: AtomicUsize::new(0),
        }
    }

    /// Number of producer connections opened so far
    pub fn producer_connections(&self) -> usize {
        self.producer_connections.load(Ordering::SeqCst)
    }

    /// Number of consumer connections opened so far
    pub fn consumer_connections(&self) -> usize {
        self.consumer_connections.load(Ordering::SeqCst)
    }

    /// Make the next `count` receive calls fail
    pub fn inject_receive_failures(&self, count: usize) {
        self.shared.receive_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Make the next `count` send calls fail
    pub fn inject_send_failures(&self, count: usize) {
        self.shared.send_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Messages waiting or in flight for a consumer group
    pub fn pending(&self, consumer_group: &str) -> usize {
        self.shared
            .groups()
            .get(consumer_group)
            .map(|q| q.ready.len() + q.inflight.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn connect_producer(&self) -> Result<Arc<dyn BrokerProducer>, TransportError> {
        self.producer_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryProducer {
            topic: self.topic.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn connect_consumer(
        &self,
        consumer_group: &str,
    ) -> Result<Arc<dyn BrokerConsumer>, TransportError> {
        self.consumer_connections.fetch_add(1, Ordering::SeqCst);
        self.shared
            .groups()
            .entry(consumer_group.to_string())
            .or_default();

        Ok(Arc::new(MemoryConsumer {
            group: consumer_group.to_string(),
            settings: self.settings,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryProducer {
    topic: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if Shared::take_failure(&self.shared.send_failures) {
            return Err(TransportError::Send("injected send failure".to_string()));
        }
        if message.topic != self.topic {
            return Err(TransportError::Send(format!(
                "unknown topic '{}'",
                message.topic
            )));
        }

        let stored = StoredMessage {
            message_id: Uuid::new_v4(),
            tag: message.tag,
            body: message.body,
            properties: message.properties,
            deliveries: 0,
        };

        {
            let mut groups = self.shared.groups();
            for queue in groups.values_mut() {
                queue.ready.push_back(stored.clone());
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryConsumer {
    group: String,
    settings: MemoryBrokerSettings,
    shared: Arc<Shared>,
}

impl MemoryConsumer {
    fn take_batch(&self, max_messages: usize) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut groups = self.shared.groups();
        let queue = groups.entry(self.group.clone()).or_default();
        queue.requeue_expired(now);

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut message) = queue.ready.pop_front() else {
                break;
            };
            message.deliveries += 1;
            let receipt = Uuid::new_v4();

            batch.push(ReceivedMessage {
                message_id: message.message_id,
                receipt,
                tag: message.tag.clone(),
                body: message.body.clone(),
                properties: message.properties.clone(),
                delivery_attempt: message.deliveries,
            });
            queue
                .inflight
                .insert(receipt, (message, now + self.settings.invisible_duration));
        }
        batch
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn receive(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, TransportError> {
        if Shared::take_failure(&self.shared.receive_failures) {
            return Err(TransportError::Receive("injected receive failure".to_string()));
        }

        let deadline = Instant::now() + self.settings.await_duration;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take_batch(max_messages.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // One last look for redeliveries that expired while waiting
                return Ok(self.take_batch(max_messages.max(1)));
            }
        }
    }

    async fn ack(&self, message: &ReceivedMessage) -> Result<(), TransportError> {
        let mut groups = self.shared.groups();
        let removed = groups
            .get_mut(&self.group)
            .and_then(|queue| queue.inflight.remove(&message.receipt));

        match removed {
            Some(_) => Ok(()),
            None => Err(TransportError::Ack(format!(
                "unknown or expired receipt for message {}",
                message.message_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> MemoryBrokerSettings {
        MemoryBrokerSettings {
            await_duration: Duration::from_millis(50),
            invisible_duration: Duration::from_millis(100),
        }
    }

    fn message(topic: &str, tag: &str) -> OutboundMessage {
        OutboundMessage {
            topic: topic.to_string(),
            tag: tag.to_string(),
            body: tag.as_bytes().to_vec(),
            properties: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_send_receive_ack() {
        let broker = InMemoryBroker::with_settings("events", fast());
        let consumer = broker.connect_consumer("group").await.unwrap();
        let producer = broker.connect_producer().await.unwrap();

        producer.send(message("events", "a")).await.unwrap();
        producer.send(message("events", "b")).await.unwrap();

        let batch = consumer.receive(16).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].tag, "a");
        assert_eq!(batch[1].tag, "b");
        assert_eq!(batch[0].delivery_attempt, 1);

        for m in &batch {
            consumer.ack(m).await.unwrap();
        }
        assert_eq!(broker.pending("group"), 0);
    }

    #[tokio::test]
    async fn test_empty_receive_times_out() {
        let broker = InMemoryBroker::with_settings("events", fast());
        let consumer = broker.connect_consumer("group").await.unwrap();

        let batch = consumer.receive(16).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let broker = InMemoryBroker::with_settings("events", fast());
        let consumer = broker.connect_consumer("group").await.unwrap();
        let producer = broker.connect_producer().await.unwrap();

        producer.send(message("events", "a")).await.unwrap();
        let first = consumer.receive(1).await.unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let second = consumer.receive(1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].delivery_attempt, 2);

        // The stale receipt can no longer be acknowledged
        assert!(consumer.ack(&first[0]).await.is_err());
        consumer.ack(&second[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_groups_each_get_a_copy() {
        let broker = InMemoryBroker::with_settings("events", fast());
        let one = broker.connect_consumer("one").await.unwrap();
        let two = broker.connect_consumer("two").await.unwrap();
        let producer = broker.connect_producer().await.unwrap();

        producer.send(message("events", "a")).await.unwrap();

        assert_eq!(one.receive(16).await.unwrap().len(), 1);
        assert_eq!(two.receive(16).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_topic_rejected() {
        let broker = InMemoryBroker::with_settings("events", fast());
        let producer = broker.connect_producer().await.unwrap();

        let result = producer.send(message("other", "a")).await;
        assert!(matches!(result, Err(TransportError::Send(_))));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = InMemoryBroker::with_settings("events", fast());
        let consumer = broker.connect_consumer("group").await.unwrap();
        let producer = broker.connect_producer().await.unwrap();

        broker.inject_receive_failures(1);
        assert!(consumer.receive(1).await.is_err());
        assert!(consumer.receive(1).await.is_ok());

        broker.inject_send_failures(1);
        assert!(producer.send(message("events", "a")).await.is_err());
        assert!(producer.send(message("events", "a")).await.is_ok());
    }
}
