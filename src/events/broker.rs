//! Message broker interface.
//!
//! The broker is a topic-addressed publish/subscribe transport. Producers
//! send tagged byte bodies; consumers pull batches and acknowledge each
//! message individually. Delivery is at-least-once: anything received but
//! not acknowledged is eventually delivered again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Property carrying the lifecycle event type on every message
pub const EVENT_TYPE_PROPERTY: &str = "event-type";

/// A message to publish
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,

    /// Routing tag (the event type)
    pub tag: String,

    pub body: Vec<u8>,

    pub properties: HashMap<String, String>,
}

/// A message pulled from a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Stable across redeliveries
    pub message_id: Uuid,

    /// Handle used to acknowledge this particular delivery
    pub receipt: Uuid,

    pub tag: String,
    pub body: Vec<u8>,
    pub properties: HashMap<String, String>,

    /// 1 on first delivery, incremented on every redelivery
    pub delivery_attempt: u32,
}

/// Broker transport errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Unsupported broker address: {0}")]
    UnsupportedAddress(String),

    #[error("Broker connection failed: {0}")]
    Connect(String),

    #[error("Broker send failed: {0}")]
    Send(String),

    #[error("Broker receive failed: {0}")]
    Receive(String),

    #[error("Broker acknowledgement failed: {0}")]
    Ack(String),

    #[error("Event encoding failed: {0}")]
    Encode(String),
}

/// Sending half of a broker connection
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;
}

/// Receiving half of a broker connection, bound to one consumer group
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Pull up to `max_messages`; may wait for the broker's await duration
    /// and return an empty batch.
    async fn receive(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Acknowledge one delivery
    async fn ack(&self, message: &ReceivedMessage) -> Result<(), TransportError>;
}

/// A broker endpoint able to open producer and consumer connections
#[async_trait]
pub trait Broker: Send + Sync {
    /// Topic this endpoint is bound to
    fn topic(&self) -> &str;

    async fn connect_producer(&self) -> Result<Arc<dyn BrokerProducer>, TransportError>;

    async fn connect_consumer(
        &self,
        consumer_group: &str,
    ) -> Result<Arc<dyn BrokerConsumer>, TransportError>;
}
