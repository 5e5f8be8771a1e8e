//! Lifecycle event publisher.
//!
//! Wraps a broker endpoint and lazily opens a single producer connection on
//! first use. Concurrent first publishes share one connection attempt; a
//! failed attempt is not cached, so the next publish retries.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::domain::LifecycleEvent;

use super::broker::{Broker, BrokerProducer, OutboundMessage, TransportError, EVENT_TYPE_PROPERTY};

/// Publishes lifecycle events to the configured topic
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    producer: OnceCell<Arc<dyn BrokerProducer>>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            producer: OnceCell::new(),
        }
    }

    /// Broker endpoint this publisher sends through
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    async fn producer(&self) -> Result<&Arc<dyn BrokerProducer>, TransportError> {
        self.producer
            .get_or_try_init(|| async {
                debug!(topic = self.broker.topic(), "Opening broker producer");
                self.broker.connect_producer().await
            })
            .await
    }

    /// Build and publish an event of the given type
    pub async fn publish(
        &self,
        event_type: &str,
        payload: Value,
    ) -> Result<LifecycleEvent, TransportError> {
        let event = LifecycleEvent::new(event_type, payload);
        self.publish_event(&event).await?;
        Ok(event)
    }

    /// Publish an already-built event
    pub async fn publish_event(&self, event: &LifecycleEvent) -> Result<(), TransportError> {
        let body = event
            .to_bytes()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        let mut properties = HashMap::new();
        properties.insert(EVENT_TYPE_PROPERTY.to_string(), event.event_type.clone());

        let message = OutboundMessage {
            topic: self.broker.topic().to_string(),
            tag: event.event_type.clone(),
            body,
            properties,
        };

        self.producer().await?.send(message).await?;
        debug!(event_type = %event.event_type, event_id = %event.id, "Published event");
        Ok(())
    }

    /// Publish and log failures instead of returning them
    ///
    /// Used where an event is informational and its loss must not change
    /// the caller's outcome.
    pub async fn publish_detached(&self, event_type: &str, payload: Value) {
        if let Err(e) = self.publish(event_type, payload).await {
            warn!(event_type, error = %e, "Failed to publish event");
        }
    }
}
