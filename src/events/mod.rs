//! Event transport: broker, publisher, bridge and stream fan-out.
//!
//! Pipeline events flow publisher -> broker -> bridge -> broadcast channel ->
//! stream clients. Nothing here knows about HTTP.

pub mod bridge;
pub mod broadcast;
pub mod broker;
pub mod memory;
pub mod publisher;

use std::sync::Arc;

use crate::config::BrokerConfig;

pub use bridge::{BridgeSettings, EventBridge};
pub use broadcast::{BroadcastChannel, Subscription};
pub use broker::{
    Broker, BrokerConsumer, BrokerProducer, OutboundMessage, ReceivedMessage, TransportError,
};
pub use memory::{InMemoryBroker, MemoryBrokerSettings};
pub use publisher::EventPublisher;

/// Address scheme of the embedded broker
pub const MEMORY_SCHEME: &str = "memory://";

/// Open the broker named by the configured address
pub fn connect_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>, TransportError> {
    if config.address.starts_with(MEMORY_SCHEME) {
        return Ok(Arc::new(InMemoryBroker::new(config.topic.clone())));
    }

    Err(TransportError::UnsupportedAddress(config.address.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_memory_broker() {
        let broker = connect_broker(&BrokerConfig::default()).unwrap();
        assert_eq!(broker.topic(), "umca-events");
    }

    #[test]
    fn test_unsupported_address() {
        let config = BrokerConfig {
            address: "10.0.0.5:8081".to_string(),
            ..BrokerConfig::default()
        };
        assert!(matches!(
            connect_broker(&config),
            Err(TransportError::UnsupportedAddress(_))
        ));
    }
}
