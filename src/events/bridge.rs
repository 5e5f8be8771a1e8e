//! Broker-to-stream bridge.
//!
//! A single background task pulls lifecycle events from the broker and
//! emits them on the broadcast channel. It is started lazily through
//! `ensure_started`, keeps running across receive failures, and stops only
//! when `shutdown` cancels it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::CONSUMER_ERROR;
use crate::domain::LifecycleEvent;

use super::broadcast::BroadcastChannel;
use super::broker::{Broker, BrokerConsumer, ReceivedMessage, TransportError};
use super::publisher::EventPublisher;

/// Messages pulled per receive call
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Pause after a failed receive
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Bridge tuning
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub consumer_group: String,
    pub batch_size: usize,
    pub backoff: Duration,
}

impl BridgeSettings {
    pub fn new(consumer_group: impl Into<String>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

#[derive(Debug, Default)]
struct BridgeStats {
    forwarded: AtomicU64,
    receive_errors: AtomicU64,
}

/// Supervised consumer task feeding the broadcast channel
pub struct EventBridge {
    broker: Arc<dyn Broker>,
    channel: BroadcastChannel,
    publisher: Arc<EventPublisher>,
    settings: BridgeSettings,
    cancel: CancellationToken,
    task: OnceCell<Mutex<Option<JoinHandle<()>>>>,
    stats: Arc<BridgeStats>,
}

impl EventBridge {
    pub fn new(
        broker: Arc<dyn Broker>,
        channel: BroadcastChannel,
        publisher: Arc<EventPublisher>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            broker,
            channel,
            publisher,
            settings,
            cancel: CancellationToken::new(),
            task: OnceCell::new(),
            stats: Arc::new(BridgeStats::default()),
        }
    }

    /// Start the consumer task unless it is already running
    ///
    /// Concurrent callers share one start attempt. A failed consumer
    /// connection is returned and leaves the bridge unstarted so a later
    /// call can retry.
    pub async fn ensure_started(&self) -> Result<(), TransportError> {
        self.task
            .get_or_try_init(|| async {
                let consumer = self
                    .broker
                    .connect_consumer(&self.settings.consumer_group)
                    .await?;

                info!(
                    topic = self.broker.topic(),
                    consumer_group = %self.settings.consumer_group,
                    "Event bridge started"
                );

                let pump = Pump {
                    consumer,
                    channel: self.channel.clone(),
                    publisher: Arc::clone(&self.publisher),
                    settings: self.settings.clone(),
                    cancel: self.cancel.clone(),
                    stats: Arc::clone(&self.stats),
                };
                Ok::<_, TransportError>(Mutex::new(Some(tokio::spawn(pump.run()))))
            })
            .await?;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.task.initialized()
    }

    /// Events emitted on the channel so far
    pub fn forwarded(&self) -> u64 {
        self.stats.forwarded.load(Ordering::Relaxed)
    }

    /// Failed receive calls so far
    pub fn receive_errors(&self) -> u64 {
        self.stats.receive_errors.load(Ordering::Relaxed)
    }

    /// Cancel the consumer task and wait for it to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let Some(task) = self.task.get() else {
            return;
        };
        if let Some(handle) = task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Event bridge task ended abnormally");
            }
            info!("Event bridge stopped");
        }
    }
}

struct Pump {
    consumer: Arc<dyn BrokerConsumer>,
    channel: BroadcastChannel,
    publisher: Arc<EventPublisher>,
    settings: BridgeSettings,
    cancel: CancellationToken,
    stats: Arc<BridgeStats>,
}

impl Pump {
    async fn run(self) {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.consumer.receive(self.settings.batch_size) => received,
            };

            match received {
                Ok(batch) => {
                    for message in batch {
                        self.forward(&message).await;
                    }
                }
                Err(e) => {
                    self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Event bridge receive failed");

                    self.publisher
                        .publish_detached(
                            CONSUMER_ERROR,
                            serde_json::json!({ "error": e.to_string() }),
                        )
                        .await;

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.backoff) => {}
                    }
                }
            }
        }
        debug!("Event bridge loop exited");
    }

    async fn forward(&self, message: &ReceivedMessage) {
        match LifecycleEvent::from_bytes(&message.body) {
            Ok(event) => {
                let delivered = self.channel.emit(&event);
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event_type = %event.event_type,
                    delivered,
                    attempt = message.delivery_attempt,
                    "Forwarded event"
                );
            }
            Err(e) => {
                // Acked below so it is not redelivered forever
                warn!(
                    message_id = %message.message_id,
                    tag = %message.tag,
                    error = %e,
                    "Dropping undecodable event"
                );
            }
        }

        if let Err(e) = self.consumer.ack(message).await {
            warn!(message_id = %message.message_id, error = %e, "Failed to acknowledge event");
        }
    }
}
