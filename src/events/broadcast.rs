//! Fan-out of lifecycle events to attached stream clients.
//!
//! Each client owns a bounded queue. Emission never blocks: a client whose
//! queue is full misses that event, a client whose receiver is gone is
//! removed during the same emission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

use crate::domain::LifecycleEvent;

/// Queue depth per attached client
pub const DEFAULT_SINK_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Registry {
    next_id: AtomicU64,
    sinks: Mutex<HashMap<u64, mpsc::Sender<LifecycleEvent>>>,
}

impl Registry {
    fn sinks(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<LifecycleEvent>>> {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn detach(&self, id: u64) {
        if self.sinks().remove(&id).is_some() {
            debug!(subscriber = id, "Stream client detached");
        }
    }
}

/// Registry of attached stream clients
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    registry: Arc<Registry>,
    capacity: usize,
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SINK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            capacity: capacity.max(1),
        }
    }

    /// Register a client; its first queued event is `welcome`
    pub fn attach(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        // Fresh queue with capacity >= 1, so this cannot be full
        let _ = sender.try_send(LifecycleEvent::welcome());

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.sinks().insert(id, sender);
        debug!(subscriber = id, "Stream client attached");

        Subscription {
            id,
            receiver,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Deliver an event to every attached client, returning how many got it
    pub fn emit(&self, event: &LifecycleEvent) -> usize {
        let mut delivered = 0;
        self.registry
            .sinks()
            .retain(|id, sink| match sink.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = *id,
                        event_type = %event.event_type,
                        "Stream client queue full, dropping event"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = *id, "Removing closed stream client");
                    false
                }
            });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.sinks().len()
    }
}

/// An attached client; dropping it detaches the client
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<LifecycleEvent>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the channel has been torn down
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Turn the subscription into a stream of events
    pub fn into_stream(self) -> impl Stream<Item = LifecycleEvent> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.detach(self.id);
    }
}
