//! Server-sent event stream of lifecycle events.
//!
//! Frame order per client: `welcome`, a `handshake` message, then every
//! event the bridge forwards while the client stays attached. The client is
//! detached as soon as the response stream is dropped.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::events::SSE_CONNECTED;
use crate::domain::LifecycleEvent;

use super::AppState;

/// Keep-alive comment interval
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    if let Err(e) = state.bridge.ensure_started().await {
        warn!(error = %e, "Event bridge unavailable; stream will only carry local frames");
    }

    let mut subscription = state.channel.attach();
    debug!(subscriber = subscription.id(), "Stream opened");

    // attach() queues the welcome event ahead of anything emitted later
    let welcome = subscription
        .try_recv()
        .unwrap_or_else(LifecycleEvent::welcome);
    let at = Utc::now();

    let publisher = state.publisher.clone();
    tokio::spawn(async move {
        publisher
            .publish_detached(SSE_CONNECTED, json!({ "at": at }))
            .await;
    });

    let head = futures::stream::iter([welcome_frame(&welcome), handshake_frame(at)]);
    let events = subscription.into_stream().map(|event| event_frame(&event));

    Sse::new(head.chain(events).map(Ok::<Event, Infallible>)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}

fn welcome_frame(event: &LifecycleEvent) -> Event {
    Event::default()
        .event(event.event_type.as_str())
        .data(event.payload.to_string())
}

fn handshake_frame(at: DateTime<Utc>) -> Event {
    Event::default()
        .event("message")
        .data(json!({ "type": "handshake", "at": at }).to_string())
}

fn event_frame(event: &LifecycleEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("message").data(data)
}
