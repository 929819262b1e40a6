#![allow(dead_code)]

use event_messages::{Payload, UserEvent};
use event_streamer::{ClientShape, Envelope, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const TOPIC: &str = "user-events";
pub const GROUP: &str = "search-ingestor-group";

/// Polls `check` every 300ms for up to 2s.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    wait_within(Duration::from_secs(2), check).await
}

/// Polls `check` every 300ms for up to `timeout`.
pub async fn wait_within<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}

pub fn config(client: ClientShape) -> StreamConfig {
    StreamConfig::new("memory", TOPIC, GROUP)
        .with_client(client)
        .with_poll_interval(Duration::from_millis(50))
        .with_initial_backoff(Duration::from_millis(5))
        .with_max_backoff(Duration::from_millis(20))
}

pub fn user_event(subject_id: i64, payload: serde_json::Value) -> UserEvent {
    UserEvent::new(subject_id, Payload::from_json(&payload).unwrap())
}

/// Envelopes seen by a handler.
pub type Seen = Arc<Mutex<Vec<Envelope<UserEvent>>>>;

pub fn seen() -> Seen {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn count(seen: &Seen) -> usize {
    seen.lock().unwrap().len()
}

/// Handler pushing every envelope into `seen`.
pub fn recorder(
    seen: Seen,
) -> impl Fn(Envelope<UserEvent>) -> std::future::Ready<anyhow::Result<()>> + Send + Sync + 'static
{
    move |envelope| {
        seen.lock().unwrap().push(envelope);
        std::future::ready(Ok(()))
    }
}
