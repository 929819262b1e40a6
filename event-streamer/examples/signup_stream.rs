//! Signup events flowing through the in-process broker.
//!
//! This example shows how to:
//! - Connect an `EventStream` with either client shape
//! - Register a handler and start consuming
//! - Publish events keyed by subject ID
//! - Close the consumer
//!
//! To run this example:
//! ```bash
//! cargo run --example signup_stream
//! EVENTS_CLIENT=managed-group cargo run --example signup_stream
//! ```

use event_messages::{Payload, UserEvent};
use event_streamer::{Cluster, Envelope, EventStream, MemoryBroker, StreamConfig};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Handler standing in for search ingestion.
async fn index_user(envelope: Envelope<UserEvent>) -> anyhow::Result<()> {
    let profile: serde_json::Value = envelope.event().payload.to_json()?;
    info!(
        "Indexing user {} published at {}: {}",
        envelope.subject_id(),
        envelope.published_at(),
        profile
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    let config = StreamConfig::from_env()?.with_poll_interval(Duration::from_millis(100));
    info!(
        "Stream config - Topic: {}, Group: {}, Client: {:?}",
        config.topic, config.group_id, config.client
    );

    let stream = EventStream::<UserEvent>::connect(&Cluster::Memory(MemoryBroker::new()), config)?;
    let handle = stream
        .register_handler(index_user)
        .start_consuming(CancellationToken::new())?;

    let publisher = stream.publisher();
    for (id, username) in [(1, "ada"), (2, "grace"), (3, "barbara")] {
        let payload = Payload::from_json(&json!({"id": id, "username": username}))?;
        publisher.publish(UserEvent::new(id, payload)).await?;
        info!("Published signup of '{}'", username);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.close().await?;
    info!("Consumer shut down gracefully");
    Ok(())
}
