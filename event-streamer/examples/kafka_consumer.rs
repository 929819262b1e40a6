//! Consuming signup events from a Kafka cluster.
//!
//! To run this example:
//! ```bash
//! EVENTS_BROKERS=localhost:9092 cargo run --features kafka --example kafka_consumer
//! ```
//!
//! Make sure you have a Kafka broker running.

use event_messages::UserEvent;
use event_streamer::{Cluster, Envelope, EventStream, StreamConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

async fn handle_user_event(envelope: Envelope<UserEvent>) -> anyhow::Result<()> {
    info!(
        "User event - Subject: {}, Published: {}, Payload: {} bytes",
        envelope.subject_id(),
        envelope.published_at(),
        envelope.event().payload.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    let config = StreamConfig::from_env()?;
    info!(
        "Consumer config - Brokers: {}, Topic: {}, Group: {}",
        config.brokers, config.topic, config.group_id
    );

    let stream = EventStream::<UserEvent>::connect(&Cluster::Kafka, config)?;
    let cancel = CancellationToken::new();
    let handle = stream
        .register_handler(handle_user_event)
        .start_consuming(cancel.clone())?;

    info!("Starting to consume messages... Press Ctrl+C to stop");
    signal::ctrl_c().await?;
    info!("Received shutdown signal (Ctrl+C)");

    handle.close().await?;
    info!("Consumer shut down gracefully");
    Ok(())
}
