//! Typed event publisher.

use crate::backend::{EventBackend, OutgoingRecord};
use crate::config::StreamConfig;
use crate::envelope::Envelope;
use crate::error::{Result, StreamError};
use event_messages::EventMessage;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Typed event publisher.
///
/// Every publish stamps the event with the current time, encodes the envelope
/// and writes it keyed by the event's subject ID, so events about the same
/// subject keep their order. Transport failures are retried with capped
/// exponential backoff up to `max_attempts`.
///
/// Publishers are cheap to clone and share one broker writer.
///
/// # Example
///
/// ```no_run
/// use event_messages::{Payload, UserEvent};
/// use event_streamer::{Cluster, EventStream, MemoryBroker, StreamConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = StreamConfig::new("memory", "user-events", "search-ingestor-group");
/// let stream = EventStream::<UserEvent>::connect(&Cluster::Memory(MemoryBroker::new()), config)?;
///
/// let payload = Payload::from_json(&serde_json::json!({"username": "ada"}))?;
/// stream.publisher().publish(UserEvent::new(1, payload)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Publisher<E> {
    backend: Arc<dyn EventBackend>,
    config: Arc<StreamConfig>,
    _event: PhantomData<fn(E)>,
}

impl<E> Clone for Publisher<E> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
            _event: PhantomData,
        }
    }
}

impl<E: EventMessage> Publisher<E> {
    pub(crate) fn new(backend: Arc<dyn EventBackend>, config: Arc<StreamConfig>) -> Self {
        Self {
            backend,
            config,
            _event: PhantomData,
        }
    }

    /// Publishes an event and waits for the broker to accept it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Serialization`] if the envelope cannot be
    /// encoded, and [`StreamError::Transport`] once every attempt failed.
    pub async fn publish(&self, event: E) -> Result<()> {
        let envelope = Envelope::stamp(event);
        let record = OutgoingRecord {
            topic: self.config.topic.clone(),
            key: envelope.partition_key(),
            value: envelope.encode()?,
        };

        debug!(
            "Publishing {} for subject {} to topic '{}' ({} bytes)",
            E::FIELD,
            record.key,
            record.topic,
            record.value.len()
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.publish(&record).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("Event published after {} attempts", attempt);
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        "Failed to publish to topic '{}' (attempt {}/{}): {}. Retrying in {:?}",
                        record.topic, attempt, self.config.max_attempts, e, backoff
                    );
                    sleep(backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        "Failed to publish to topic '{}' after {} attempts: {}",
                        record.topic, attempt, e
                    );
                    return Err(StreamError::Transport(format!(
                        "gave up after {} attempts: {}",
                        attempt, e
                    )));
                }
                Err(e) => {
                    error!("Failed to publish to topic '{}': {}", record.topic, e);
                    return Err(e);
                }
            }
        }
    }
}
