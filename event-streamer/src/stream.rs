//! Entry point tying publisher, consumers and admin to one topic.

use crate::admin::Admin;
use crate::backend::{self, Cluster, EventBackend};
use crate::config::{ClientShape, StreamConfig};
use crate::consumer::Consumer;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::producer::Publisher;
use event_messages::EventMessage;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// A typed event stream over one topic.
///
/// # Example
///
/// ```no_run
/// use event_messages::UserEvent;
/// use event_streamer::{Cluster, EventStream, MemoryBroker, StreamConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = StreamConfig::new("memory", "user-events", "search-ingestor-group");
/// let stream = EventStream::<UserEvent>::connect(&Cluster::Memory(MemoryBroker::new()), config)?;
///
/// let consumer = stream.register_handler(|envelope| async move {
///     println!("user {} signed up", envelope.subject_id());
///     anyhow::Ok(())
/// });
/// let handle = consumer.start_consuming(CancellationToken::new())?;
/// // ...
/// handle.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct EventStream<E> {
    backend: Arc<dyn EventBackend>,
    config: Arc<StreamConfig>,
    publisher: Publisher<E>,
}

impl<E: EventMessage> EventStream<E> {
    /// Connects to `cluster` with the client shape named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`](crate::StreamError::Config) for an
    /// invalid configuration or a client shape the cluster does not offer.
    pub fn connect(cluster: &Cluster, config: StreamConfig) -> Result<Self> {
        let backend = backend::connect(cluster, &config)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Builds a stream over an already connected backend.
    pub fn with_backend(backend: Arc<dyn EventBackend>, config: StreamConfig) -> Self {
        info!(
            "Event stream for topic '{}' using the {:?} client",
            config.topic,
            backend.shape()
        );
        let config = Arc::new(config);
        let publisher = Publisher::new(Arc::clone(&backend), Arc::clone(&config));
        Self {
            backend,
            config,
            publisher,
        }
    }

    /// Publishes an event. See [`Publisher::publish`].
    pub async fn publish(&self, event: E) -> Result<()> {
        self.publisher.publish(event).await
    }

    /// A publisher that can be cloned into other tasks.
    pub fn publisher(&self) -> Publisher<E> {
        self.publisher.clone()
    }

    /// Binds `handler` to a new consumer of the stream's group.
    ///
    /// Each consumer gets its own group membership once started.
    pub fn register_handler<F, Fut>(&self, handler: F) -> Consumer<E>
    where
        F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Consumer::new(Arc::clone(&self.backend), Arc::clone(&self.config), handler)
    }

    pub fn admin(&self) -> Admin {
        Admin::new(self.backend.admin())
    }

    pub fn shape(&self) -> ClientShape {
        self.backend.shape()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}
