//! Backend adapter.
//!
//! Brokers are reached through one of two client shapes:
//!
//! - [`log`]: a shared, hash-balanced writer and a pull reader that tracks
//!   and commits positions itself;
//! - [`group`]: a synchronous producer and a managed consumer group that
//!   pushes each claimed partition to a callback.
//!
//! [`connect`] picks the shape named by [`StreamConfig::client`] and wraps it
//! in an [`EventBackend`], the single surface the publisher and the consumer
//! group coordinator work against.

pub mod group;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod log;

use crate::config::{ClientShape, StreamConfig};
use crate::error::Result;
use crate::memory::MemoryBroker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Type alias for the record dispatcher a consumer hands to the backend.
///
/// Dispatchers take a raw record value, decode it and run the registered
/// handler.
pub type HandlerBox = Box<
    dyn Fn(&[u8]) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync,
>;

/// A running delivery loop, spawned by the consumer.
pub type DeliveryTask = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A message read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// A message on its way to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
}

/// Topic administration, for setup and teardown tooling.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn create_topic(&self, name: &str, partitions: i32) -> Result<()>;

    /// Deletes a topic. Unknown topics are an error.
    async fn delete_topic(&self, name: &str) -> Result<()>;
}

/// The uniform contract both client shapes are adapted to.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// The client shape behind this backend.
    fn shape(&self) -> ClientShape;

    /// Writes one record and waits for the configured acknowledgment.
    async fn publish(&self, record: &OutgoingRecord) -> Result<()>;

    /// Builds a delivery loop feeding every consumed record to `dispatch`
    /// until `cancel` fires. The loop owns its own broker client.
    fn delivery(&self, dispatch: Arc<HandlerBox>, cancel: CancellationToken)
        -> Result<DeliveryTask>;

    fn admin(&self) -> Arc<dyn TopicAdmin>;
}

/// The broker a stream talks to.
#[derive(Debug, Clone)]
pub enum Cluster {
    /// An in-process broker.
    Memory(MemoryBroker),
    /// A Kafka cluster reached through `StreamConfig::brokers`.
    #[cfg(feature = "kafka")]
    Kafka,
}

/// Builds the backend for `cluster` with the client shape the configuration
/// asks for.
pub fn connect(cluster: &Cluster, config: &StreamConfig) -> Result<Arc<dyn EventBackend>> {
    config.validate()?;
    let config = Arc::new(config.clone());

    match (cluster, config.client) {
        (Cluster::Memory(broker), ClientShape::SharedWriter) => {
            let backend = log::PullBackend::new(Arc::new(broker.clone()), config)?;
            Ok(Arc::new(backend))
        }
        (Cluster::Memory(broker), ClientShape::ManagedGroup) => {
            let backend = group::ClaimBackend::new(Arc::new(broker.clone()), config)?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "kafka")]
        (Cluster::Kafka, ClientShape::SharedWriter) => {
            let transport = kafka::KafkaTransport::new(&config)?;
            let backend = log::PullBackend::new(Arc::new(transport), config)?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "kafka")]
        (Cluster::Kafka, ClientShape::ManagedGroup) => Err(crate::error::StreamError::Config(
            "the managed-group client is only available for the in-process broker".to_string(),
        )),
    }
}

/// Topic administration for `cluster`, without building a full stream.
#[cfg_attr(not(feature = "kafka"), allow(unused_variables))]
pub fn admin(cluster: &Cluster, config: &StreamConfig) -> Result<Arc<dyn TopicAdmin>> {
    match cluster {
        Cluster::Memory(broker) => Ok(Arc::new(broker.clone())),
        #[cfg(feature = "kafka")]
        Cluster::Kafka => Ok(Arc::new(kafka::KafkaAdmin::new(config)?)),
    }
}
