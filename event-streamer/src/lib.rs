//! Typed event publishing and consumer-group delivery over partitioned logs.
//!
//! This crate moves domain events between services through a durable,
//! partitioned log with at-least-once delivery to named consumer groups.
//!
//! # Features
//!
//! - Typed publisher with `publish<E: EventMessage>(E)`, keyed by subject ID
//!   so events about one subject stay ordered
//! - One handler per consumer, bound when the consumer is created
//! - Flat JSON envelope stamped with the publish time
//! - Two broker client shapes behind one backend contract, picked by
//!   configuration: a shared writer with pull readers, or a synchronous
//!   producer with a managed consumer group
//! - In-process broker with consumer groups, rebalancing and committed offsets
//! - Kafka through `rdkafka` behind the `kafka` feature
//! - Bounded publish retries with exponential backoff
//! - Graceful shutdown through `CancellationToken` or [`ConsumerHandle::close`]
//! - Integrated tracing
//!
//! # Example
//!
//! ```no_run
//! use event_messages::{Payload, UserEvent};
//! use event_streamer::{Cluster, EventStream, MemoryBroker, StreamConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cluster = Cluster::Memory(MemoryBroker::new());
//!     let config = StreamConfig::new("memory", "user-events", "search-ingestor-group");
//!     let stream = EventStream::<UserEvent>::connect(&cluster, config)?;
//!
//!     let handle = stream
//!         .register_handler(|envelope| async move {
//!             println!("indexing user {}", envelope.subject_id());
//!             anyhow::Ok(())
//!         })
//!         .start_consuming(CancellationToken::new())?;
//!
//!     let payload = Payload::from_json(&serde_json::json!({"username": "ada"}))?;
//!     stream.publish(UserEvent::new(1, payload)).await?;
//!
//!     handle.close().await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod backend;
pub mod config;
pub mod consumer;
pub mod envelope;
mod error;
pub mod memory;
pub mod producer;
mod stream;

pub use admin::Admin;
pub use backend::{Cluster, EventBackend, HandlerBox};
pub use config::{ClientShape, RequiredAcks, StartOffset, StreamConfig};
pub use consumer::{Consumer, ConsumerHandle, ConsumerState};
pub use envelope::Envelope;
pub use error::{Result, StreamError};
pub use memory::{AssignmentStrategy, BrokerOptions, MemoryBroker};
pub use producer::Publisher;
pub use stream::EventStream;

/// Re-export the EventMessage trait for convenience
pub use event_messages::EventMessage;
