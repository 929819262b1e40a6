//! Topic administration for setup and teardown tooling.

use crate::backend::{self, Cluster, TopicAdmin};
use crate::config::StreamConfig;
use crate::error::Result;
use std::sync::Arc;
use tracing::{error, info};

/// Creates and deletes topics. Not used on the publish or consume path.
#[derive(Clone)]
pub struct Admin {
    inner: Arc<dyn TopicAdmin>,
}

impl Admin {
    pub(crate) fn new(inner: Arc<dyn TopicAdmin>) -> Self {
        Self { inner }
    }

    /// Connects to the admin API of `cluster` without building a stream.
    pub fn connect(cluster: &Cluster, config: &StreamConfig) -> Result<Self> {
        Ok(Self::new(backend::admin(cluster, config)?))
    }

    /// Creates a topic with the given number of partitions.
    pub async fn create_topic(&self, name: &str, partitions: i32) -> Result<()> {
        info!("Creating topic '{}' with {} partitions", name, partitions);
        self.inner.create_topic(name, partitions).await.map_err(|e| {
            error!("Failed to create topic '{}': {}", name, e);
            e
        })
    }

    /// Deletes a topic and everything stored in it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownTopic`](crate::StreamError::UnknownTopic)
    /// when no such topic exists.
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        info!("Deleting topic '{}'", name);
        self.inner.delete_topic(name).await.map_err(|e| {
            error!("Failed to delete topic '{}': {}", name, e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::memory::MemoryBroker;

    #[tokio::test]
    async fn create_then_delete() {
        let broker = MemoryBroker::new();
        let config = StreamConfig::new("memory", "user-events", "g");
        let admin = Admin::connect(&Cluster::Memory(broker.clone()), &config).unwrap();

        admin.create_topic("user-events", 2).await.unwrap();
        assert_eq!(broker.partition_count("user-events"), Some(2));
        assert!(matches!(
            admin.create_topic("user-events", 2).await,
            Err(StreamError::TopicExists(_))
        ));

        admin.delete_topic("user-events").await.unwrap();
        assert!(broker.topics().is_empty());
        assert!(matches!(
            admin.delete_topic("user-events").await,
            Err(StreamError::UnknownTopic(_))
        ));
    }
}
