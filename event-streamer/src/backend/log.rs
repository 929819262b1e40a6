//! Shared-writer / pull-reader client shape.
//!
//! One hash-balanced writer is shared by every publish. Each consumer owns a
//! reader that joins the group on first fetch, pulls records one at a time
//! and commits positions explicitly once a record has been handled.

use super::{DeliveryTask, EventBackend, HandlerBox, OutgoingRecord, Record, TopicAdmin};
use crate::config::{ClientShape, StreamConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Writer shared by all publishers of a backend.
#[async_trait]
pub trait LogWriter: Send + Sync {
    /// Writes the records, routing each by its key.
    async fn write_messages(&self, records: &[OutgoingRecord]) -> Result<()>;
}

/// Group reader with manual position tracking. Owned by exactly one task.
#[async_trait]
pub trait LogReader: Send {
    /// Waits for the next record of any owned partition.
    ///
    /// Joins the group on first use. Returns `Ok(None)` once `cancel` fires.
    /// Partitions revoked by a rebalance are given up here, so a partition is
    /// only released after the previous record from it was handled.
    async fn fetch_message(&mut self, cancel: &CancellationToken) -> Result<Option<Record>>;

    /// Commits the position just past `record`.
    async fn commit_message(&mut self, record: &Record) -> Result<()>;

    /// Leaves the group and releases the connection.
    async fn close(&mut self) -> Result<()>;
}

/// A broker reachable through the pull-reader shape.
pub trait LogTransport: Send + Sync {
    fn writer(&self, config: &StreamConfig) -> Result<Arc<dyn LogWriter>>;

    fn reader(&self, config: &StreamConfig) -> Result<Box<dyn LogReader>>;

    fn topic_admin(&self) -> Result<Arc<dyn TopicAdmin>>;
}

/// [`EventBackend`] over the pull-reader shape.
pub struct PullBackend {
    transport: Arc<dyn LogTransport>,
    writer: Arc<dyn LogWriter>,
    admin: Arc<dyn TopicAdmin>,
    config: Arc<StreamConfig>,
}

impl PullBackend {
    pub fn new(transport: Arc<dyn LogTransport>, config: Arc<StreamConfig>) -> Result<Self> {
        let writer = transport.writer(&config)?;
        let admin = transport.topic_admin()?;
        Ok(Self {
            transport,
            writer,
            admin,
            config,
        })
    }
}

#[async_trait]
impl EventBackend for PullBackend {
    fn shape(&self) -> ClientShape {
        ClientShape::SharedWriter
    }

    async fn publish(&self, record: &OutgoingRecord) -> Result<()> {
        self.writer
            .write_messages(std::slice::from_ref(record))
            .await
    }

    fn delivery(
        &self,
        dispatch: Arc<HandlerBox>,
        cancel: CancellationToken,
    ) -> Result<DeliveryTask> {
        let reader = self.transport.reader(&self.config)?;
        let config = Arc::clone(&self.config);
        Ok(Box::pin(run_reader(reader, dispatch, config, cancel)))
    }

    fn admin(&self) -> Arc<dyn TopicAdmin> {
        Arc::clone(&self.admin)
    }
}

/// Fetch, dispatch, commit, until cancelled.
async fn run_reader(
    mut reader: Box<dyn LogReader>,
    dispatch: Arc<HandlerBox>,
    config: Arc<StreamConfig>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(
        "Starting pull reader for topic '{}' in group '{}'",
        config.topic, config.group_id
    );
    let mut failures = 0u32;

    loop {
        let record = match reader.fetch_message(&cancel).await {
            Ok(Some(record)) => {
                failures = 0;
                record
            }
            Ok(None) => break,
            Err(e) if e.is_fatal() => {
                error!("Consumer for topic '{}' quit: {}", config.topic, e);
                if let Err(close_err) = reader.close().await {
                    warn!("Failed to close reader: {}", close_err);
                }
                return Err(e);
            }
            Err(e) => {
                failures += 1;
                let backoff = config.backoff(failures);
                warn!(
                    "Error while waiting for a message (attempt {}): {}. Retrying in {:?}",
                    failures, e, backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }
        };

        debug!(
            "Received message from topic '{}' (partition: {}, offset: {})",
            record.topic, record.partition, record.offset
        );

        // Handler failures are logged and the position committed anyway;
        // there is no dead-letter topic.
        if let Err(e) = dispatch(&record.value).await {
            error!(
                "Failed to process message at {}/{}/{}: {}",
                record.topic, record.partition, record.offset, e
            );
        }

        if let Err(e) = reader.commit_message(&record).await {
            error!(
                "Failed to commit offset {} of partition {}: {}",
                record.offset, record.partition, e
            );
        }
    }

    reader.close().await?;
    info!("Pull reader for topic '{}' stopped", config.topic);
    Ok(())
}
