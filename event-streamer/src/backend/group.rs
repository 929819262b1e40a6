//! Synchronous-producer / managed-group client shape.
//!
//! Publishing waits for the broker to report where the message landed. The
//! consumer side hands partitions to the group client, which runs a session
//! per generation and pushes every claimed partition to a [`ClaimHandler`].

use super::{DeliveryTask, EventBackend, HandlerBox, OutgoingRecord, Record, TopicAdmin};
use crate::config::{ClientShape, StreamConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Producer that blocks until the configured acknowledgment arrives.
#[async_trait]
pub trait SyncProducer: Send + Sync {
    /// Sends one record. Returns the partition and offset it was stored at.
    async fn send_message(&self, record: &OutgoingRecord) -> Result<(i32, i64)>;
}

/// One generation of group membership.
pub trait GroupSession: Send + Sync {
    fn member_id(&self) -> &str;

    fn generation_id(&self) -> u64;

    /// Partitions claimed in this generation.
    fn claims(&self) -> Vec<i32>;

    /// Marks `record` as consumed. Its position is committed for the group.
    fn mark_message(&self, record: &Record);
}

/// The messages of one claimed partition for the length of a session.
pub struct Claim {
    topic: String,
    partition: i32,
    initial_offset: i64,
    messages: mpsc::Receiver<Record>,
    done: CancellationToken,
}

impl Claim {
    pub(crate) fn new(
        topic: &str,
        partition: i32,
        initial_offset: i64,
        messages: mpsc::Receiver<Record>,
        done: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            initial_offset,
            messages,
            done,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn initial_offset(&self) -> i64 {
        self.initial_offset
    }

    /// Next message of the claim, or `None` once the session ends.
    pub async fn next(&mut self) -> Option<Record> {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => None,
            record = self.messages.recv() => record,
        }
    }
}

/// Callbacks run by a managed group for each session.
#[async_trait]
pub trait ClaimHandler: Send + Sync {
    /// Runs once a session starts, before any claim is consumed.
    async fn setup(&self, _session: &dyn GroupSession) -> Result<()> {
        Ok(())
    }

    /// Runs after every claim of the session has been consumed.
    async fn cleanup(&self, _session: &dyn GroupSession) -> Result<()> {
        Ok(())
    }

    /// Consumes one claim until it runs dry.
    async fn consume_claim(&self, session: Arc<dyn GroupSession>, claim: Claim) -> Result<()>;
}

/// Consumer group client that drives [`ClaimHandler`]s.
#[async_trait]
pub trait ConsumerGroup: Send {
    /// Joins the group and runs one session. Returns when the session ends
    /// because of a rebalance or because `cancel` fired; callers loop.
    async fn consume(
        &mut self,
        topic: &str,
        handler: Arc<dyn ClaimHandler>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Leaves the group.
    async fn close(&mut self) -> Result<()>;
}

/// A broker reachable through the managed-group shape.
pub trait GroupTransport: Send + Sync {
    fn producer(&self, config: &StreamConfig) -> Result<Arc<dyn SyncProducer>>;

    fn consumer_group(&self, config: &StreamConfig) -> Result<Box<dyn ConsumerGroup>>;

    fn topic_admin(&self) -> Result<Arc<dyn TopicAdmin>>;
}

/// [`EventBackend`] over the managed-group shape.
pub struct ClaimBackend {
    transport: Arc<dyn GroupTransport>,
    producer: Arc<dyn SyncProducer>,
    admin: Arc<dyn TopicAdmin>,
    config: Arc<StreamConfig>,
}

impl ClaimBackend {
    pub fn new(transport: Arc<dyn GroupTransport>, config: Arc<StreamConfig>) -> Result<Self> {
        let producer = transport.producer(&config)?;
        let admin = transport.topic_admin()?;
        Ok(Self {
            transport,
            producer,
            admin,
            config,
        })
    }
}

#[async_trait]
impl EventBackend for ClaimBackend {
    fn shape(&self) -> ClientShape {
        ClientShape::ManagedGroup
    }

    async fn publish(&self, record: &OutgoingRecord) -> Result<()> {
        let (partition, offset) = self.producer.send_message(record).await?;
        debug!(
            "Message with key '{}' stored in topic '{}' (partition: {}, offset: {})",
            record.key, record.topic, partition, offset
        );
        Ok(())
    }

    fn delivery(
        &self,
        dispatch: Arc<HandlerBox>,
        cancel: CancellationToken,
    ) -> Result<DeliveryTask> {
        let group = self.transport.consumer_group(&self.config)?;
        let handler: Arc<dyn ClaimHandler> = Arc::new(DispatchingHandler { dispatch });
        let config = Arc::clone(&self.config);
        Ok(Box::pin(run_group(group, handler, config, cancel)))
    }

    fn admin(&self) -> Arc<dyn TopicAdmin> {
        Arc::clone(&self.admin)
    }
}

/// Claim handler feeding every message to a dispatcher.
struct DispatchingHandler {
    dispatch: Arc<HandlerBox>,
}

#[async_trait]
impl ClaimHandler for DispatchingHandler {
    async fn setup(&self, session: &dyn GroupSession) -> Result<()> {
        info!(
            "Session of member '{}' started (generation {}, partitions {:?})",
            session.member_id(),
            session.generation_id(),
            session.claims()
        );
        Ok(())
    }

    async fn cleanup(&self, session: &dyn GroupSession) -> Result<()> {
        info!(
            "Session of member '{}' ended (generation {})",
            session.member_id(),
            session.generation_id()
        );
        Ok(())
    }

    async fn consume_claim(&self, session: Arc<dyn GroupSession>, mut claim: Claim) -> Result<()> {
        debug!(
            "Consuming partition {} of '{}' from offset {}",
            claim.partition(),
            claim.topic(),
            claim.initial_offset()
        );
        while let Some(record) = claim.next().await {
            // Marked whatever the handler returned; failures are only logged.
            if let Err(e) = (self.dispatch)(&record.value).await {
                error!(
                    "Failed to process message at {}/{}/{}: {}",
                    record.topic, record.partition, record.offset, e
                );
            }
            session.mark_message(&record);
        }
        Ok(())
    }
}

/// Runs sessions back to back until cancelled.
async fn run_group(
    mut group: Box<dyn ConsumerGroup>,
    handler: Arc<dyn ClaimHandler>,
    config: Arc<StreamConfig>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(
        "Starting consumer group '{}' for topic '{}'",
        config.group_id, config.topic
    );
    let mut failures = 0u32;

    while !cancel.is_cancelled() {
        match group
            .consume(&config.topic, Arc::clone(&handler), &cancel)
            .await
        {
            Ok(()) => failures = 0,
            Err(e) if e.is_fatal() => {
                error!("Consumer group '{}' quit: {}", config.group_id, e);
                if let Err(close_err) = group.close().await {
                    warn!("Failed to close consumer group: {}", close_err);
                }
                return Err(e);
            }
            Err(e) => {
                failures += 1;
                let backoff = config.backoff(failures);
                warn!(
                    "Consumer group '{}' session failed (attempt {}): {}. Retrying in {:?}",
                    config.group_id, failures, e, backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    group.close().await?;
    info!("Consumer group '{}' stopped", config.group_id);
    Ok(())
}
