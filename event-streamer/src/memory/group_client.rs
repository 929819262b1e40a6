use super::{Membership, MemoryBroker};
use crate::backend::group::{
    Claim, ClaimHandler, ConsumerGroup, GroupSession, GroupTransport, SyncProducer,
};
use crate::backend::{OutgoingRecord, Record, TopicAdmin};
use crate::config::{StartOffset, StreamConfig};
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages buffered per claim ahead of the handler.
const CLAIM_BUFFER: usize = 256;

/// Synchronous producer over a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemorySyncProducer {
    broker: MemoryBroker,
}

impl MemorySyncProducer {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl SyncProducer for MemorySyncProducer {
    async fn send_message(&self, record: &OutgoingRecord) -> Result<(i32, i64)> {
        self.broker
            .produce(&record.topic, Some(&record.key), record.value.clone())
    }
}

struct MemorySession {
    broker: MemoryBroker,
    group_id: String,
    topic: String,
    member_id: String,
    generation: u64,
    claims: Vec<i32>,
}

impl GroupSession for MemorySession {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn generation_id(&self) -> u64 {
        self.generation
    }

    fn claims(&self) -> Vec<i32> {
        self.claims.clone()
    }

    fn mark_message(&self, record: &Record) {
        if let Err(e) = self.broker.commit(
            &self.group_id,
            &self.topic,
            &self.member_id,
            record.partition,
            record.offset + 1,
        ) {
            warn!(
                "Failed to mark offset {} of partition {}: {}",
                record.offset, record.partition, e
            );
        }
    }
}

/// Managed consumer group over a [`MemoryBroker`].
///
/// Each call to [`ConsumerGroup::consume`] runs one session: it waits until
/// every assigned partition has been let go by its previous owner, starts a
/// claim per partition and returns once the group generation moves on.
pub struct MemoryConsumerGroup {
    broker: MemoryBroker,
    group_id: String,
    poll_interval: Duration,
    start_offset: StartOffset,
    membership: Option<Membership>,
    closed: bool,
}

impl MemoryConsumerGroup {
    pub fn new(broker: MemoryBroker, config: &StreamConfig) -> Self {
        Self {
            broker,
            group_id: config.group_id.clone(),
            poll_interval: config.poll_interval,
            start_offset: config.start_offset,
            membership: None,
            closed: false,
        }
    }

    fn join(&mut self, topic: &str) -> Result<()> {
        if self.membership.is_none() {
            let membership = self.broker.join_group(&self.group_id, topic).map_err(|e| {
                StreamError::GroupJoin {
                    group: self.group_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            self.membership = Some(membership);
        }
        Ok(())
    }
}

#[async_trait]
impl ConsumerGroup for MemoryConsumerGroup {
    async fn consume(
        &mut self,
        topic: &str,
        handler: Arc<dyn ClaimHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.closed {
            return Err(StreamError::Shutdown("consumer group is closed".to_string()));
        }
        self.join(topic)?;
        let Some(membership) = self.membership.as_ref() else {
            return Ok(());
        };
        let mut changes = self.broker.watch();

        let claimed = loop {
            let Some((generation, assigned)) = membership.assignment() else {
                break None;
            };
            membership.retain_owned(&assigned);
            if assigned.iter().all(|partition| membership.acquire(*partition)) {
                break Some((generation, assigned));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = changes.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };
        let Some((generation, claims)) = claimed else {
            self.membership = None;
            return Err(StreamError::Transport(format!(
                "no longer a member of group '{}'",
                self.group_id
            )));
        };

        let session = Arc::new(MemorySession {
            broker: self.broker.clone(),
            group_id: self.group_id.clone(),
            topic: topic.to_string(),
            member_id: membership.member_id().to_string(),
            generation,
            claims: claims.clone(),
        });
        handler.setup(session.as_ref()).await?;

        let done = cancel.child_token();
        let mut tasks = JoinSet::new();
        for partition in claims {
            let start = membership.start_position(partition, self.start_offset);
            let (sender, receiver) = mpsc::channel(CLAIM_BUFFER);
            tasks.spawn(feed_claim(
                self.broker.clone(),
                topic.to_string(),
                partition,
                start,
                sender,
                done.clone(),
                self.poll_interval,
            ));

            let claim = Claim::new(topic, partition, start, receiver, done.clone());
            let handler = Arc::clone(&handler);
            let session: Arc<dyn GroupSession> = session.clone();
            tasks.spawn(async move { handler.consume_claim(session, claim).await });
        }

        loop {
            let current = membership.assignment().map(|(generation, _)| generation);
            if current != Some(generation) {
                debug!(
                    "Generation {} of group '{}' is over",
                    generation, self.group_id
                );
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = changes.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        done.cancel();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Claim of group '{}' failed: {}", self.group_id, e),
                Err(e) => error!("Claim task of group '{}' panicked: {}", self.group_id, e),
            }
        }
        handler.cleanup(session.as_ref()).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut membership) = self.membership.take() {
            membership.retain_owned(&[]);
            membership.leave();
            info!("Consumer group '{}' closed", self.group_id);
        }
        self.closed = true;
        Ok(())
    }
}

/// Copies a partition into its claim until the session ends.
async fn feed_claim(
    broker: MemoryBroker,
    topic: String,
    partition: i32,
    mut position: i64,
    sender: mpsc::Sender<Record>,
    done: CancellationToken,
    poll_interval: Duration,
) -> Result<()> {
    let mut changes = broker.watch();
    loop {
        while let Some(record) = broker.read(&topic, partition, position) {
            position += 1;
            tokio::select! {
                biased;
                _ = done.cancelled() => return Ok(()),
                sent = sender.send(record) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        tokio::select! {
            _ = done.cancelled() => return Ok(()),
            _ = changes.changed() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

impl GroupTransport for MemoryBroker {
    fn producer(&self, _config: &StreamConfig) -> Result<Arc<dyn SyncProducer>> {
        Ok(Arc::new(MemorySyncProducer::new(self.clone())))
    }

    fn consumer_group(&self, config: &StreamConfig) -> Result<Box<dyn ConsumerGroup>> {
        Ok(Box::new(MemoryConsumerGroup::new(self.clone(), config)))
    }

    fn topic_admin(&self) -> Result<Arc<dyn TopicAdmin>> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect {
        seen: Mutex<Vec<(i32, i64)>>,
    }

    #[async_trait]
    impl ClaimHandler for Collect {
        async fn consume_claim(&self, session: Arc<dyn GroupSession>, mut claim: Claim) -> Result<()> {
            while let Some(record) = claim.next().await {
                self.seen
                    .lock()
                    .unwrap()
                    .push((record.partition, record.offset));
                session.mark_message(&record);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn sync_producer_reports_position() {
        let broker = MemoryBroker::new();
        broker.create_topic("user-events", 2).unwrap();
        let producer = MemorySyncProducer::new(broker);
        let record = OutgoingRecord {
            topic: "user-events".into(),
            key: "42".into(),
            value: b"v".to_vec(),
        };
        let (partition, first) = producer.send_message(&record).await.unwrap();
        let (same, second) = producer.send_message(&record).await.unwrap();
        assert_eq!(partition, same);
        assert_eq!((first, second), (0, 1));
    }

    #[tokio::test]
    async fn session_marks_consumed_messages() {
        let broker = MemoryBroker::new();
        broker.create_topic("user-events", 1).unwrap();
        broker.produce("user-events", Some("1"), b"a".to_vec()).unwrap();
        broker.produce("user-events", Some("1"), b"b".to_vec()).unwrap();

        let config = StreamConfig::new("memory", "user-events", "g")
            .with_poll_interval(Duration::from_millis(10));
        let mut group = MemoryConsumerGroup::new(broker.clone(), &config);
        let handler = Arc::new(Collect {
            seen: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        let watcher = broker.clone();
        tokio::spawn(async move {
            while watcher.committed_offset("g", "user-events", 0) != Some(2) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stopper.cancel();
        });

        group
            .consume("user-events", handler.clone(), &cancel)
            .await
            .unwrap();
        group.close().await.unwrap();

        assert_eq!(*handler.seen.lock().unwrap(), vec![(0, 0), (0, 1)]);
        assert!(broker.group_members("g", "user-events").is_empty());
    }

    #[tokio::test]
    async fn closed_group_refuses_sessions() {
        let broker = MemoryBroker::new();
        let config = StreamConfig::new("memory", "user-events", "g");
        let mut group = MemoryConsumerGroup::new(broker, &config);
        group.close().await.unwrap();
        let handler = Arc::new(Collect {
            seen: Mutex::new(Vec::new()),
        });
        let err = group
            .consume("user-events", handler, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Shutdown(_)));
    }
}
