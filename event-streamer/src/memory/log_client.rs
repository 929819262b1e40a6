use super::{Membership, MemoryBroker};
use crate::backend::log::{LogReader, LogTransport, LogWriter};
use crate::backend::{OutgoingRecord, Record, TopicAdmin};
use crate::config::{StartOffset, StreamConfig};
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hash-balanced writer over a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    broker: MemoryBroker,
}

impl MemoryWriter {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl LogWriter for MemoryWriter {
    async fn write_messages(&self, records: &[OutgoingRecord]) -> Result<()> {
        for record in records {
            self.broker
                .produce(&record.topic, Some(&record.key), record.value.clone())?;
        }
        Ok(())
    }
}

/// Pull reader over a [`MemoryBroker`].
///
/// Rebalances are handled eagerly: when the group generation changes, every
/// owned partition is released before the new assignment is taken up.
pub struct MemoryReader {
    broker: MemoryBroker,
    group_id: String,
    topic: String,
    poll_interval: Duration,
    start_offset: StartOffset,
    membership: Option<Membership>,
    generation: Option<u64>,
    positions: BTreeMap<i32, i64>,
    cursor: usize,
    closed: bool,
}

impl MemoryReader {
    pub fn new(broker: MemoryBroker, config: &StreamConfig) -> Self {
        Self {
            broker,
            group_id: config.group_id.clone(),
            topic: config.topic.clone(),
            poll_interval: config.poll_interval,
            start_offset: config.start_offset,
            membership: None,
            generation: None,
            positions: BTreeMap::new(),
            cursor: 0,
            closed: false,
        }
    }

    /// Brings owned partitions in line with the current assignment.
    fn sync_assignment(&mut self) -> Result<()> {
        if self.membership.is_none() {
            let membership = self
                .broker
                .join_group(&self.group_id, &self.topic)
                .map_err(|e| StreamError::GroupJoin {
                    group: self.group_id.clone(),
                    reason: e.to_string(),
                })?;
            self.membership = Some(membership);
        }
        let Some(membership) = self.membership.as_ref() else {
            return Ok(());
        };

        let Some((generation, assigned)) = membership.assignment() else {
            self.membership = None;
            self.generation = None;
            self.positions.clear();
            return Err(StreamError::Transport(format!(
                "no longer a member of group '{}'",
                self.group_id
            )));
        };

        if self.generation != Some(generation) {
            if self.generation.is_some() {
                debug!(
                    "Group '{}' moved to generation {}, revoking {:?}",
                    self.group_id,
                    generation,
                    self.positions.keys().collect::<Vec<_>>()
                );
            }
            membership.retain_owned(&[]);
            self.positions.clear();
            self.generation = Some(generation);
        }

        for partition in assigned {
            if !self.positions.contains_key(&partition) && membership.acquire(partition) {
                let position = membership.start_position(partition, self.start_offset);
                debug!(
                    "Member '{}' reading partition {} of '{}' from offset {}",
                    membership.member_id(),
                    partition,
                    self.topic,
                    position
                );
                self.positions.insert(partition, position);
            }
        }
        Ok(())
    }

    /// Next unread record, visiting owned partitions in turn.
    fn next_record(&mut self) -> Option<Record> {
        let partitions: Vec<i32> = self.positions.keys().copied().collect();
        for step in 0..partitions.len() {
            let index = (self.cursor + step) % partitions.len();
            let partition = partitions[index];
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            if let Some(record) = self.broker.read(&self.topic, partition, position) {
                self.positions.insert(partition, position + 1);
                self.cursor = index + 1;
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl LogReader for MemoryReader {
    async fn fetch_message(&mut self, cancel: &CancellationToken) -> Result<Option<Record>> {
        if self.closed {
            return Err(StreamError::Shutdown("reader is closed".to_string()));
        }
        let mut changes = self.broker.watch();

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            self.sync_assignment()?;
            if let Some(record) = self.next_record() {
                return Ok(Some(record));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = changes.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn commit_message(&mut self, record: &Record) -> Result<()> {
        match self.membership.as_ref() {
            Some(membership) => membership.commit(record.partition, record.offset + 1),
            None => Err(StreamError::Transport(format!(
                "cannot commit offset {} of partition {}: not in group '{}'",
                record.offset, record.partition, self.group_id
            ))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut membership) = self.membership.take() {
            membership.retain_owned(&[]);
            membership.leave();
            info!("Reader for group '{}' closed", self.group_id);
        }
        self.positions.clear();
        self.closed = true;
        Ok(())
    }
}

impl LogTransport for MemoryBroker {
    fn writer(&self, _config: &StreamConfig) -> Result<Arc<dyn LogWriter>> {
        Ok(Arc::new(MemoryWriter::new(self.clone())))
    }

    fn reader(&self, config: &StreamConfig) -> Result<Box<dyn LogReader>> {
        Ok(Box::new(MemoryReader::new(self.clone(), config)))
    }

    fn topic_admin(&self) -> Result<Arc<dyn TopicAdmin>> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;

    fn config() -> StreamConfig {
        StreamConfig::new("memory", "user-events", "search-ingestor-group")
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn reads_and_commits_in_order() {
        let broker = MemoryBroker::new();
        broker.create_topic("user-events", 1).unwrap();
        let writer = MemoryWriter::new(broker.clone());
        for key in ["1", "1", "1"] {
            writer
                .write_messages(&[OutgoingRecord {
                    topic: "user-events".into(),
                    key: key.into(),
                    value: b"v".to_vec(),
                }])
                .await
                .unwrap();
        }

        let mut reader = MemoryReader::new(broker.clone(), &config());
        let cancel = CancellationToken::new();
        for expected in 0..3 {
            let record = reader.fetch_message(&cancel).await.unwrap().unwrap();
            assert_eq!(record.offset, expected);
            reader.commit_message(&record).await.unwrap();
        }
        assert_eq!(
            broker.committed_offset("search-ingestor-group", "user-events", 0),
            Some(3)
        );
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_none() {
        let broker = MemoryBroker::new();
        let mut reader = MemoryReader::new(broker, &config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(reader.fetch_message(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn join_failure_is_a_group_error() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let mut reader = MemoryReader::new(broker, &config());
        let err = reader
            .fetch_message(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn close_leaves_group_and_is_repeatable() {
        let broker = MemoryBroker::new();
        broker.produce("user-events", Some("7"), b"v".to_vec()).unwrap();
        let mut reader = MemoryReader::new(broker.clone(), &config());
        reader
            .fetch_message(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            broker
                .group_members("search-ingestor-group", "user-events")
                .len(),
            1
        );

        reader.close().await.unwrap();
        reader.close().await.unwrap();
        assert!(broker
            .group_members("search-ingestor-group", "user-events")
            .is_empty());
    }

    #[tokio::test]
    async fn uncommitted_records_are_redelivered() {
        let broker = MemoryBroker::new();
        broker.create_topic("user-events", 1).unwrap();
        broker.produce("user-events", Some("1"), b"a".to_vec()).unwrap();

        let mut first = MemoryReader::new(broker.clone(), &config());
        let record = first
            .fetch_message(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.offset, 0);
        // never committed
        first.close().await.unwrap();

        let mut second = MemoryReader::new(broker, &config());
        let again = second
            .fetch_message(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.offset, 0);
        assert_eq!(again.value, b"a".to_vec());
    }
}
