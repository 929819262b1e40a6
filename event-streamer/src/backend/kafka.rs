//! Kafka through `rdkafka`, in the shared-writer / pull-reader shape.
//!
//! The writer is a `FutureProducer` partitioning by FNV-1a of the key, the
//! same hash the in-process broker uses. Readers are `StreamConsumer`s with
//! auto-commit disabled; positions are committed synchronously after each
//! record is handled.

use super::log::{LogReader, LogTransport, LogWriter};
use super::{OutgoingRecord, Record, TopicAdmin};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{CommitMode, Consumer as RdConsumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Connection settings shared by the clients of one stream.
pub struct KafkaTransport {
    brokers: String,
}

impl KafkaTransport {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        if config.brokers.is_empty() {
            return Err(StreamError::Config("brokers must not be empty".into()));
        }
        Ok(Self {
            brokers: config.brokers.clone(),
        })
    }
}

impl LogTransport for KafkaTransport {
    fn writer(&self, config: &StreamConfig) -> Result<Arc<dyn LogWriter>> {
        Ok(Arc::new(KafkaWriter::new(config)?))
    }

    fn reader(&self, config: &StreamConfig) -> Result<Box<dyn LogReader>> {
        Ok(Box::new(KafkaReader::new(config)?))
    }

    fn topic_admin(&self) -> Result<Arc<dyn TopicAdmin>> {
        Ok(Arc::new(KafkaAdmin::from_brokers(&self.brokers)?))
    }
}

/// Shared, key-hashed Kafka writer.
pub struct KafkaWriter {
    inner: FutureProducer,
    write_timeout: Duration,
}

impl KafkaWriter {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        info!("Creating Kafka writer with brokers: {}", config.brokers);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", config.required_acks.as_config_value())
            .set("partitioner", "fnv1a")
            .set("message.timeout.ms", config.write_timeout.as_millis().to_string())
            .create()?;

        Ok(Self {
            inner: producer,
            write_timeout: config.write_timeout,
        })
    }
}

#[async_trait]
impl LogWriter for KafkaWriter {
    async fn write_messages(&self, records: &[OutgoingRecord]) -> Result<()> {
        for record in records {
            let message = FutureRecord::to(&record.topic)
                .key(&record.key)
                .payload(&record.value);

            match self.inner.send(message, self.write_timeout).await {
                Ok((partition, offset)) => {
                    debug!(
                        "Message sent successfully to topic '{}' with key '{}' (partition: {}, offset: {})",
                        record.topic, record.key, partition, offset
                    );
                }
                Err((kafka_err, _msg)) => {
                    error!(
                        "Failed to send message to topic '{}' with key '{}': {}",
                        record.topic, record.key, kafka_err
                    );
                    return Err(StreamError::Kafka(kafka_err));
                }
            }
        }
        Ok(())
    }
}

/// Group reader with manual commits.
pub struct KafkaReader {
    inner: StreamConsumer,
    group_id: String,
    topic: String,
    subscribed: bool,
}

impl KafkaReader {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        info!(
            "Creating Kafka reader with brokers: {}, group: {}",
            config.brokers, config.group_id
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.start_offset.as_config_value())
            .set(
                "session.timeout.ms",
                config.session_timeout.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false")
            .create()?;

        Ok(Self {
            inner: consumer,
            group_id: config.group_id.clone(),
            topic: config.topic.clone(),
            subscribed: false,
        })
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    let timestamp = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key_view::<str>()
            .and_then(|key| key.ok())
            .map(str::to_string),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp,
    }
}

#[async_trait]
impl LogReader for KafkaReader {
    async fn fetch_message(&mut self, cancel: &CancellationToken) -> Result<Option<Record>> {
        if !self.subscribed {
            info!("Subscribing to topic '{}'", self.topic);
            self.inner
                .subscribe(&[self.topic.as_str()])
                .map_err(|e| StreamError::GroupJoin {
                    group: self.group_id.clone(),
                    reason: e.to_string(),
                })?;
            self.subscribed = true;
        }

        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            received = self.inner.recv() => match received {
                Ok(message) => Ok(Some(to_record(&message))),
                Err(e) => Err(StreamError::Kafka(e)),
            },
        }
    }

    async fn commit_message(&mut self, record: &Record) -> Result<()> {
        let mut positions = TopicPartitionList::new();
        positions.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )?;
        self.inner.commit(&positions, CommitMode::Sync)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.subscribed {
            self.inner.unsubscribe();
            self.subscribed = false;
            info!("Reader for group '{}' unsubscribed", self.group_id);
        }
        Ok(())
    }
}

/// Topic administration through the Kafka admin API.
pub struct KafkaAdmin {
    inner: AdminClient<DefaultClientContext>,
}

impl KafkaAdmin {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        Self::from_brokers(&config.brokers)
    }

    fn from_brokers(brokers: &str) -> Result<Self> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()?;
        Ok(Self { inner: admin })
    }
}

#[async_trait]
impl TopicAdmin for KafkaAdmin {
    async fn create_topic(&self, name: &str, partitions: i32) -> Result<()> {
        let topic = NewTopic::new(name, partitions, TopicReplication::Fixed(1));
        let results = self
            .inner
            .create_topics(&[topic], &AdminOptions::new())
            .await?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(StreamError::TopicExists(topic))
                }
                Err((topic, code)) => {
                    return Err(StreamError::Transport(format!(
                        "failed to create topic '{}': {}",
                        topic, code
                    )))
                }
            }
        }
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let results = self
            .inner
            .delete_topics(&[name], &AdminOptions::new())
            .await?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((topic, RDKafkaErrorCode::UnknownTopicOrPartition)) => {
                    return Err(StreamError::UnknownTopic(topic))
                }
                Err((topic, code)) => {
                    return Err(StreamError::Transport(format!(
                        "failed to delete topic '{}': {}",
                        topic, code
                    )))
                }
            }
        }
        Ok(())
    }
}
