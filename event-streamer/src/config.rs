//! Stream configuration.

use crate::error::{Result, StreamError};
use std::str::FromStr;
use std::time::Duration;

/// Which broker client shape the backend adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientShape {
    /// Shared hash-balanced writer plus a pull reader with manual commits.
    #[default]
    SharedWriter,
    /// Synchronous producer plus a managed consumer group delivering claims.
    ManagedGroup,
}

impl FromStr for ClientShape {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shared-writer" => Ok(ClientShape::SharedWriter),
            "managed-group" => Ok(ClientShape::ManagedGroup),
            other => Err(StreamError::Config(format!("unknown client shape '{}'", other))),
        }
    }
}

/// Acknowledgment level a publish waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequiredAcks {
    None,
    Leader,
    /// Every in-sync replica.
    #[default]
    All,
}

impl RequiredAcks {
    /// Value of the `acks` client property.
    pub fn as_config_value(&self) -> &'static str {
        match self {
            RequiredAcks::None => "0",
            RequiredAcks::Leader => "1",
            RequiredAcks::All => "all",
        }
    }
}

/// Where a group starts reading a partition it has no committed position for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

impl StartOffset {
    /// Value of the `auto.offset.reset` client property.
    pub fn as_config_value(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

/// Configuration shared by the publisher and the consumer of one topic.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Comma-separated list of brokers.
    pub brokers: String,

    /// Topic events are published to and consumed from.
    pub topic: String,

    /// Consumer group ID.
    pub group_id: String,

    /// Client shape used to talk to the broker.
    pub client: ClientShape,

    /// Acknowledgment level for publishes.
    pub required_acks: RequiredAcks,

    /// Maximum publish attempts before a transport error is surfaced.
    pub max_attempts: u32,

    /// Initial backoff duration between retries.
    pub initial_backoff: Duration,

    /// Maximum backoff duration between retries.
    pub max_backoff: Duration,

    /// Retries of a failing handler before its position is committed anyway.
    pub handler_retries: u32,

    /// Longest a consumer waits for new data before checking for shutdown.
    pub poll_interval: Duration,

    /// Timeout for a single broker write.
    pub write_timeout: Duration,

    /// Group session timeout.
    pub session_timeout: Duration,

    /// Starting position for partitions without a committed offset.
    pub start_offset: StartOffset,
}

impl StreamConfig {
    /// Creates a new stream configuration.
    ///
    /// # Arguments
    ///
    /// * `brokers` - Comma-separated list of brokers
    /// * `topic` - Topic name
    /// * `group_id` - Consumer group ID
    pub fn new(
        brokers: impl Into<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            group_id: group_id.into(),
            client: ClientShape::default(),
            required_acks: RequiredAcks::default(),
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            handler_retries: 0,
            poll_interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            session_timeout: Duration::from_secs(6),
            start_offset: StartOffset::default(),
        }
    }

    /// Reads the configuration from the environment.
    ///
    /// `EVENTS_BROKERS`, `EVENTS_TOPIC` and `EVENTS_GROUP_ID` fall back to a
    /// local broker and the user events topic; `EVENTS_CLIENT` selects the
    /// client shape (`shared-writer` or `managed-group`).
    pub fn from_env() -> Result<Self> {
        let brokers =
            std::env::var("EVENTS_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let topic = std::env::var("EVENTS_TOPIC").unwrap_or_else(|_| "user-events".to_string());
        let group_id =
            std::env::var("EVENTS_GROUP_ID").unwrap_or_else(|_| "search-ingestor-group".to_string());

        let mut config = Self::new(brokers, topic, group_id);
        if let Ok(client) = std::env::var("EVENTS_CLIENT") {
            config.client = client.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values no backend can work with.
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(StreamError::Config("topic must not be empty".into()));
        }
        if self.group_id.is_empty() {
            return Err(StreamError::Config("group_id must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(StreamError::Config("max_attempts must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(StreamError::Config("poll_interval must be positive".into()));
        }
        Ok(())
    }

    /// Sets the client shape.
    pub fn with_client(mut self, client: ClientShape) -> Self {
        self.client = client;
        self
    }

    /// Sets the acknowledgment level.
    pub fn with_required_acks(mut self, acks: RequiredAcks) -> Self {
        self.required_acks = acks;
        self
    }

    /// Sets the maximum number of publish attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial backoff duration.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Sets the maximum backoff duration.
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    /// Sets how often a failing handler is retried.
    pub fn with_handler_retries(mut self, retries: u32) -> Self {
        self.handler_retries = retries;
        self
    }

    /// Sets the consumer poll interval.
    pub fn with_poll_interval(mut self, duration: Duration) -> Self {
        self.poll_interval = duration;
        self
    }

    /// Sets the starting position for partitions without committed offsets.
    pub fn with_start_offset(mut self, start: StartOffset) -> Self {
        self.start_offset = start;
        self
    }

    /// Backoff before retry number `attempt` (1-based), doubling up to `max_backoff`.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.initial_backoff.saturating_mul(factor), self.max_backoff)
    }
}
