//! Error types for the event streaming library.

use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while publishing or consuming events.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The broker could not be reached or rejected a write.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error encoding an envelope. Never retried.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error decoding a consumed record.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Error returned by a registered handler.
    #[error("Handler error: {0}")]
    Handler(String),

    /// The consumer could not join its group. Terminal for the handle.
    #[error("Failed to join consumer group '{group}': {reason}")]
    GroupJoin { group: String, reason: String },

    /// The named topic does not exist.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// A topic with that name already exists.
    #[error("Topic already exists: {0}")]
    TopicExists(String),

    /// Invalid or unsupported configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error during consumer shutdown.
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Error from the underlying rdkafka library.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl StreamError {
    /// Whether the operation may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport(_) => true,
            #[cfg(feature = "kafka")]
            StreamError::Kafka(e) => e.rdkafka_error_code().is_some_and(is_transient),
            _ => false,
        }
    }

    /// Whether the error ends a consumer's lifecycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::GroupJoin { .. } | StreamError::Config(_))
    }
}

/// Broker error codes that clear up on their own.
#[cfg(feature = "kafka")]
fn is_transient(code: rdkafka::types::RDKafkaErrorCode) -> bool {
    use rdkafka::types::RDKafkaErrorCode::*;

    matches!(
        code,
        QueueFull
            | MessageTimedOut
            | OperationTimedOut
            | RequestTimedOut
            | BrokerTransportFailure
            | AllBrokersDown
            | BrokerNotAvailable
            | NetworkException
            | LeaderNotAvailable
            | NotLeaderForPartition
            | NotEnoughReplicas
            | NotEnoughReplicasAfterAppend
            | CoordinatorLoadInProgress
            | CoordinatorNotAvailable
            | NotCoordinator
    )
}
