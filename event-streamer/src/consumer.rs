//! Consumer group coordinator.
//!
//! A [`Consumer`] binds exactly one handler to a stream. Starting it spawns a
//! delivery task that joins the group, decodes every record of the assigned
//! partitions and runs the handler before committing the record's position.
//!
//! Positions are committed whatever the handler returns. Delivery is
//! at-least-once: a consumer that dies between handling and committing gets
//! the record again after a restart. A failing handler is run again up to
//! `handler_retries` more times; if it still fails the record is logged and
//! skipped.

use crate::backend::{EventBackend, HandlerBox};
use crate::config::StreamConfig;
use crate::envelope::Envelope;
use crate::error::{Result, StreamError};
use event_messages::EventMessage;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A consumer with its handler bound, ready to start.
pub struct Consumer<E> {
    backend: Arc<dyn EventBackend>,
    config: Arc<StreamConfig>,
    dispatch: Arc<HandlerBox>,
    _event: PhantomData<fn(E)>,
}

impl<E: EventMessage> Consumer<E> {
    pub(crate) fn new<F, Fut>(
        backend: Arc<dyn EventBackend>,
        config: Arc<StreamConfig>,
        handler: F,
    ) -> Self
    where
        F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let dispatch = Arc::new(dispatcher(handler, Arc::clone(&config)));
        Self {
            backend,
            config,
            dispatch,
            _event: PhantomData,
        }
    }

    /// Starts the delivery task.
    ///
    /// Delivery stops when `cancel` fires, when the returned handle is closed
    /// or dropped, or when the group cannot be joined.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] when called outside a tokio runtime or
    /// when the backend cannot build a broker client.
    pub fn start_consuming(self, cancel: CancellationToken) -> Result<ConsumerHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            StreamError::Config(format!("consumer needs a tokio runtime: {}", e))
        })?;

        let cancel = cancel.child_token();
        let delivery = self.backend.delivery(self.dispatch, cancel.clone())?;
        info!(
            "Starting consumer for topic '{}' in group '{}' ({:?} client)",
            self.config.topic,
            self.config.group_id,
            self.backend.shape()
        );
        let task = runtime.spawn(delivery);

        Ok(ConsumerHandle {
            group_id: self.config.group_id.clone(),
            topic: self.config.topic.clone(),
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

type DispatchFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Wraps a typed handler into a record dispatcher.
fn dispatcher<E, F, Fut>(handler: F, config: Arc<StreamConfig>) -> HandlerBox
where
    E: EventMessage,
    F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Box::new(move |payload: &[u8]| -> DispatchFuture {
        let handler = Arc::clone(&handler);
        let config = Arc::clone(&config);
        let payload = payload.to_vec();
        Box::pin(async move {
            process_with_retry::<E, F, Fut>(handler.as_ref(), &payload, &config).await
        })
    })
}

/// Decodes a record and runs the handler, retrying failures with exponential
/// backoff up to `handler_retries` times.
async fn process_with_retry<E, F, Fut>(
    handler: &F,
    payload: &[u8],
    config: &StreamConfig,
) -> Result<()>
where
    E: EventMessage,
    F: Fn(Envelope<E>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut attempt = 0;

    loop {
        let Some(envelope) = Envelope::<E>::decode(payload)? else {
            debug!("Skipping envelope without a '{}' field", E::FIELD);
            return Ok(());
        };

        match handler(envelope).await {
            Ok(()) => {
                if attempt > 0 {
                    info!("Message processed successfully after {} retries", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.handler_retries {
                    return Err(StreamError::Handler(format!("{:#}", e)));
                }

                let backoff = config.backoff(attempt);
                warn!(
                    "Error processing message (attempt {}/{}): {:#}. Retrying in {:?}",
                    attempt, config.handler_retries, e, backoff
                );
                sleep(backoff).await;
            }
        }
    }
}

/// Lifecycle state of a started consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    Closed,
}

/// Handle to a running consumer.
///
/// Dropping the handle stops delivery without waiting for it.
#[derive(Debug)]
pub struct ConsumerHandle {
    group_id: String,
    topic: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ConsumerHandle {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ConsumerState {
        if self.is_finished() {
            ConsumerState::Closed
        } else {
            ConsumerState::Running
        }
    }

    /// Whether the delivery task is no longer running, either because the
    /// handle was closed or because the task ended on its own.
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Stops delivery and waits for the in-flight handler to finish and the
    /// group to be left.
    ///
    /// The first call returns the outcome of the delivery task, such as
    /// [`StreamError::GroupJoin`] when the group could never be joined. Later
    /// calls do nothing and return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            debug!(
                "Consumer for topic '{}' in group '{}' already closed",
                self.topic, self.group_id
            );
            return Ok(());
        };

        info!(
            "Closing consumer for topic '{}' in group '{}'",
            self.topic, self.group_id
        );
        self.cancel.cancel();
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(StreamError::Shutdown(e.to_string())),
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_messages::{Payload, UserEvent};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn encoded(subject_id: i64) -> Vec<u8> {
        let payload = Payload::from_json(&serde_json::json!({"x": 1})).unwrap();
        Envelope::stamp(UserEvent::new(subject_id, payload))
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn failing_handler_is_retried_then_reported() {
        let config = StreamConfig::new("memory", "user-events", "g")
            .with_handler_retries(2)
            .with_initial_backoff(std::time::Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let dispatch = dispatcher(
            move |_: Envelope<UserEvent>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("index unavailable"))
                }
            },
            Arc::new(config),
        );

        let err = dispatch(&encoded(1)).await.unwrap_err();
        assert!(matches!(err, StreamError::Handler(ref msg) if msg.contains("index unavailable")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_event_kinds_are_skipped() {
        let config = Arc::new(StreamConfig::new("memory", "user-events", "g"));
        let dispatch = dispatcher(
            |_: Envelope<UserEvent>| async { Err::<(), _>(anyhow::anyhow!("must not be called")) },
            config,
        );
        let foreign = br#"{"PublishedAt":"2024-03-01T10:00:00Z","TweetPosted":{"author":1}}"#;
        assert!(dispatch(foreign).await.is_ok());
    }

    #[tokio::test]
    async fn undecodable_records_are_reported() {
        let config = Arc::new(StreamConfig::new("memory", "user-events", "g"));
        let dispatch = dispatcher(|_: Envelope<UserEvent>| async { anyhow::Ok(()) }, config);
        let err = dispatch(b"not json").await.unwrap_err();
        assert!(matches!(err, StreamError::Deserialization(_)));
    }
}
