//! Queue listener.
//!
//! Polls one queue and hands each decoded message to a handler, strictly one
//! at a time, in the order the store returned them. The loop survives
//! handler failures and store errors. It ends only on [`QueueListener::stop_listen`]
//! or, under [`DeserializeFailurePolicy::Halt`], on an undecodable message.

use crate::error::{ListenerError, QueueError};
use crate::ports::{DurableQueueStore, QueuedMessage};
use async_trait::async_trait;
use br_01_serializer::{Serializer, SerializerError, WireMessage};
use broker_telemetry::{log_event, metrics::QUEUE_MESSAGES};
use std::future::Future;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What to do with a message that fails to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeserializeFailurePolicy {
    /// Move it to the poison queue and continue.
    #[default]
    DeadLetter,
    /// Log, delete and continue.
    SkipAndLog,
    /// Stop the listener and leave the message queued.
    Halt,
}

impl FromStr for DeserializeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dead_letter" | "deadletter" => Ok(Self::DeadLetter),
            "skip" | "skip_and_log" => Ok(Self::SkipAndLog),
            "halt" => Ok(Self::Halt),
            other => Err(format!("unknown deserialize failure policy: {}", other)),
        }
    }
}

/// Listener tuning.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Delay between polls that returned nothing.
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Deliveries after which a message is dead-lettered unhandled.
    pub max_delivery_attempts: u32,
    pub deserialize_failure_policy: DeserializeFailurePolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 10,
            max_delivery_attempts: 5,
            deserialize_failure_policy: DeserializeFailurePolicy::DeadLetter,
        }
    }
}

/// A handler rejected a message. The message will be redelivered.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerFailure(pub String);

impl HandlerFailure {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

pub type HandlerResult = Result<(), HandlerFailure>;

/// Callback invoked per decoded message.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, item: T) -> HandlerResult;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
pub fn handler_fn<T, F, Fut>(f: F) -> Arc<dyn MessageHandler<T>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, item: T) -> HandlerResult {
        (self.0)(item).await
    }
}

/// Listener counters.
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub received: AtomicU64,
    pub handled: AtomicU64,
    pub handler_failures: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub skipped: AtomicU64,
}

/// Polling consumer for one queue.
pub struct QueueListener<T> {
    store: Arc<dyn DurableQueueStore>,
    dead_letter: Option<Arc<dyn DurableQueueStore>>,
    serializer: Serializer,
    config: ListenerConfig,
    should_listen: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    stop: CancellationToken,
    stats: ListenerStats,
    _marker: PhantomData<fn() -> T>,
}

impl<T: WireMessage> QueueListener<T> {
    pub fn new(store: Arc<dyn DurableQueueStore>, serializer: Serializer, config: ListenerConfig) -> Self {
        Self {
            store,
            dead_letter: None,
            serializer,
            config,
            should_listen: None,
            stop: CancellationToken::new(),
            stats: ListenerStats::default(),
            _marker: PhantomData,
        }
    }

    /// Poison queue for dead-lettered messages.
    pub fn with_dead_letter(mut self, store: Arc<dyn DurableQueueStore>) -> Self {
        self.dead_letter = Some(store);
        self
    }

    /// Poll only while `predicate` holds. The loop idles otherwise.
    pub fn with_should_listen(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.should_listen = Some(Arc::new(predicate));
        self
    }

    pub fn queue_name(&self) -> &str {
        self.store.name()
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Spawn [`listen`](Self::listen) on the runtime.
    ///
    /// A halted listener logs the reason and reports it through the handle.
    pub fn start_listen(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> JoinHandle<Result<(), ListenerError>> {
        let listener = Arc::clone(self);
        tokio::spawn(async move {
            let result = listener.listen(handler).await;
            if let Err(e) = &result {
                log_event!(error, "queue", "Listener stopped with error", queue = %listener.queue_name(), error = %e);
            }
            result
        })
    }

    /// Stop at the next poll boundary.
    pub fn stop_listen(&self) {
        self.stop.cancel();
    }

    /// Run the polling loop until stopped.
    pub async fn listen(&self, handler: Arc<dyn MessageHandler<T>>) -> Result<(), ListenerError> {
        log_event!(info, "queue", "Listener started", queue = %self.queue_name());

        while !self.stop.is_cancelled() {
            let listening = self.should_listen.as_ref().map_or(true, |p| p());

            let processed = if listening {
                match self.poll_once(handler.as_ref()).await {
                    Ok(n) => n,
                    Err(PollError::Halt(e)) => return Err(e),
                    Err(PollError::Store(e)) => {
                        log_event!(warn, "queue", "Queue poll failed", queue = %self.queue_name(), error = %e);
                        0
                    }
                }
            } else {
                0
            };

            if processed == 0 {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        log_event!(info, "queue", "Listener stopped", queue = %self.queue_name());
        Ok(())
    }

    /// One poll cycle. Returns how many messages were taken off the queue.
    async fn poll_once(&self, handler: &dyn MessageHandler<T>) -> Result<usize, PollError> {
        self.store.create_if_not_exists().await?;
        let batch = self.store.dequeue_batch(self.config.batch_size).await?;
        let count = batch.len();

        for message in batch {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            QUEUE_MESSAGES
                .with_label_values(&[self.store.name(), "read"])
                .inc();
            self.process(message, handler).await?;
        }
        Ok(count)
    }

    async fn process(&self, message: QueuedMessage, handler: &dyn MessageHandler<T>) -> Result<(), PollError> {
        if message.dequeue_count > self.config.max_delivery_attempts {
            self.dead_letter(&message, "delivery attempts exceeded").await;
            return Ok(());
        }

        let item = match self.serializer.deserialize::<T>(&message.payload) {
            Ok(item) => item,
            Err(e) => return self.on_deserialize_failure(&message, e).await,
        };

        match handler.handle(item).await {
            Ok(()) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                self.delete(&message).await;
            }
            Err(e) => {
                // Lease expiry brings the message back.
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                log_event!(
                    warn,
                    "queue",
                    "Handler failed; message left for redelivery",
                    queue = %self.queue_name(),
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    error = %e
                );
            }
        }
        Ok(())
    }

    async fn on_deserialize_failure(&self, message: &QueuedMessage, error: SerializerError) -> Result<(), PollError> {
        QUEUE_MESSAGES
            .with_label_values(&[self.store.name(), "deserialize_failed"])
            .inc();

        match self.config.deserialize_failure_policy {
            DeserializeFailurePolicy::DeadLetter => {
                self.dead_letter(message, &error.to_string()).await;
                Ok(())
            }
            DeserializeFailurePolicy::SkipAndLog => {
                log_event!(error, "queue", "Dropping undecodable message", queue = %self.queue_name(), message_id = %message.id, error = %error);
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                self.delete(message).await;
                Ok(())
            }
            DeserializeFailurePolicy::Halt => Err(PollError::Halt(ListenerError::Halted {
                queue: self.queue_name().to_string(),
                message_id: message.id.clone(),
                reason: error,
            })),
        }
    }

    /// Copy to the poison queue, then delete the original.
    async fn dead_letter(&self, message: &QueuedMessage, reason: &str) {
        let Some(poison) = &self.dead_letter else {
            log_event!(error, "queue", "No poison queue; dropping message", queue = %self.queue_name(), message_id = %message.id, reason);
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            self.delete(message).await;
            return;
        };

        let moved = async {
            poison.create_if_not_exists().await?;
            poison.enqueue(message.payload.clone()).await
        }
        .await;

        match moved {
            Ok(()) => {
                log_event!(warn, "queue", "Message dead-lettered", queue = %self.queue_name(), poison = %poison.name(), message_id = %message.id, reason);
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                QUEUE_MESSAGES
                    .with_label_values(&[self.store.name(), "dead_lettered"])
                    .inc();
                self.delete(message).await;
            }
            Err(e) => {
                // Leave it leased; it comes back and we try again.
                log_event!(error, "queue", "Dead-letter write failed", queue = %self.queue_name(), message_id = %message.id, error = %e);
            }
        }
    }

    async fn delete(&self, message: &QueuedMessage) {
        if let Err(e) = self.store.delete(message).await {
            log_event!(warn, "queue", "Message delete failed", queue = %self.queue_name(), message_id = %message.id, error = %e);
        }
    }
}

enum PollError {
    Store(QueueError),
    Halt(ListenerError),
}

impl From<QueueError> for PollError {
    fn from(e: QueueError) -> Self {
        PollError::Store(e)
    }
}
