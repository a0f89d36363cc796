//! Dispatcher: moves requests from the broker queue to one backend endpoint
//! and disposes of every attempt through the completer.

use crate::broker_queue::BrokerQueue;
use crate::client_manager::{BackendClientManager, BackendState};
use crate::completer::{QueueItemCompleter, RequeueReason};
use crate::domain::{BrokerQueueItem, DispatchData};
use crate::error::{CommunicationError, DispatchError};
use crate::ports::BackendTransport;
use crate::response_handler::{DispatchOutcome, ResponseHandler};
use br_02_retry::{RetryError, RetryManager};
use broker_telemetry::log_event;
use broker_telemetry::metrics::{BACKEND_CALL_DURATION, BACKEND_CALL_RETRIES, REQUESTS_DISPATCHED};
use broker_telemetry::HistogramTimer;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub session_id: i32,
    pub backend_call_timeout: Duration,
    /// Dispatch cycles an item may exhaust before it fails
    pub message_retry_limit: u32,
    pub max_concurrent_calls: usize,
    pub supports_concurrent_calls: bool,
    pub max_channel_create_failures: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            session_id: 0,
            backend_call_timeout: Duration::from_secs(60),
            message_retry_limit: 3,
            max_concurrent_calls: 16,
            supports_concurrent_calls: false,
            max_channel_create_failures: 3,
        }
    }
}

impl DispatcherConfig {
    /// Calls are serialized per channel unless the transport supports
    /// concurrent calls.
    pub fn worker_count(&self) -> usize {
        if self.supports_concurrent_calls {
            self.max_concurrent_calls.max(1)
        } else {
            1
        }
    }
}

/// Attempt that reached the backend and got a reply.
struct Attempt {
    data: DispatchData,
    outcome: DispatchOutcome,
}

/// Attempt that ended without a reply.
#[derive(Debug)]
struct AttemptFailure {
    data: DispatchData,
    error: DispatchError,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt {} on {}: {}", self.data.attempt, self.data.endpoint, self.error)
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    clients: BackendClientManager,
    queue: Arc<BrokerQueue>,
    completer: Arc<QueueItemCompleter>,
    retry: RetryManager,
    response_handler: ResponseHandler,
    cancel: CancellationToken,
    service_preempted: AtomicBool,
    backend_failed: AtomicBool,
}

impl Dispatcher {
    /// `shutdown` scopes the dispatcher; stopping the dispatcher itself
    /// leaves the parent token alone.
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn BackendTransport>,
        queue: Arc<BrokerQueue>,
        completer: Arc<QueueItemCompleter>,
        retry: RetryManager,
        shutdown: &CancellationToken,
    ) -> Self {
        let cancel = shutdown.child_token();
        // Connects share the call timeout and stop with the dispatcher.
        let clients = BackendClientManager::new(
            transport,
            config.max_channel_create_failures,
            config.backend_call_timeout,
            cancel.clone(),
        );
        Self {
            config,
            clients,
            queue,
            completer,
            retry,
            response_handler: ResponseHandler::new(),
            cancel,
            service_preempted: AtomicBool::new(false),
            backend_failed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.clients.endpoint()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn is_service_preempted(&self) -> bool {
        self.service_preempted.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn backend_state(&self) -> BackendState {
        self.clients.state()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Spawn the worker pool. The returned task finishes once every worker
    /// has exited and the channel is closed.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.queue.register_consumer();
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut workers = JoinSet::new();
        for worker in 0..self.config.worker_count() {
            let dispatcher = Arc::clone(&self);
            workers.spawn(async move { dispatcher.worker_loop(worker).await });
        }
        log_event!(info, "dispatcher", "Dispatcher started", endpoint = self.endpoint(), session_id = self.config.session_id, workers = self.config.worker_count());

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log_event!(error, "dispatcher", "Dispatcher worker failed", endpoint = self.endpoint(), error = %e);
                self.stop();
            }
        }

        self.clients.close().await;
        if self.queue.retire_consumer() == 0 {
            self.fail_stranded().await;
        }
        log_event!(info, "dispatcher", "Dispatcher stopped", endpoint = self.endpoint(), preempted = self.is_service_preempted());
    }

    /// Last dispatcher gone: nothing will serve the waiting items.
    async fn fail_stranded(&self) {
        let error = if self.is_service_preempted() || self.backend_failed.load(Ordering::SeqCst) {
            DispatchError::NoBackendAvailable
        } else {
            DispatchError::Cancelled
        };
        for item in self.queue.drain() {
            self.completer.fail_item(&item, error.clone()).await;
        }
    }

    async fn worker_loop(&self, worker: usize) {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = self.queue.take() => item,
            };
            log_event!(trace, "dispatcher", "Dispatching request", endpoint = self.endpoint(), worker, item_id = %item.id());
            self.process(item).await;
        }
    }

    async fn process(&self, item: Arc<BrokerQueueItem>) {
        let result = self
            .retry
            .invoke_with_retry(
                |attempt| self.attempt(&item, attempt),
                |failure: &AttemptFailure| failure.error.is_transient(),
                &self.cancel,
            )
            .await;

        match result {
            Ok(Attempt { mut data, outcome }) => self.finish(&mut data, outcome).await,
            Err(RetryError::Cancelled { .. }) => {
                self.completer.requeue(item, RequeueReason::Shutdown);
            }
            Err(RetryError::NotRetryable { last, .. }) => {
                let AttemptFailure { mut data, error } = last;
                match error {
                    DispatchError::Cancelled => {
                        self.completer.put_request_back(&mut data, RequeueReason::Shutdown);
                    }
                    DispatchError::BackendUnavailable { .. } => {
                        self.backend_failed.store(true, Ordering::SeqCst);
                        self.completer.put_request_back(&mut data, RequeueReason::BackendUnavailable);
                        self.stop();
                    }
                    error => {
                        data.exception = Some(error);
                        self.completer.put_response_back(&mut data).await;
                    }
                }
            }
            Err(RetryError::AttemptsExhausted { last, .. })
            | Err(RetryError::TimeLimitExceeded { last, .. }) => {
                let AttemptFailure { mut data, error } = last;
                let try_count = item.increment_try_count();
                if try_count >= self.config.message_retry_limit {
                    log_event!(warn, "dispatcher", "Request failed after retries", endpoint = self.endpoint(), item_id = %item.id(), try_count, error = %error);
                    data.exception = Some(DispatchError::CommunicationExhausted {
                        try_count,
                        last: error.to_string(),
                    });
                    self.completer.put_response_back(&mut data).await;
                } else {
                    self.completer.put_request_back(&mut data, RequeueReason::ExhaustedLocally);
                }
            }
        }
    }

    async fn finish(&self, data: &mut DispatchData, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Reply | DispatchOutcome::Fault => {
                self.completer.put_response_back(data).await;
            }
            DispatchOutcome::Preempted => {
                self.service_preempted.store(true, Ordering::SeqCst);
                self.completer.put_request_back(data, RequeueReason::Preempted);
                log_event!(warn, "dispatcher", "Backend preempted, stopping dispatcher", endpoint = self.endpoint());
                self.stop();
            }
            DispatchOutcome::RetryRequested => {
                self.completer.put_request_back(data, RequeueReason::RetryRequested);
            }
            DispatchOutcome::CommunicationFailure => {
                // Failures never come back as a successful attempt
                self.completer.put_request_back(data, RequeueReason::ExhaustedLocally);
            }
        }
    }

    async fn attempt(&self, item: &Arc<BrokerQueueItem>, attempt: u32) -> Result<Attempt, AttemptFailure> {
        let mut data = DispatchData::new(self.config.session_id, item, self.endpoint());
        data.attempt = attempt;
        if attempt > 1 {
            BACKEND_CALL_RETRIES.inc();
        }

        // get_client observes the dispatcher's token itself.
        let lease = match self.clients.get_client().await {
            Ok(lease) => lease,
            Err(error) => return Err(AttemptFailure { data, error }),
        };

        REQUESTS_DISPATCHED.inc();
        let timeout = self.config.backend_call_timeout;
        let call = {
            let _timer = HistogramTimer::new(&BACKEND_CALL_DURATION);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = tokio::time::timeout(timeout, lease.channel.invoke(item.request().clone())) => Some(result),
            }
        };
        let result = match call {
            None => {
                log_event!(debug, "dispatcher", "Backend call abandoned for shutdown", endpoint = self.endpoint(), item_id = %item.id());
                return Err(AttemptFailure {
                    data,
                    error: DispatchError::Cancelled,
                });
            }
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(CommunicationError::Timeout {
                endpoint: data.endpoint.clone(),
                timeout,
            }),
        };
        data.record(result);

        let outcome = self.response_handler.receive_response(&mut data);
        if outcome == DispatchOutcome::CommunicationFailure {
            self.clients.mark_faulted(lease.generation).await;
            let error = data.exception.clone().unwrap_or(DispatchError::NoReply);
            return Err(AttemptFailure { data, error });
        }
        Ok(Attempt { data, outcome })
    }
}
