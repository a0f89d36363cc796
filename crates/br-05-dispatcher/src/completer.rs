//! Queue item completer: the only place a dispatch attempt leaves the
//! dispatcher, either as a terminal disposition or back on the queue.

use crate::broker_queue::BrokerQueue;
use crate::domain::{BrokerQueueItem, DispatchData, Disposition};
use crate::error::DispatchError;
use crate::ports::{CompletionObserver, ResponseJournal};
use broker_telemetry::log_event;
use broker_telemetry::metrics::{REQUESTS_COMPLETED, REQUESTS_REQUEUED, REQUEST_DURATION};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    Preempted,
    RetryRequested,
    ExhaustedLocally,
    BackendUnavailable,
    Shutdown,
}

impl RequeueReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RequeueReason::Preempted => "preempted",
            RequeueReason::RetryRequested => "retry_requested",
            RequeueReason::ExhaustedLocally => "exhausted_locally",
            RequeueReason::BackendUnavailable => "backend_unavailable",
            RequeueReason::Shutdown => "shutdown",
        }
    }
}

pub struct QueueItemCompleter {
    queue: Arc<BrokerQueue>,
    journal: Arc<dyn ResponseJournal>,
    observer: Arc<dyn CompletionObserver>,
}

impl QueueItemCompleter {
    pub fn new(
        queue: Arc<BrokerQueue>,
        journal: Arc<dyn ResponseJournal>,
        observer: Arc<dyn CompletionObserver>,
    ) -> Self {
        Self {
            queue,
            journal,
            observer,
        }
    }

    /// Record the attempt's reply or exception as the item's terminal
    /// disposition. Returns false when the attempt was already disposed of.
    pub async fn put_response_back(&self, data: &mut DispatchData) -> bool {
        let Some(item) = data.broker_queue_item.take() else {
            return false;
        };
        let disposition = match (data.reply_message.take(), data.exception.take()) {
            (Some(reply), _) => Disposition::Reply(reply),
            (None, Some(exception)) => Disposition::Exception(exception),
            (None, None) => Disposition::Exception(DispatchError::NoReply),
        };
        self.complete(&item, disposition).await
    }

    /// Complete an item that never got a dispatch attempt of its own.
    pub async fn fail_item(&self, item: &Arc<BrokerQueueItem>, error: DispatchError) -> bool {
        self.complete(item, Disposition::Exception(error)).await
    }

    /// Return the attempt's item to the head of the queue. Returns false
    /// when the attempt was already disposed of.
    pub fn put_request_back(&self, data: &mut DispatchData, reason: RequeueReason) -> bool {
        data.reply_message = None;
        data.exception = None;
        match data.broker_queue_item.take() {
            Some(item) => {
                self.requeue(item, reason);
                true
            }
            None => false,
        }
    }

    pub fn requeue(&self, item: Arc<BrokerQueueItem>, reason: RequeueReason) {
        self.observer.on_completed(&item, None, item.age());
        REQUESTS_REQUEUED.with_label_values(&[reason.as_str()]).inc();
        log_event!(debug, "dispatcher", "Request put back", item_id = %item.id(), reason = reason.as_str(), try_count = item.try_count());
        self.queue.put_back(item);
    }

    async fn complete(&self, item: &Arc<BrokerQueueItem>, disposition: Disposition) -> bool {
        // The item accepts one disposition; only the winner journals it.
        if let Err(e) = item.complete(disposition.clone()) {
            log_event!(warn, "dispatcher", "Ignoring second completion", item_id = %item.id(), error = %e);
            return false;
        }

        if let Some(persist_id) = item.persist_id() {
            // The client already has its disposition if the journal is down
            if let Err(e) = self.journal.record(persist_id, &disposition).await {
                log_event!(error, "dispatcher", "Response journal write failed", item_id = %item.id(), %persist_id, error = %e);
            }
        }

        let outcome = disposition.outcome();
        let elapsed = item.age();
        self.observer.on_completed(item, Some(&disposition), elapsed);
        REQUESTS_COMPLETED.with_label_values(&[outcome]).inc();
        REQUEST_DURATION.observe(elapsed.as_secs_f64());
        log_event!(debug, "dispatcher", "Request completed", item_id = %item.id(), outcome, elapsed_ms = elapsed.as_millis() as u64);
        true
    }
}
