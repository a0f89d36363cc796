//! Client side: starting requests and routing responses back.

use crate::error::{CorrelationError, CorrelationResult};
use crate::table::{Completion, CorrelationTable};
use async_trait::async_trait;
use br_03_queue_transport::{HandlerFailure, HandlerResult, MessageHandler, QueueWriter};
use broker_telemetry::log_event;
use shared_types::{CommandEnvelope, RequestId, ResponseEnvelope, Value, WireType};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Sends commands and hands out awaitable responses.
pub struct RequestClient {
    writer: Arc<QueueWriter<CommandEnvelope>>,
    table: Arc<CorrelationTable>,
}

impl RequestClient {
    pub fn new(writer: Arc<QueueWriter<CommandEnvelope>>, table: Arc<CorrelationTable>) -> Self {
        Self { writer, table }
    }

    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    /// Write a command and return a handle resolving to its typed result.
    ///
    /// The pending entry is registered before the write so a fast response
    /// cannot arrive ahead of it. A failed write removes the entry again.
    pub async fn start_request<T: WireType>(
        &self,
        cmd_name: &str,
        parameters: Vec<Value>,
    ) -> CorrelationResult<PendingResponse<T>> {
        self.start_request_with_timeout(cmd_name, parameters, None)
            .await
    }

    pub async fn start_request_with_timeout<T: WireType>(
        &self,
        cmd_name: &str,
        parameters: Vec<Value>,
        timeout: Option<Duration>,
    ) -> CorrelationResult<PendingResponse<T>> {
        self.table.registry().ensure_response_type::<T>(cmd_name)?;

        let command = CommandEnvelope::new(cmd_name, parameters);
        let request_id = command.request_id;
        let timeout = timeout.unwrap_or(self.table.default_timeout());
        let receiver = self.table.register(request_id, cmd_name, Some(timeout))?;

        if let Err(e) = self.writer.write(&command).await {
            self.table.cancel(&request_id);
            return Err(CorrelationError::Send(e));
        }

        log_event!(debug, "correlation", "Sent request", request_id = %request_id, cmd_name);

        Ok(PendingResponse {
            request_id,
            receiver,
            timeout,
            table: Arc::clone(&self.table),
            _marker: PhantomData,
        })
    }

    /// Start a request and wait for its result.
    pub async fn call<T: WireType>(&self, cmd_name: &str, parameters: Vec<Value>) -> CorrelationResult<T> {
        self.start_request::<T>(cmd_name, parameters).await?.wait().await
    }

    /// Handler to attach to the response queue listener.
    pub fn response_router(&self) -> Arc<ResponseRouter> {
        Arc::new(ResponseRouter {
            table: Arc::clone(&self.table),
        })
    }
}

/// An outstanding request.
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse<T> {
    request_id: RequestId,
    receiver: oneshot::Receiver<Completion>,
    timeout: Duration,
    table: Arc<CorrelationTable>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: WireType> PendingResponse<T> {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait for the response, up to the request timeout.
    pub async fn wait(self) -> CorrelationResult<T> {
        match tokio::time::timeout(self.timeout, self.receiver).await {
            Ok(Ok(Ok(value))) => Ok(T::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(CorrelationError::Cancelled {
                request_id: self.request_id,
            }),
            Err(_) => {
                self.table.cancel(&self.request_id);
                self.table.record_timeout();
                log_event!(warn, "correlation", "Request timed out", request_id = %self.request_id, timeout_ms = self.timeout.as_millis() as u64);
                Err(CorrelationError::Timeout {
                    request_id: self.request_id,
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Routes response envelopes into the correlation table.
///
/// Protocol violations are returned to the listener as handler failures, so
/// the offending message is redelivered and finally dead-lettered instead of
/// being dropped silently.
pub struct ResponseRouter {
    table: Arc<CorrelationTable>,
}

#[async_trait]
impl MessageHandler<ResponseEnvelope> for ResponseRouter {
    async fn handle(&self, envelope: ResponseEnvelope) -> HandlerResult {
        self.table
            .receive_response(envelope)
            .map_err(HandlerFailure::new)
    }
}
