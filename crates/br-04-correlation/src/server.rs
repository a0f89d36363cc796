//! Server side: command handlers behind the request queue.
//!
//! Most commands run inline on the request listener, so their command
//! message stays leased until the response is written. Commands marked
//! detached (long-running ones such as backend submissions) are accepted
//! instead: the handler runs on a tracked task, the listener deletes the
//! command at once, and the task writes the response when the handler
//! finishes. A detached command that was accepted is never redelivered.

use crate::error::HandlerFault;
use crate::registry::CommandRegistry;
use async_trait::async_trait;
use br_03_queue_transport::{HandlerFailure, HandlerResult, MessageHandler, QueueError, QueueResult, QueueWriter};
use broker_telemetry::log_event;
use shared_types::{CommandEnvelope, FaultCode, FaultDetail, ResponseBody, ResponseEnvelope, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Detached commands allowed to run at once before the listener waits.
pub const DEFAULT_MAX_DETACHED: usize = 64;

/// Strongly typed invocation of one command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn invoke(&self, command: CommandEnvelope) -> Result<Value, HandlerFault>;
}

struct FnCommandHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnCommandHandler<F>
where
    F: Fn(CommandEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerFault>> + Send,
{
    async fn invoke(&self, command: CommandEnvelope) -> Result<Value, HandlerFault> {
        (self.0)(command).await
    }
}

/// Dispatches commands from the request queue to registered handlers and
/// writes one response per command.
///
/// A command may be delivered more than once, so handlers must tolerate
/// repeats.
pub struct RequestServer {
    registry: Arc<CommandRegistry>,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    detached: HashSet<String>,
    writer: Arc<QueueWriter<ResponseEnvelope>>,
    tasks: TaskTracker,
    limit: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl RequestServer {
    pub fn new(registry: Arc<CommandRegistry>, writer: Arc<QueueWriter<ResponseEnvelope>>) -> Self {
        Self {
            registry,
            handlers: HashMap::new(),
            detached: HashSet::new(),
            writer,
            tasks: TaskTracker::new(),
            limit: Arc::new(Semaphore::new(DEFAULT_MAX_DETACHED)),
            cancel: CancellationToken::new(),
        }
    }

    /// Cap on detached commands in flight. At the cap the listener waits
    /// for a slot before accepting the next detached command.
    pub fn with_max_detached(mut self, max: usize) -> Self {
        self.limit = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Detached commands still running when `cancel` fires answer with a
    /// `Cancelled` fault.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bind `cmd_name` to `handler`.
    pub fn register(&mut self, cmd_name: &str, handler: Arc<dyn CommandHandler>) -> &mut Self {
        if !self.registry.contains(cmd_name) {
            log_event!(warn, "correlation", "Handler bound to command without response type", cmd_name);
        }
        self.handlers.insert(cmd_name.to_string(), handler);
        self
    }

    /// Bind `cmd_name` to an async closure.
    pub fn register_fn<F, Fut>(&mut self, cmd_name: &str, f: F) -> &mut Self
    where
        F: Fn(CommandEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerFault>> + Send + 'static,
    {
        self.register(cmd_name, Arc::new(FnCommandHandler(f)))
    }

    /// Run `cmd_name` off the listener's path.
    pub fn detach(&mut self, cmd_name: &str) -> &mut Self {
        self.detached.insert(cmd_name.to_string());
        self
    }

    pub fn is_detached(&self, cmd_name: &str) -> bool {
        self.detached.contains(cmd_name)
    }

    /// Detached commands currently running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Run the handler for `command` and build its response.
    pub async fn dispatch(&self, command: CommandEnvelope) -> ResponseEnvelope {
        match self.handlers.get(&command.cmd_name) {
            Some(handler) => run_handler(&self.registry, handler.as_ref(), command).await,
            None => unknown_command(&command),
        }
    }

    /// Cancel detached commands and wait for their responses to be written.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        log_event!(debug, "correlation", "Request server drained");
    }

    async fn accept_detached(&self, handler: Arc<dyn CommandHandler>, command: CommandEnvelope) -> HandlerResult {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(HandlerFailure::new("request server shutting down")),
            permit = Arc::clone(&self.limit).acquire_owned() => permit.map_err(HandlerFailure::new)?,
        };

        let registry = Arc::clone(&self.registry);
        let writer = Arc::clone(&self.writer);
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            let header = header_of(&command);
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let fault = FaultDetail::new(FaultCode::Cancelled, "request server shutting down");
                    ResponseEnvelope::fault(&header, fault)
                }
                response = run_handler(&registry, handler.as_ref(), command) => response,
            };
            if let Err(e) = write_response(&writer, response).await {
                log_event!(error, "correlation", "Response write failed for detached command",
                    cmd_name = %header.cmd_name, request_id = %header.request_id, error = %e);
            }
        });
        Ok(())
    }
}

/// Write `response`, answering with a `HandlerFailed` fault when the
/// handler's value cannot be encoded.
async fn write_response(writer: &QueueWriter<ResponseEnvelope>, response: ResponseEnvelope) -> QueueResult<()> {
    match writer.write(&response).await {
        Err(QueueError::Serialization(e)) => {
            log_event!(error, "correlation", "Response not encodable", cmd_name = %response.cmd_name, request_id = %response.request_id, error = %e);
            let fault = ResponseEnvelope {
                response: ResponseBody::Fault(FaultDetail::new(FaultCode::HandlerFailed, e.to_string())),
                ..response
            };
            writer.write(&fault).await
        }
        other => other,
    }
}

fn header_of(command: &CommandEnvelope) -> CommandEnvelope {
    CommandEnvelope {
        version: command.version,
        request_id: command.request_id,
        cmd_name: command.cmd_name.clone(),
        parameters: Vec::new(),
    }
}

fn unknown_command(command: &CommandEnvelope) -> ResponseEnvelope {
    log_event!(error, "correlation", "No handler for command", cmd_name = %command.cmd_name, request_id = %command.request_id);
    let fault = FaultDetail::new(FaultCode::UnknownCommand, command.cmd_name.clone());
    ResponseEnvelope::fault(command, fault)
}

async fn run_handler(
    registry: &CommandRegistry,
    handler: &dyn CommandHandler,
    command: CommandEnvelope,
) -> ResponseEnvelope {
    let header = header_of(&command);
    match handler.invoke(command).await {
        Ok(value) => match registry.expected_kind(&header.cmd_name) {
            Ok(expected) if !expected.accepts(&value) => {
                log_event!(error, "correlation", "Handler returned wrong type", cmd_name = %header.cmd_name, expected = %expected, actual = %value.kind());
                let fault = FaultDetail::new(
                    FaultCode::ProtocolViolation,
                    format!("handler returned {}, expected {}", value.kind(), expected),
                );
                ResponseEnvelope::fault(&header, fault)
            }
            _ => ResponseEnvelope::reply(&header, value),
        },
        Err(fault) => {
            log_event!(warn, "correlation", "Handler fault", cmd_name = %header.cmd_name, request_id = %header.request_id, error = %fault);
            ResponseEnvelope::fault(&header, fault.into_detail())
        }
    }
}

#[async_trait]
impl MessageHandler<CommandEnvelope> for RequestServer {
    async fn handle(&self, command: CommandEnvelope) -> HandlerResult {
        if let Some(handler) = self.handlers.get(&command.cmd_name) {
            if self.detached.contains(&command.cmd_name) {
                return self.accept_detached(Arc::clone(handler), command).await;
            }
        }
        let response = self.dispatch(command).await;
        // A failed write leaves the command queued for another try.
        write_response(&self.writer, response)
            .await
            .map_err(HandlerFailure::new)
    }
}
