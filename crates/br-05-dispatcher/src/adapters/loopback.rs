//! In-process backend transport. Requests go to an async function instead
//! of the network; used for embedded backends and tests.

use crate::domain::Message;
use crate::error::CommunicationError;
use crate::ports::{BackendChannel, BackendTransport, ChannelState};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

type ServiceFn = dyn Fn(Message) -> BoxFuture<'static, Result<Message, CommunicationError>> + Send + Sync;

pub struct LoopbackTransport {
    endpoint: String,
    service: Arc<ServiceFn>,
    failing_connects: AtomicU32,
    connects: AtomicU32,
    connect_delay: Duration,
}

impl LoopbackTransport {
    pub fn new<F, Fut>(endpoint: impl Into<String>, service: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, CommunicationError>> + Send + 'static,
    {
        Self {
            endpoint: endpoint.into(),
            service: Arc::new(move |request: Message| service(request).boxed()),
            failing_connects: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            connect_delay: Duration::ZERO,
        }
    }

    /// Stall every connect for `delay`, like a backend host that accepts
    /// the TCP handshake and never answers.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Backend that replies with the request body.
    pub fn echo(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, |request: Message| async move {
            let body = request.body.clone();
            Ok::<_, CommunicationError>(Message::reply_to(&request, body))
        })
    }

    /// Make the next `count` connects fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendTransport for LoopbackTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Arc<dyn BackendChannel>, CommunicationError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let failing = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(CommunicationError::ChannelCreateFailed {
                endpoint: self.endpoint.clone(),
                reason: "connection refused".to_string(),
            });
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LoopbackChannel {
            endpoint: self.endpoint.clone(),
            state: Mutex::new(ChannelState::Created),
            service: Arc::clone(&self.service),
        }))
    }
}

pub struct LoopbackChannel {
    endpoint: String,
    state: Mutex<ChannelState>,
    service: Arc<ServiceFn>,
}

#[async_trait]
impl BackendChannel for LoopbackChannel {
    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    async fn invoke(&self, request: Message) -> Result<Message, CommunicationError> {
        {
            let mut state = self.state.lock();
            if !state.is_usable() {
                return Err(CommunicationError::ChannelFaulted {
                    endpoint: self.endpoint.clone(),
                    reason: format!("channel is {:?}", *state),
                });
            }
            *state = ChannelState::Opened;
        }

        let result = (self.service)(request).await;
        if result.is_err() {
            let mut state = self.state.lock();
            if *state == ChannelState::Opened {
                *state = ChannelState::Faulted;
            }
        }
        result
    }

    async fn close(&self) -> Result<(), CommunicationError> {
        *self.state.lock() = ChannelState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Value;

    #[tokio::test]
    async fn test_failing_connects_counted_down() {
        let transport = LoopbackTransport::echo("b");
        transport.fail_next_connects(1);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_faults_on_communication_error() {
        let transport = LoopbackTransport::new("b", |_request: Message| async {
            Err::<Message, _>(CommunicationError::EndpointNotFound {
                endpoint: "b".to_string(),
            })
        });
        let channel = transport.connect().await.unwrap();

        let first = channel.invoke(Message::request("Echo", Value::Null)).await;
        let second = channel.invoke(Message::request("Echo", Value::Null)).await;

        assert!(matches!(first, Err(CommunicationError::EndpointNotFound { .. })));
        assert!(matches!(second, Err(CommunicationError::ChannelFaulted { .. })));
        assert_eq!(channel.state(), ChannelState::Faulted);
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_calls() {
        let channel = LoopbackTransport::echo("b").connect().await.unwrap();
        channel.close().await.unwrap();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.invoke(Message::request("Echo", Value::Null)).await.is_err());
    }
}
