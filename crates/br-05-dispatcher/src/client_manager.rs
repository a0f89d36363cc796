//! Backend client manager: owns the channel to one endpoint and recreates
//! it after failures.

use crate::error::{CommunicationError, DispatchError};
use crate::ports::{BackendChannel, BackendTransport};
use broker_telemetry::log_event;
use broker_telemetry::metrics::CHANNEL_RECREATIONS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NoClient,
    Creating,
    Ready,
    Faulted,
    PermanentlyFailed,
}

/// A channel handed out to a dispatch attempt, tagged with the generation
/// it belongs to.
#[derive(Clone)]
pub struct ClientLease {
    pub channel: Arc<dyn BackendChannel>,
    pub generation: u64,
}

struct Inner {
    channel: Option<Arc<dyn BackendChannel>>,
    generation: u64,
    create_failures: u32,
}

pub struct BackendClientManager {
    transport: Arc<dyn BackendTransport>,
    max_channel_create_failures: u32,
    connect_timeout: Duration,
    cancel: CancellationToken,
    // Written only with `inner` held; read without it
    state: parking_lot::Mutex<BackendState>,
    // Held across channel creation so recreation is single-flight
    inner: Mutex<Inner>,
}

impl BackendClientManager {
    /// A connect slower than `connect_timeout` counts as a create failure.
    /// Once `cancel` fires, pending and future creations return
    /// [`DispatchError::Cancelled`].
    pub fn new(
        transport: Arc<dyn BackendTransport>,
        max_channel_create_failures: u32,
        connect_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            max_channel_create_failures: max_channel_create_failures.max(1),
            connect_timeout,
            cancel,
            state: parking_lot::Mutex::new(BackendState::NoClient),
            inner: Mutex::new(Inner {
                channel: None,
                generation: 0,
                create_failures: 0,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub fn state(&self) -> BackendState {
        *self.state.lock()
    }

    fn set_state(&self, state: BackendState) {
        *self.state.lock() = state;
    }

    /// Current channel, created on first use and recreated when faulted.
    pub async fn get_client(&self) -> Result<ClientLease, DispatchError> {
        self.create_client(false, 0).await
    }

    /// Create a channel. Without `force` a usable current channel is reused.
    pub async fn create_client(&self, force: bool, retry_index: u32) -> Result<ClientLease, DispatchError> {
        let mut inner = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
            inner = self.inner.lock() => inner,
        };

        if self.state() == BackendState::PermanentlyFailed {
            return Err(self.unavailable(&inner));
        }
        if !force && self.state() == BackendState::Ready {
            if let Some(channel) = &inner.channel {
                if channel.state().is_usable() {
                    return Ok(ClientLease {
                        channel: Arc::clone(channel),
                        generation: inner.generation,
                    });
                }
            }
        }

        if let Some(old) = inner.channel.take() {
            if let Err(e) = old.close().await {
                log_event!(debug, "dispatcher", "Ignoring close failure on old channel", endpoint = self.endpoint(), error = %e);
            }
        }

        self.set_state(BackendState::Creating);
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.set_state(BackendState::NoClient);
                log_event!(debug, "dispatcher", "Channel creation cancelled", endpoint = self.endpoint());
                return Err(DispatchError::Cancelled);
            }
            connected = tokio::time::timeout(self.connect_timeout, self.transport.connect()) => {
                connected.unwrap_or_else(|_| Err(CommunicationError::Timeout {
                    endpoint: self.endpoint().to_string(),
                    timeout: self.connect_timeout,
                }))
            }
        };

        match connected {
            Ok(channel) => {
                inner.generation += 1;
                inner.create_failures = 0;
                inner.channel = Some(Arc::clone(&channel));
                self.set_state(BackendState::Ready);
                if inner.generation > 1 {
                    CHANNEL_RECREATIONS.inc();
                }
                log_event!(debug, "dispatcher", "Backend channel created", endpoint = self.endpoint(), generation = inner.generation, retry_index);
                Ok(ClientLease {
                    channel,
                    generation: inner.generation,
                })
            }
            Err(e) => {
                inner.create_failures += 1;
                if inner.create_failures >= self.max_channel_create_failures {
                    self.set_state(BackendState::PermanentlyFailed);
                    log_event!(error, "dispatcher", "Backend permanently failed", endpoint = self.endpoint(), failures = inner.create_failures, error = %e);
                    Err(self.unavailable(&inner))
                } else {
                    self.set_state(BackendState::Faulted);
                    log_event!(warn, "dispatcher", "Backend channel create failed", endpoint = self.endpoint(), failures = inner.create_failures, retry_index, error = %e);
                    Err(DispatchError::Communication(e))
                }
            }
        }
    }

    /// Report a communication failure on `generation`. Reports against an
    /// older generation are ignored.
    pub async fn mark_faulted(&self, generation: u64) -> bool {
        let inner = self.inner.lock().await;
        if inner.generation == generation && self.state() == BackendState::Ready {
            self.set_state(BackendState::Faulted);
            true
        } else {
            false
        }
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(channel) = inner.channel.take() {
            if let Err(e) = channel.close().await {
                log_event!(debug, "dispatcher", "Ignoring close failure", endpoint = self.endpoint(), error = %e);
            }
        }
        if self.state() != BackendState::PermanentlyFailed {
            self.set_state(BackendState::NoClient);
        }
    }

    fn unavailable(&self, inner: &Inner) -> DispatchError {
        DispatchError::BackendUnavailable {
            endpoint: self.endpoint().to_string(),
            failures: inner.create_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::loopback::LoopbackTransport;
    use crate::domain::Message;

    fn echo() -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport::echo("backend-1"))
    }

    fn manager(transport: Arc<LoopbackTransport>, max_failures: u32) -> BackendClientManager {
        BackendClientManager::new(transport, max_failures, Duration::from_secs(5), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_channel_reused_while_ready() {
        let transport = echo();
        let manager = manager(transport.clone(), 3);

        let first = manager.get_client().await.unwrap();
        let second = manager.get_client().await.unwrap();

        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 1);
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(manager.state(), BackendState::Ready);
    }

    #[tokio::test]
    async fn test_faulted_channel_recreated() {
        let transport = echo();
        let manager = manager(transport.clone(), 3);
        let lease = manager.get_client().await.unwrap();

        assert!(manager.mark_faulted(lease.generation).await);
        let next = manager.get_client().await.unwrap();

        assert_eq!(next.generation, 2);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_fault_report_ignored() {
        let manager = manager(echo(), 3);
        let old = manager.get_client().await.unwrap();
        manager.create_client(true, 1).await.unwrap();

        assert!(!manager.mark_faulted(old.generation).await);
        assert_eq!(manager.state(), BackendState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_recreation_single_flight() {
        let transport = echo();
        let manager = Arc::new(manager(transport.clone(), 3));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_client().await.unwrap().generation })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_after_max_create_failures() {
        let transport = echo();
        transport.fail_next_connects(5);
        let manager = manager(transport, 2);

        let first = manager.get_client().await;
        let second = manager.get_client().await;
        let third = manager.get_client().await;

        assert!(matches!(first, Err(DispatchError::Communication(_))));
        assert!(matches!(second, Err(DispatchError::BackendUnavailable { failures: 2, .. })));
        assert!(matches!(third, Err(DispatchError::BackendUnavailable { .. })));
        assert_eq!(manager.state(), BackendState::PermanentlyFailed);
    }

    #[tokio::test]
    async fn test_lease_invokes_backend() {
        let manager = manager(echo(), 3);
        let lease = manager.get_client().await.unwrap();
        let request = Message::request("Echo", shared_types::Value::Int64(5));

        let reply = lease.channel.invoke(request.clone()).await.unwrap();

        assert_eq!(reply.body, request.body);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_connect_times_out() {
        let transport = Arc::new(LoopbackTransport::echo("backend-1").with_connect_delay(Duration::from_secs(600)));
        let manager = BackendClientManager::new(transport, 3, Duration::from_secs(2), CancellationToken::new());

        let started = tokio::time::Instant::now();
        let result = manager.get_client().await;

        assert!(matches!(result, Err(DispatchError::Communication(CommunicationError::Timeout { .. }))));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(manager.state(), BackendState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creating_visible_and_cancellable_during_connect() {
        let transport = Arc::new(LoopbackTransport::echo("backend-1").with_connect_delay(Duration::from_secs(600)));
        let cancel = CancellationToken::new();
        let manager = Arc::new(BackendClientManager::new(transport, 3, Duration::from_secs(900), cancel.clone()));

        let creating = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_client().await.map(|lease| lease.generation) })
        };
        let waiting = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_client().await.map(|lease| lease.generation) })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.state(), BackendState::Creating);

        cancel.cancel();
        assert!(matches!(creating.await.unwrap(), Err(DispatchError::Cancelled)));
        assert!(matches!(waiting.await.unwrap(), Err(DispatchError::Cancelled)));
        assert_eq!(manager.state(), BackendState::NoClient);
    }
}
