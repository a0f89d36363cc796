//! Broker sessions and the launcher service that owns them.
//!
//! A session is one broker: a [`BrokerQueue`] fed by `SubmitRequest`, one
//! [`Dispatcher`] per configured backend endpoint, and a completer that
//! journals dispositions when the session is durable.

use super::protocol::BrokerLauncher;
use crate::adapters::BackendResolver;
use crate::container::{DispatcherConfig, RetryConfig};
use async_trait::async_trait;
use br_04_correlation::HandlerFault;
use br_05_dispatcher::{
    BrokerQueue, BrokerQueueItem, CompletionObserver, DispatchError, Dispatcher, Disposition, Message,
    NoopJournal, QueueItemCompleter, ResponseJournal,
};
use broker_telemetry::log_event;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared_types::{BrokerInitializationResult, FaultCode, SessionStartInfo, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

pub struct BrokerSession {
    session_id: i32,
    broker_unique_id: String,
    info: SessionStartInfo,
    durable: bool,
    queue: Arc<BrokerQueue>,
    dispatchers: Vec<Arc<Dispatcher>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    service_operation_timeout_ms: u64,
}

impl BrokerSession {
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn broker_unique_id(&self) -> &str {
        &self.broker_unique_id
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn dispatchers(&self) -> &[Arc<Dispatcher>] {
        &self.dispatchers
    }

    /// Accepting work and at least one dispatcher still attached.
    pub fn is_alive(&self) -> bool {
        !self.shutdown.is_cancelled() && self.queue.consumers() > 0
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    pub fn initialization_result(&self) -> BrokerInitializationResult {
        BrokerInitializationResult {
            broker_unique_id: self.broker_unique_id.clone(),
            broker_epr: vec![format!("broker://{}/{}", self.info.service_name, self.session_id)],
            response_epr: vec![format!("broker://{}/{}/responses", self.info.service_name, self.session_id)],
            max_message_size: MAX_MESSAGE_SIZE,
            service_operation_timeout_ms: self.service_operation_timeout_ms,
            supports_message_details: self.durable,
        }
    }

    /// Queue one request and wait for its terminal disposition.
    pub async fn submit(&self, action: String, body: Value) -> Result<Value, HandlerFault> {
        if !self.is_alive() {
            return Err(HandlerFault::new(
                FaultCode::CommunicationExhausted,
                format!("session {} has no backend available", self.session_id),
            ));
        }

        let client_id = self.info.username.clone().unwrap_or_else(|| "anonymous".to_string());
        let persist_id = self.durable.then(Uuid::new_v4);
        let (item, completion) = BrokerQueueItem::new(client_id, Message::request(action, body), persist_id);
        self.queue.push(item);

        match completion.wait().await {
            Disposition::Reply(reply) if reply.is_fault => Err(HandlerFault::new(
                FaultCode::ApplicationFault,
                reply.fault_reason().unwrap_or("backend fault"),
            )),
            Disposition::Reply(reply) => Ok(reply.body),
            Disposition::Exception(DispatchError::Cancelled) => Err(HandlerFault::new(
                FaultCode::Cancelled,
                format!("session {} closed", self.session_id),
            )),
            Disposition::Exception(e) => Err(HandlerFault::new(FaultCode::CommunicationExhausted, e.to_string())),
        }
    }

    /// Stop the dispatchers and wait for them to exit. Waiting requests
    /// complete as cancelled.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                log_event!(error, "runtime", "Dispatcher task failed", session_id = self.session_id, error = %e);
            }
        }
        log_event!(info, "runtime", "Session closed", session_id = self.session_id);
    }
}

/// [`BrokerLauncher`] keeping one [`BrokerSession`] per session id.
pub struct SessionBrokerLauncher {
    sessions: DashMap<i32, Arc<BrokerSession>>,
    dispatcher_config: DispatcherConfig,
    retry: RetryConfig,
    resolver: Arc<BackendResolver>,
    observer: Arc<dyn CompletionObserver>,
    journal: Arc<dyn ResponseJournal>,
    shutdown: CancellationToken,
}

impl SessionBrokerLauncher {
    /// `journal` records dispositions of durable sessions.
    pub fn new(
        dispatcher_config: DispatcherConfig,
        retry: RetryConfig,
        resolver: Arc<BackendResolver>,
        observer: Arc<dyn CompletionObserver>,
        journal: Arc<dyn ResponseJournal>,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher_config,
            retry,
            resolver,
            observer,
            journal,
            shutdown: shutdown.child_token(),
        }
    }

    pub fn session(&self, session_id: i32) -> Option<Arc<BrokerSession>> {
        self.sessions.get(&session_id).map(|s| Arc::clone(s.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Close every session.
    pub async fn close_all(&self) {
        let ids: Vec<i32> = self.sessions.iter().map(|s| *s.key()).collect();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close().await;
            }
        }
    }

    fn start_session(
        &self,
        info: SessionStartInfo,
        session_id: i32,
        durable: bool,
    ) -> Result<BrokerInitializationResult, HandlerFault> {
        let entry = match self.sessions.entry(session_id) {
            Entry::Occupied(_) => {
                return Err(HandlerFault::new(
                    FaultCode::ApplicationFault,
                    format!("session {session_id} already exists"),
                ));
            }
            Entry::Vacant(entry) => entry,
        };

        let transports = self
            .dispatcher_config
            .backend_endpoints
            .iter()
            .map(|endpoint| self.resolver.resolve(endpoint))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HandlerFault::new(FaultCode::ApplicationFault, e.to_string()))?;

        let worker_config = self
            .dispatcher_config
            .worker_config(session_id, info.service_operation_timeout_ms);
        let journal: Arc<dyn ResponseJournal> = if durable {
            Arc::clone(&self.journal)
        } else {
            Arc::new(NoopJournal)
        };
        let queue = Arc::new(BrokerQueue::new());
        let completer = Arc::new(QueueItemCompleter::new(
            Arc::clone(&queue),
            journal,
            Arc::clone(&self.observer),
        ));
        let shutdown = self.shutdown.child_token();

        let dispatchers: Vec<Arc<Dispatcher>> = transports
            .into_iter()
            .map(|transport| {
                Arc::new(Dispatcher::new(
                    worker_config.clone(),
                    transport,
                    Arc::clone(&queue),
                    Arc::clone(&completer),
                    self.retry.policy().build(),
                    &shutdown,
                ))
            })
            .collect();
        let handles = dispatchers.iter().map(Dispatcher::start).collect();

        let session = Arc::new(BrokerSession {
            session_id,
            broker_unique_id: Uuid::new_v4().to_string(),
            info,
            durable,
            queue,
            dispatchers,
            handles: Mutex::new(handles),
            shutdown,
            service_operation_timeout_ms: worker_config.backend_call_timeout.as_millis() as u64,
        });
        let result = session.initialization_result();
        entry.insert(session);

        log_event!(info, "runtime", "Session created", session_id, durable, broker_unique_id = %result.broker_unique_id);
        Ok(result)
    }

    fn require(&self, session_id: i32) -> Result<Arc<BrokerSession>, HandlerFault> {
        self.session(session_id).ok_or_else(|| {
            HandlerFault::new(
                FaultCode::ApplicationFault,
                format!("session {session_id} not found"),
            )
        })
    }
}

#[async_trait]
impl BrokerLauncher for SessionBrokerLauncher {
    async fn create(&self, info: SessionStartInfo, session_id: i32) -> Result<BrokerInitializationResult, HandlerFault> {
        self.start_session(info, session_id, false)
    }

    async fn create_durable(
        &self,
        info: SessionStartInfo,
        session_id: i32,
    ) -> Result<BrokerInitializationResult, HandlerFault> {
        self.start_session(info, session_id, true)
    }

    async fn attach(&self, session_id: i32) -> Result<BrokerInitializationResult, HandlerFault> {
        Ok(self.require(session_id)?.initialization_result())
    }

    async fn close(&self, session_id: i32) -> Result<(), HandlerFault> {
        let (_, session) = self.sessions.remove(&session_id).ok_or_else(|| {
            HandlerFault::new(
                FaultCode::ApplicationFault,
                format!("session {session_id} not found"),
            )
        })?;
        session.close().await;
        Ok(())
    }

    async fn ping_broker(&self, session_id: i32) -> Result<bool, HandlerFault> {
        Ok(self.session(session_id).is_some_and(|s| s.is_alive()))
    }

    async fn get_active_broker_id_list(&self) -> Result<Vec<i64>, HandlerFault> {
        let mut ids: Vec<i64> = self.sessions.iter().map(|s| i64::from(*s.key())).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn submit_request(&self, session_id: i32, action: String, body: Value) -> Result<Value, HandlerFault> {
        let session = self.require(session_id)?;
        session.submit(action, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MetricsObserver;
    use br_05_dispatcher::{CommunicationError, InMemoryResponseJournal, LoopbackTransport};
    use std::time::Duration;

    fn launcher(endpoints: &[&str], resolver: Arc<BackendResolver>) -> (SessionBrokerLauncher, Arc<InMemoryResponseJournal>) {
        let journal = Arc::new(InMemoryResponseJournal::new());
        let dispatcher_config = DispatcherConfig {
            backend_endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
            ..DispatcherConfig::default()
        };
        let retry = RetryConfig {
            backoff: br_02_retry::BackoffKind::Instant,
            ..RetryConfig::default()
        };
        let launcher = SessionBrokerLauncher::new(
            dispatcher_config,
            retry,
            resolver,
            Arc::new(MetricsObserver::new()),
            journal.clone(),
            &CancellationToken::new(),
        );
        (launcher, journal)
    }

    fn resolver() -> Arc<BackendResolver> {
        Arc::new(BackendResolver::new(Duration::from_secs(60), Duration::from_secs(60)))
    }

    fn info() -> SessionStartInfo {
        SessionStartInfo {
            service_name: "echo".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (launcher, _journal) = launcher(&["loopback://echo"], resolver());

        let created = launcher.create(info(), 10).await.unwrap();
        let attached = launcher.attach(10).await.unwrap();
        assert_eq!(created.broker_unique_id, attached.broker_unique_id);
        assert!(launcher.ping_broker(10).await.unwrap());
        assert_eq!(launcher.get_active_broker_id_list().await.unwrap(), vec![10]);

        let duplicate = launcher.create(info(), 10).await;
        assert!(matches!(duplicate, Err(HandlerFault::Fault(ref d)) if d.code == FaultCode::ApplicationFault));

        launcher.close(10).await.unwrap();
        assert!(!launcher.ping_broker(10).await.unwrap());
        assert!(launcher.attach(10).await.is_err());
        assert!(launcher.close(10).await.is_err());
    }

    #[tokio::test]
    async fn test_submit_request_echoes() {
        let (launcher, _journal) = launcher(&["loopback://echo"], resolver());
        launcher.create(info(), 1).await.unwrap();

        let reply = launcher
            .submit_request(1, "Echo".to_string(), Value::String("ping".to_string()))
            .await
            .unwrap();

        assert_eq!(reply, Value::String("ping".to_string()));
        launcher.close_all().await;
    }

    #[tokio::test]
    async fn test_backend_fault_surfaces_as_application_fault() {
        let resolver = resolver();
        resolver.register_service(
            "faulty",
            Arc::new(LoopbackTransport::new("loopback://faulty", |request: Message| async move {
                Ok::<_, CommunicationError>(Message::fault_reply(&request, "bad input"))
            })),
        );
        let (launcher, _journal) = launcher(&["loopback://faulty"], resolver);
        launcher.create(info(), 2).await.unwrap();

        let result = launcher.submit_request(2, "Compute".to_string(), Value::Null).await;

        match result {
            Err(HandlerFault::Fault(detail)) => {
                assert_eq!(detail.code, FaultCode::ApplicationFault);
                assert_eq!(detail.message, "bad input");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        launcher.close_all().await;
    }

    #[tokio::test]
    async fn test_durable_session_journals_dispositions() {
        let (launcher, journal) = launcher(&["loopback://echo"], resolver());
        launcher.create_durable(info(), 3).await.unwrap();
        launcher.create(info(), 4).await.unwrap();

        launcher.submit_request(3, "Echo".to_string(), Value::Int64(1)).await.unwrap();
        launcher.submit_request(4, "Echo".to_string(), Value::Int64(2)).await.unwrap();

        assert_eq!(journal.len(), 1);
        assert!(launcher.attach(3).await.unwrap().supports_message_details);
        launcher.close_all().await;
    }

    #[tokio::test]
    async fn test_unresolvable_endpoint_rejects_create() {
        let (launcher, _journal) = launcher(&["net.tcp://host:9090"], resolver());

        assert!(launcher.create(info(), 5).await.is_err());
        assert_eq!(launcher.session_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_to_unknown_session() {
        let (launcher, _journal) = launcher(&["loopback://echo"], resolver());
        assert!(launcher.submit_request(99, "Echo".to_string(), Value::Null).await.is_err());
    }
}
