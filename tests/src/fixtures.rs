//! Shared wiring for the integration flows.
//!
//! [`LauncherHarness`] runs the launcher request/response queues against any
//! [`BrokerLauncher`], so client-side behavior can be driven without real
//! sessions. [`ScriptedLauncher`] is the launcher most flows plug into it.

use async_trait::async_trait;
use br_01_serializer::Serializer;
use br_02_retry::{BackoffKind, RetryPolicy};
use br_03_queue_transport::{
    open_store, poison_queue_name, InMemoryQueueService, ListenerConfig, ListenerError, QueueListener,
    QueueResult, QueueWriter, IN_MEMORY_CONNECTION_STRING,
};
use br_04_correlation::{CorrelationTable, HandlerFault, RequestClient, RequestServer};
use broker_runtime::launcher::{bind_launcher, launcher_registry};
use broker_runtime::{BrokerConfig, BrokerLauncher, BrokerLauncherClient};
use parking_lot::Mutex;
use shared_types::{BrokerInitializationResult, CommandEnvelope, FaultCode, ResponseEnvelope, SessionStartInfo, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const REQUEST_QUEUE: &str = "test-launcher-requests";
pub const RESPONSE_QUEUE: &str = "test-launcher-responses";

/// Timing knobs for a harness.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub max_delivery_attempts: u32,
    pub request_timeout: Duration,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            visibility_timeout: Duration::from_millis(100),
            max_delivery_attempts: 2,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Launcher queues, client and server for one [`BrokerLauncher`].
pub struct LauncherHarness {
    pub memory: InMemoryQueueService,
    pub client: BrokerLauncherClient,
    pub table: Arc<CorrelationTable>,
    /// Writes straight onto the response queue, bypassing the server.
    pub response_writer: Arc<QueueWriter<ResponseEnvelope>>,
    pub request_listener: Arc<QueueListener<CommandEnvelope>>,
    pub response_listener: Arc<QueueListener<ResponseEnvelope>>,
    handles: Vec<JoinHandle<Result<(), ListenerError>>>,
}

impl LauncherHarness {
    pub async fn start(launcher: Arc<dyn BrokerLauncher>, settings: HarnessSettings) -> QueueResult<Self> {
        let memory = InMemoryQueueService::new(settings.visibility_timeout);
        let serializer = Serializer::default();
        let open = |name: String| {
            let memory = memory.clone();
            async move { open_store(IN_MEMORY_CONNECTION_STRING, &name, &memory).await }
        };

        let requests = open(REQUEST_QUEUE.to_string()).await?;
        let responses = open(RESPONSE_QUEUE.to_string()).await?;
        let request_poison = open(poison_queue_name(REQUEST_QUEUE)).await?;
        let response_poison = open(poison_queue_name(RESPONSE_QUEUE)).await?;

        let registry = Arc::new(launcher_registry());
        let table = Arc::new(CorrelationTable::new(Arc::clone(&registry), settings.request_timeout));
        let request_writer = Arc::new(QueueWriter::new(
            Arc::clone(&requests),
            serializer.clone(),
            RetryPolicy::instant(3).build(),
        ));
        let response_writer = Arc::new(QueueWriter::new(
            Arc::clone(&responses),
            serializer.clone(),
            RetryPolicy::instant(3).build(),
        ));
        let request_client = Arc::new(RequestClient::new(request_writer, Arc::clone(&table)));

        let mut server = RequestServer::new(registry, Arc::clone(&response_writer));
        bind_launcher(&mut server, launcher);

        let listener_config = ListenerConfig {
            poll_interval: settings.poll_interval,
            max_delivery_attempts: settings.max_delivery_attempts,
            ..ListenerConfig::default()
        };
        let request_listener = Arc::new(
            QueueListener::new(requests, serializer.clone(), listener_config.clone()).with_dead_letter(request_poison),
        );
        let response_listener = Arc::new(
            QueueListener::new(responses, serializer, listener_config).with_dead_letter(response_poison),
        );

        let handles = vec![
            request_listener.start_listen(Arc::new(server)),
            response_listener.start_listen(request_client.response_router()),
        ];

        Ok(Self {
            memory,
            client: BrokerLauncherClient::new(request_client),
            table,
            response_writer,
            request_listener,
            response_listener,
            handles,
        })
    }

    pub async fn stop(self) {
        self.request_listener.stop_listen();
        self.response_listener.stop_listen();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// A launcher whose answers are fixed up front.
///
/// `create` and `create_durable` answer with `broker_unique_id`. Attaching
/// to a session that was never created faults. `SubmitRequest` echoes the
/// body unless the action is `Fail`.
pub struct ScriptedLauncher {
    pub broker_unique_id: String,
    /// Delay applied to `PingBroker`, to hold a request in flight.
    pub ping_delay: Duration,
    calls: Mutex<Vec<(String, i32)>>,
    created: Mutex<Vec<SessionStartInfo>>,
}

impl ScriptedLauncher {
    pub fn new(broker_unique_id: &str) -> Self {
        Self {
            broker_unique_id: broker_unique_id.to_string(),
            ping_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    /// `(command, session id)` in arrival order.
    pub fn calls(&self) -> Vec<(String, i32)> {
        self.calls.lock().clone()
    }

    pub fn created(&self) -> Vec<SessionStartInfo> {
        self.created.lock().clone()
    }

    fn record(&self, cmd: &str, session_id: i32) {
        self.calls.lock().push((cmd.to_string(), session_id));
    }

    fn result(&self) -> BrokerInitializationResult {
        BrokerInitializationResult {
            broker_unique_id: self.broker_unique_id.clone(),
            broker_epr: vec![format!("broker://scripted/{}", self.broker_unique_id)],
            ..Default::default()
        }
    }
}

#[async_trait]
impl BrokerLauncher for ScriptedLauncher {
    async fn create(&self, info: SessionStartInfo, session_id: i32) -> Result<BrokerInitializationResult, HandlerFault> {
        self.record("Create", session_id);
        self.created.lock().push(info);
        Ok(self.result())
    }

    async fn create_durable(
        &self,
        info: SessionStartInfo,
        session_id: i32,
    ) -> Result<BrokerInitializationResult, HandlerFault> {
        self.record("CreateDurable", session_id);
        self.created.lock().push(info);
        Ok(self.result())
    }

    async fn attach(&self, session_id: i32) -> Result<BrokerInitializationResult, HandlerFault> {
        self.record("Attach", session_id);
        let known = self
            .calls
            .lock()
            .iter()
            .any(|(cmd, id)| cmd.starts_with("Create") && *id == session_id);
        if known {
            Ok(self.result())
        } else {
            Err(HandlerFault::new(
                FaultCode::ApplicationFault,
                format!("session {session_id} not found"),
            ))
        }
    }

    async fn close(&self, session_id: i32) -> Result<(), HandlerFault> {
        self.record("Close", session_id);
        Ok(())
    }

    async fn ping_broker(&self, session_id: i32) -> Result<bool, HandlerFault> {
        self.record("PingBroker", session_id);
        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }
        Ok(session_id % 2 == 0)
    }

    async fn get_active_broker_id_list(&self) -> Result<Vec<i64>, HandlerFault> {
        let calls = self.calls.lock();
        Ok(calls
            .iter()
            .filter(|(cmd, _)| cmd.starts_with("Create"))
            .map(|(_, id)| i64::from(*id))
            .collect())
    }

    async fn submit_request(&self, session_id: i32, action: String, body: Value) -> Result<Value, HandlerFault> {
        self.record("SubmitRequest", session_id);
        if action == "Fail" {
            return Err(HandlerFault::new(FaultCode::ApplicationFault, "scripted failure"));
        }
        Ok(body)
    }
}

/// Broker configuration tuned for fast in-process tests.
pub fn fast_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.queue.poll_interval_ms = 5;
    config.queue.visibility_timeout_ms = 150;
    config.queue.max_delivery_attempts = 2;
    config.retry.max_retry_attempts = 2;
    config.retry.retry_total_time_limit_ms = 0;
    config.retry.backoff = BackoffKind::Instant;
    config.dispatcher.backend_call_timeout_ms = 1_000;
    config.dispatcher.message_retry_limit = 2;
    config.dispatcher.max_concurrent_calls = 4;
    config.client.request_timeout_ms = 5_000;
    config.client.pending_sweep_interval_ms = 50;
    config
}

pub fn start_info(service_name: &str) -> SessionStartInfo {
    SessionStartInfo {
        service_name: service_name.to_string(),
        username: Some("test-user".to_string()),
        ..Default::default()
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
