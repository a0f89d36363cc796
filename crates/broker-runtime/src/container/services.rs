//! # Broker Container
//!
//! Wires the launcher request/response queues, the correlation layer and
//! the session launcher from one [`BrokerConfig`].
//!
//! ## Startup Order
//!
//! 1. Open queue stores (request, response and their poison queues)
//! 2. Build writers, listeners and the correlation table
//! 3. Bind the launcher commands to the session launcher
//! 4. `start`: spawn both listeners and the pending-request sweep
//!
//! Shutdown runs the other way: listeners stop, sessions close, detached
//! commands drain, then the container token is cancelled.

use super::config::BrokerConfig;
use crate::adapters::{BackendResolver, MetricsObserver};
use crate::launcher::{bind_launcher, launcher_registry, BrokerLauncherClient, SessionBrokerLauncher};
use br_01_serializer::Serializer;
use br_03_queue_transport::{
    open_store, poison_queue_name, DurableQueueStore, InMemoryQueueService, ListenerError, QueueListener,
    QueueResult, QueueWriter,
};
use br_04_correlation::{sweep_task, CorrelationTable, RequestClient, RequestServer};
use br_05_dispatcher::InMemoryResponseJournal;
use broker_telemetry::{gather_metrics, log_event, register_metrics, TelemetryError};
use parking_lot::Mutex;
use shared_types::{CommandEnvelope, ResponseEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct QueuePair {
    store: Arc<dyn DurableQueueStore>,
    poison: Arc<dyn DurableQueueStore>,
}

async fn open_pair(config: &BrokerConfig, name: &str, memory: &InMemoryQueueService) -> QueueResult<QueuePair> {
    let conn = &config.queue.queue_connection_string;
    Ok(QueuePair {
        store: open_store(conn, name, memory).await?,
        poison: open_store(conn, &poison_queue_name(name), memory).await?,
    })
}

/// Every broker service, built once at startup.
pub struct BrokerContainer {
    pub config: BrokerConfig,
    memory: InMemoryQueueService,
    table: Arc<CorrelationTable>,
    client: BrokerLauncherClient,
    launcher: Arc<SessionBrokerLauncher>,
    resolver: Arc<BackendResolver>,
    observer: Arc<MetricsObserver>,
    journal: Arc<InMemoryResponseJournal>,
    server: Arc<RequestServer>,
    request_listener: Arc<QueueListener<CommandEnvelope>>,
    response_listener: Arc<QueueListener<ResponseEnvelope>>,
    listener_handles: Mutex<Vec<JoinHandle<Result<(), ListenerError>>>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl BrokerContainer {
    pub async fn build(config: BrokerConfig) -> QueueResult<Self> {
        let memory = InMemoryQueueService::new(config.queue.visibility_timeout());
        Self::build_with_memory(config, memory).await
    }

    /// Build on an existing in-memory queue service, so several containers
    /// (or a restarted one) share the same in-memory queues.
    pub async fn build_with_memory(config: BrokerConfig, memory: InMemoryQueueService) -> QueueResult<Self> {
        if let Err(e) = register_metrics() {
            log_event!(warn, "runtime", "Metrics registry unavailable", error = %e);
        }
        let shutdown = CancellationToken::new();
        let serializer = Serializer::default();
        let retry = config.retry.policy();

        let requests = open_pair(&config, &config.queue.request_queue_name, &memory).await?;
        let responses = open_pair(&config, &config.queue.response_queue_name, &memory).await?;

        let registry = Arc::new(launcher_registry());
        let table = Arc::new(CorrelationTable::new(
            Arc::clone(&registry),
            config.client.request_timeout(),
        ));

        let request_writer = Arc::new(
            QueueWriter::new(Arc::clone(&requests.store), serializer.clone(), retry.build())
                .with_cancellation(shutdown.child_token()),
        );
        let response_writer = Arc::new(
            QueueWriter::new(Arc::clone(&responses.store), serializer.clone(), retry.build())
                .with_cancellation(shutdown.child_token()),
        );
        let client = BrokerLauncherClient::new(Arc::new(RequestClient::new(request_writer, Arc::clone(&table))));

        let resolver = Arc::new(BackendResolver::new(
            Duration::from_secs(config.cache.endpoint_ttl_secs),
            Duration::from_secs(config.cache.gc_interval_secs),
        ));
        let observer = Arc::new(MetricsObserver::new());
        let journal = Arc::new(InMemoryResponseJournal::new());
        let launcher = Arc::new(SessionBrokerLauncher::new(
            config.dispatcher.clone(),
            config.retry.clone(),
            Arc::clone(&resolver),
            observer.clone(),
            journal.clone(),
            &shutdown,
        ));

        let mut server = RequestServer::new(registry, response_writer)
            .with_max_detached(config.queue.max_detached_commands)
            .with_cancellation(shutdown.child_token());
        bind_launcher(&mut server, launcher.clone());

        let listener_config = config.queue.listener_config();
        let request_listener = Arc::new(
            QueueListener::new(requests.store, serializer.clone(), listener_config.clone())
                .with_dead_letter(requests.poison),
        );
        let response_listener = Arc::new(
            QueueListener::new(responses.store, serializer, listener_config).with_dead_letter(responses.poison),
        );

        log_event!(info, "runtime", "Broker container built",
            request_queue = %config.queue.request_queue_name,
            response_queue = %config.queue.response_queue_name,
            backends = config.dispatcher.backend_endpoints.len());

        Ok(Self {
            config,
            memory,
            table,
            client,
            launcher,
            resolver,
            observer,
            journal,
            server: Arc::new(server),
            request_listener,
            response_listener,
            listener_handles: Mutex::new(Vec::new()),
            sweep_handle: Mutex::new(None),
            shutdown,
        })
    }

    /// Spawn the listeners and the pending-request sweep.
    pub fn start(&self) {
        let mut handles = self.listener_handles.lock();
        handles.push(self.request_listener.start_listen(self.server.clone()));
        handles.push(self.response_listener.start_listen(self.client.request_client().response_router()));

        *self.sweep_handle.lock() = Some(tokio::spawn(sweep_task(
            Arc::clone(&self.table),
            self.config.client.sweep_interval(),
            self.shutdown.child_token(),
        )));
        log_event!(info, "runtime", "Broker started");
    }

    /// Stop listening, close every session and wait for background tasks.
    ///
    /// Sessions close before the request server drains, so a `SubmitRequest`
    /// still in flight answers its client with a `Cancelled` fault.
    pub async fn shutdown(&self) {
        log_event!(info, "runtime", "Initiating graceful shutdown");
        self.request_listener.stop_listen();
        self.response_listener.stop_listen();
        // Closing first frees detached slots the listener may be waiting on.
        self.launcher.close_all().await;
        let handles = std::mem::take(&mut *self.listener_handles.lock());
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log_event!(warn, "runtime", "Listener ended with error", error = %e),
                Err(e) => log_event!(error, "runtime", "Listener task failed", error = %e),
            }
        }

        // Sessions created by the listener's last batch.
        self.launcher.close_all().await;
        self.server.shutdown().await;
        self.shutdown.cancel();

        let sweep = self.sweep_handle.lock().take();
        if let Some(sweep) = sweep {
            if let Err(e) = sweep.await {
                log_event!(error, "runtime", "Sweep task failed", error = %e);
            }
        }
        log_event!(info, "runtime", "Shutdown complete");
    }

    /// Every broker metric in Prometheus text format.
    pub fn render_metrics(&self) -> Result<String, TelemetryError> {
        gather_metrics()
    }

    pub fn client(&self) -> &BrokerLauncherClient {
        &self.client
    }

    pub fn launcher(&self) -> &Arc<SessionBrokerLauncher> {
        &self.launcher
    }

    pub fn resolver(&self) -> &Arc<BackendResolver> {
        &self.resolver
    }

    pub fn observer(&self) -> &Arc<MetricsObserver> {
        &self.observer
    }

    pub fn journal(&self) -> &Arc<InMemoryResponseJournal> {
        &self.journal
    }

    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub fn memory_queues(&self) -> &InMemoryQueueService {
        &self.memory
    }
}
