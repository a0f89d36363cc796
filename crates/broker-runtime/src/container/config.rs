//! # Broker Configuration
//!
//! Plain configuration values grouped by component. Every value has a
//! default and a `BROKER_*` environment override.

use br_02_retry::{BackoffKind, RetryPolicy};
use br_03_queue_transport::{DeserializeFailurePolicy, ListenerConfig, IN_MEMORY_CONNECTION_STRING};
use br_04_correlation::DEFAULT_MAX_DETACHED;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Complete broker configuration.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub dispatcher: DispatcherConfig,
    pub cache: CacheConfig,
    pub client: ClientConfig,
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("Retry max wait {max_ms}ms is below initial wait {initial_ms}ms")]
    WaitRange { initial_ms: u64, max_ms: u64 },

    #[error("Queue name for {field} is empty")]
    EmptyQueueName { field: &'static str },

    #[error("Request and response queues are both named {name}")]
    SameQueueName { name: String },

    #[error("No backend endpoints configured")]
    NoBackendEndpoints,
}

impl BrokerConfig {
    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let env = Overrides { lookup: &lookup };

        env.string("BROKER_QUEUE_CONNECTION_STRING", &mut config.queue.queue_connection_string);
        env.string("BROKER_REQUEST_QUEUE", &mut config.queue.request_queue_name);
        env.string("BROKER_RESPONSE_QUEUE", &mut config.queue.response_queue_name);
        env.parse("BROKER_POLL_INTERVAL_MS", &mut config.queue.poll_interval_ms)?;
        env.parse("BROKER_BATCH_SIZE", &mut config.queue.batch_size)?;
        env.parse("BROKER_VISIBILITY_TIMEOUT_MS", &mut config.queue.visibility_timeout_ms)?;
        env.parse("BROKER_MAX_DELIVERY_ATTEMPTS", &mut config.queue.max_delivery_attempts)?;
        env.parse("BROKER_MAX_DETACHED_COMMANDS", &mut config.queue.max_detached_commands)?;
        env.parse(
            "BROKER_DESERIALIZE_FAILURE_POLICY",
            &mut config.queue.deserialize_failure_policy,
        )?;

        env.parse("BROKER_MAX_RETRY_ATTEMPTS", &mut config.retry.max_retry_attempts)?;
        env.parse("BROKER_RETRY_INITIAL_WAIT_MS", &mut config.retry.retry_initial_wait_ms)?;
        env.parse("BROKER_RETRY_MAX_WAIT_MS", &mut config.retry.retry_max_wait_ms)?;
        env.parse("BROKER_RETRY_TOTAL_TIME_LIMIT_MS", &mut config.retry.retry_total_time_limit_ms)?;
        env.parse("BROKER_RETRY_BACKOFF", &mut config.retry.backoff)?;

        env.parse("BROKER_BACKEND_CALL_TIMEOUT_MS", &mut config.dispatcher.backend_call_timeout_ms)?;
        env.parse("BROKER_MESSAGE_RETRY_LIMIT", &mut config.dispatcher.message_retry_limit)?;
        env.parse("BROKER_MAX_CONCURRENT_CALLS", &mut config.dispatcher.max_concurrent_calls)?;
        env.parse(
            "BROKER_SUPPORTS_CONCURRENT_CALLS",
            &mut config.dispatcher.supports_concurrent_calls,
        )?;
        env.parse(
            "BROKER_MAX_CHANNEL_CREATE_FAILURES",
            &mut config.dispatcher.max_channel_create_failures,
        )?;
        if let Some(endpoints) = lookup("BROKER_BACKEND_ENDPOINTS") {
            config.dispatcher.backend_endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
        }

        env.parse("BROKER_ENDPOINT_TTL_SECS", &mut config.cache.endpoint_ttl_secs)?;
        env.parse("BROKER_CACHE_GC_INTERVAL_SECS", &mut config.cache.gc_interval_secs)?;

        env.parse("BROKER_REQUEST_TIMEOUT_MS", &mut config.client.request_timeout_ms)?;
        env.parse(
            "BROKER_PENDING_SWEEP_INTERVAL_MS",
            &mut config.client.pending_sweep_interval_ms,
        )?;

        Ok(config)
    }

    /// Reject inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let queue = &self.queue;
        if queue.request_queue_name.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName {
                field: "request_queue_name",
            });
        }
        if queue.response_queue_name.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName {
                field: "response_queue_name",
            });
        }
        if queue.request_queue_name == queue.response_queue_name {
            return Err(ConfigError::SameQueueName {
                name: queue.request_queue_name.clone(),
            });
        }
        if queue.batch_size == 0 {
            return Err(ConfigError::Zero { field: "batch_size" });
        }
        if queue.max_delivery_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max_delivery_attempts",
            });
        }
        if queue.max_detached_commands == 0 {
            return Err(ConfigError::Zero {
                field: "max_detached_commands",
            });
        }

        let retry = &self.retry;
        if retry.max_retry_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max_retry_attempts",
            });
        }
        if retry.retry_max_wait_ms < retry.retry_initial_wait_ms {
            return Err(ConfigError::WaitRange {
                initial_ms: retry.retry_initial_wait_ms,
                max_ms: retry.retry_max_wait_ms,
            });
        }

        let dispatcher = &self.dispatcher;
        if dispatcher.message_retry_limit == 0 {
            return Err(ConfigError::Zero {
                field: "message_retry_limit",
            });
        }
        if dispatcher.backend_call_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "backend_call_timeout_ms",
            });
        }
        if dispatcher.max_concurrent_calls == 0 {
            return Err(ConfigError::Zero {
                field: "max_concurrent_calls",
            });
        }
        if dispatcher.backend_endpoints.is_empty() {
            return Err(ConfigError::NoBackendEndpoints);
        }

        if self.client.request_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "request_timeout_ms",
            });
        }
        Ok(())
    }
}

struct Overrides<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Overrides<'_, F> {
    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = (self.lookup)(key) {
            *target = value;
        }
    }

    fn parse<T>(&self, key: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = (self.lookup)(key) {
            *target = value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Queue transport configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `UseInMemoryQueue=true` or `redis://...`
    pub queue_connection_string: String,
    pub request_queue_name: String,
    pub response_queue_name: String,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// Lease duration of a dequeued message.
    pub visibility_timeout_ms: u64,
    pub max_delivery_attempts: u32,
    /// Long-running commands (`SubmitRequest`) in flight at once.
    pub max_detached_commands: usize,
    pub deserialize_failure_policy: DeserializeFailurePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_connection_string: IN_MEMORY_CONNECTION_STRING.to_string(),
            request_queue_name: "broker-launcher-requests".to_string(),
            response_queue_name: "broker-launcher-responses".to_string(),
            poll_interval_ms: 500,
            batch_size: 10,
            visibility_timeout_ms: 30_000,
            max_delivery_attempts: 5,
            max_detached_commands: DEFAULT_MAX_DETACHED,
            deserialize_failure_policy: DeserializeFailurePolicy::DeadLetter,
        }
    }
}

impl QueueConfig {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            max_delivery_attempts: self.max_delivery_attempts,
            deserialize_failure_policy: self.deserialize_failure_policy,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }
}

/// Retry policy constants shared by queue writes and backend calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retry_attempts: u32,
    pub retry_initial_wait_ms: u64,
    pub retry_max_wait_ms: u64,
    /// Zero disables the time budget.
    pub retry_total_time_limit_ms: u64,
    pub backoff: BackoffKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_initial_wait_ms: 100,
            retry_max_wait_ms: 10_000,
            retry_total_time_limit_ms: 60_000,
            backoff: BackoffKind::RandomizedExponential,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            initial_wait: Duration::from_millis(self.retry_initial_wait_ms),
            max_wait: Duration::from_millis(self.retry_max_wait_ms),
            total_time_limit: (self.retry_total_time_limit_ms > 0)
                .then(|| Duration::from_millis(self.retry_total_time_limit_ms)),
            backoff: self.backoff,
        }
    }
}

/// Backend dispatch configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub backend_call_timeout_ms: u64,
    /// Dispatch cycles a request may exhaust before it fails.
    pub message_retry_limit: u32,
    pub max_concurrent_calls: usize,
    /// Whether one backend channel may carry concurrent calls.
    pub supports_concurrent_calls: bool,
    pub max_channel_create_failures: u32,
    /// One dispatcher per endpoint per session.
    pub backend_endpoints: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            backend_call_timeout_ms: 60_000,
            message_retry_limit: 3,
            max_concurrent_calls: 16,
            supports_concurrent_calls: false,
            max_channel_create_failures: 3,
            backend_endpoints: vec!["loopback://echo".to_string()],
        }
    }
}

impl DispatcherConfig {
    /// Worker settings for one session. The session may shorten the
    /// backend call timeout.
    pub fn worker_config(
        &self,
        session_id: i32,
        timeout_override_ms: Option<u64>,
    ) -> br_05_dispatcher::DispatcherConfig {
        let timeout_ms = timeout_override_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.backend_call_timeout_ms);
        br_05_dispatcher::DispatcherConfig {
            session_id,
            backend_call_timeout: Duration::from_millis(timeout_ms),
            message_retry_limit: self.message_retry_limit,
            max_concurrent_calls: self.max_concurrent_calls,
            supports_concurrent_calls: self.supports_concurrent_calls,
            max_channel_create_failures: self.max_channel_create_failures,
        }
    }
}

/// Endpoint resolution cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub endpoint_ttl_secs: u64,
    pub gc_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            endpoint_ttl_secs: 300,
            gc_interval_secs: 60,
        }
    }
}

/// Launcher client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout_ms: u64,
    pub pending_sweep_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            pending_sweep_interval_ms: 1_000,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.pending_sweep_interval_ms.max(1))
    }
}
