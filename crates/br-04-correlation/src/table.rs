//! Correlation Table - pending requests keyed by request id.
//!
//! Entries are in memory only. Durability comes from the queues: after a
//! restart the table is empty and pending work is re-derived by re-reading
//! the request queue, not by recovering entries.

use crate::error::{CorrelationError, CorrelationResult};
use crate::registry::CommandRegistry;
use broker_telemetry::log_event;
use broker_telemetry::metrics::{PENDING_REQUESTS, PROTOCOL_VIOLATIONS};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::{RequestId, ResponseBody, ResponseEnvelope, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a pending awaiter eventually receives.
pub type Completion = Result<Value, CorrelationError>;

/// A pending request waiting for its response
struct PendingEntry {
    sender: oneshot::Sender<Completion>,
    cmd_name: String,
    created_at: Instant,
    timeout: Duration,
}

/// Statistics for the correlation table
#[derive(Debug, Default)]
pub struct CorrelationStats {
    pub registered: AtomicU64,
    pub completed: AtomicU64,
    /// Awaiter gave up or was dropped
    pub cancelled: AtomicU64,
    pub timeouts: AtomicU64,
    pub protocol_violations: AtomicU64,
}

/// Map from outstanding request id to its completion handle.
///
/// Insert and remove are atomic per key; no wider lock is taken.
pub struct CorrelationTable {
    pending: DashMap<RequestId, PendingEntry>,
    registry: Arc<CommandRegistry>,
    default_timeout: Duration,
    stats: CorrelationStats,
}

impl CorrelationTable {
    pub fn new(registry: Arc<CommandRegistry>, default_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            registry,
            default_timeout,
            stats: CorrelationStats::default(),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a pending request and get its completion receiver.
    ///
    /// Fails for commands without a registered response type and for ids
    /// that are already pending.
    pub fn register(
        &self,
        request_id: RequestId,
        cmd_name: &str,
        timeout: Option<Duration>,
    ) -> CorrelationResult<oneshot::Receiver<Completion>> {
        self.registry.expected_kind(cmd_name)?;

        let (tx, rx) = oneshot::channel();
        match self.pending.entry(request_id) {
            Entry::Occupied(_) => return Err(CorrelationError::DuplicateRequestId { request_id }),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    sender: tx,
                    cmd_name: cmd_name.to_string(),
                    created_at: Instant::now(),
                    timeout: timeout.unwrap_or(self.default_timeout),
                });
            }
        }

        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        PENDING_REQUESTS.inc();
        log_event!(debug, "correlation", "Registered pending request", request_id = %request_id, cmd_name);
        Ok(rx)
    }

    /// Route a response to its pending request.
    ///
    /// The entry is removed atomically. A fault body resolves the awaiter
    /// with [`CorrelationError::Fault`] and is not a protocol violation.
    /// Unknown commands and wrong value kinds fail the awaiter and are
    /// returned as errors; an unknown id is returned as an error.
    pub fn receive_response(&self, envelope: ResponseEnvelope) -> CorrelationResult<()> {
        let request_id = envelope.request_id;
        let Some((_, entry)) = self.pending.remove(&request_id) else {
            return Err(self.violation(CorrelationError::UnknownRequestId { request_id }));
        };
        PENDING_REQUESTS.dec();

        let outcome = self.check(&entry, envelope);
        let violation = match &outcome {
            Err(e) if e.is_protocol_violation() => Some(self.violation(e.clone())),
            _ => None,
        };

        let elapsed = entry.created_at.elapsed();
        if entry.sender.send(outcome).is_err() {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            log_event!(debug, "correlation", "Pending request receiver dropped", request_id = %request_id);
        } else {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
            log_event!(
                debug,
                "correlation",
                "Completed pending request",
                request_id = %request_id,
                cmd_name = %entry.cmd_name,
                response_time_ms = elapsed.as_millis() as u64
            );
        }

        match violation {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Type-checked setter for one response.
    fn check(&self, entry: &PendingEntry, envelope: ResponseEnvelope) -> Completion {
        if envelope.cmd_name != entry.cmd_name {
            return Err(CorrelationError::CommandMismatch {
                request_id: envelope.request_id,
                expected: entry.cmd_name.clone(),
                actual: envelope.cmd_name,
            });
        }
        let expected = self.registry.expected_kind(&envelope.cmd_name)?;

        match envelope.response {
            ResponseBody::Fault(fault) => Err(CorrelationError::Fault(fault)),
            ResponseBody::Value(value) if expected.accepts(&value) => Ok(value),
            ResponseBody::Value(value) => Err(CorrelationError::TypeMismatch {
                cmd_name: envelope.cmd_name,
                expected: expected.to_string(),
                actual: value.kind().to_string(),
            }),
        }
    }

    fn violation(&self, error: CorrelationError) -> CorrelationError {
        self.stats.protocol_violations.fetch_add(1, Ordering::Relaxed);
        PROTOCOL_VIOLATIONS
            .with_label_values(&[error.violation_kind()])
            .inc();
        log_event!(error, "correlation", "Protocol violation on response", error = %error);
        error
    }

    /// Remove a pending request without resolving it.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        if self.pending.remove(request_id).is_some() {
            PENDING_REQUESTS.dec();
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Drop entries older than their timeout. Their awaiters see `Cancelled`.
    ///
    /// Returns the number of requests removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.pending.retain(|id, entry| {
            let elapsed = now.duration_since(entry.created_at);
            if elapsed > entry.timeout {
                log_event!(
                    warn,
                    "correlation",
                    "Removing expired pending request",
                    request_id = %id,
                    cmd_name = %entry.cmd_name,
                    elapsed_ms = elapsed.as_millis() as u64
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.stats
                .timeouts
                .fetch_add(removed as u64, Ordering::Relaxed);
            PENDING_REQUESTS.sub(removed as f64);
        }
        removed
    }

    pub(crate) fn record_timeout(&self) {
        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }
}

/// Background sweep of expired entries until `cancel` fires.
pub async fn sweep_task(table: Arc<CorrelationTable>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = table.remove_expired();
                if removed > 0 {
                    log_event!(debug, "correlation", "Swept expired pending requests", removed);
                }
            }
        }
    }
}
