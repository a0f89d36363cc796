//! Prometheus metrics for the broker.
//!
//! All metrics follow the naming convention: `broker_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::sync::Once;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // DISPATCHER
    // =========================================================================

    /// Requests sent to a backend (one per dispatch attempt)
    pub static ref REQUESTS_DISPATCHED: Counter = Counter::new(
        "broker_dispatcher_requests_dispatched_total",
        "Total dispatch attempts sent to backends"
    ).expect("metric creation failed");

    /// Terminal dispositions by outcome (reply, fault, exhausted)
    pub static ref REQUESTS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("broker_dispatcher_requests_completed_total", "Terminal request dispositions"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Requests put back to the queue by reason (preempted, retry_requested, exhausted_locally)
    pub static ref REQUESTS_REQUEUED: CounterVec = CounterVec::new(
        Opts::new("broker_dispatcher_requests_requeued_total", "Requests put back to the broker queue"),
        &["reason"]
    ).expect("metric creation failed");

    /// Backend calls retried on the same channel
    pub static ref BACKEND_CALL_RETRIES: Counter = Counter::new(
        "broker_dispatcher_backend_call_retries_total",
        "Backend call retries after communication failures"
    ).expect("metric creation failed");

    /// Backend channel recreations
    pub static ref CHANNEL_RECREATIONS: Counter = Counter::new(
        "broker_dispatcher_channel_recreations_total",
        "Backend channels created or recycled"
    ).expect("metric creation failed");

    /// End-to-end request duration
    pub static ref REQUEST_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "broker_dispatcher_request_duration_seconds",
            "Time from acceptance to terminal disposition"
        ).buckets(exponential_buckets(0.001, 2.0, 16).expect("metric creation failed"))
    ).expect("metric creation failed");

    /// One backend invocation, reply or not
    pub static ref BACKEND_CALL_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "broker_dispatcher_backend_call_duration_seconds",
            "Duration of single backend calls"
        ).buckets(exponential_buckets(0.001, 2.0, 16).expect("metric creation failed"))
    ).expect("metric creation failed");

    // =========================================================================
    // QUEUE TRANSPORT
    // =========================================================================

    /// Queue messages by operation (written, read, dead_lettered, deserialize_failed)
    pub static ref QUEUE_MESSAGES: CounterVec = CounterVec::new(
        Opts::new("broker_queue_messages_total", "Queue message operations"),
        &["queue", "operation"]
    ).expect("metric creation failed");

    // =========================================================================
    // CORRELATION
    // =========================================================================

    /// Requests awaiting a response
    pub static ref PENDING_REQUESTS: Gauge = Gauge::new(
        "broker_correlation_pending_requests",
        "Requests awaiting a correlated response"
    ).expect("metric creation failed");

    /// Responses rejected for unknown id, unknown command or wrong type
    pub static ref PROTOCOL_VIOLATIONS: CounterVec = CounterVec::new(
        Opts::new("broker_correlation_protocol_violations_total", "Rejected responses"),
        &["kind"]
    ).expect("metric creation failed");
}

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; later calls are no-ops.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let mut result = Ok(());
    REGISTER.call_once(|| {
        let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(REQUESTS_DISPATCHED.clone()),
            Box::new(REQUESTS_COMPLETED.clone()),
            Box::new(REQUESTS_REQUEUED.clone()),
            Box::new(BACKEND_CALL_RETRIES.clone()),
            Box::new(CHANNEL_RECREATIONS.clone()),
            Box::new(REQUEST_DURATION.clone()),
            Box::new(BACKEND_CALL_DURATION.clone()),
            Box::new(QUEUE_MESSAGES.clone()),
            Box::new(PENDING_REQUESTS.clone()),
            Box::new(PROTOCOL_VIOLATIONS.clone()),
        ];

        for metric in metrics {
            if let Err(e) = REGISTRY.register(metric) {
                result = Err(TelemetryError::MetricsInit(e.to_string()));
                return;
            }
        }
    });
    result
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
