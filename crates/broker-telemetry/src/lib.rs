//! # Broker Telemetry
//!
//! Observability for the broker dispatch core.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with an env filter and a JSON or
//!   human-readable layer. Every event carries a `facility` field set through
//!   [`log_event!`], so there is one logging interface for all components.
//! - **Metrics**: Prometheus counters, gauges and histograms in a process
//!   registry, rendered with [`gather_metrics`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_telemetry(&config)?;
//! broker_telemetry::log_event!(info, "runtime", "Broker started", queue = "requests");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BROKER_SERVICE_NAME` | `broker` | Service name in log records |
//! | `BROKER_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `BROKER_JSON_LOGS` | container: `true` | JSON formatted logs |
//! | `BROKER_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{gather_metrics, register_metrics, HistogramTimer};

// Re-exported so `log_event!` resolves in crates without a direct dependency.
#[doc(hidden)]
pub use tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and register all metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)?;
    Ok(())
}
