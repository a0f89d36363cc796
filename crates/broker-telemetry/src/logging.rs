//! Structured logging.
//!
//! One subscriber for the whole process. Records carry a `facility` field
//! naming the component that emitted them (`queue`, `correlation`,
//! `dispatcher`, `retry`, `runtime`), so filtering by component is a field
//! query rather than a logger hierarchy.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match (config.console_output, config.json_logs) {
        (false, _) => registry.try_init(),
        (true, true) => {
            // JSON output for containers/production
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            registry.with(json_layer).try_init()
        }
        (true, false) => {
            // Pretty output for development
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(true);
            registry.with(fmt_layer).try_init()
        }
    }
    .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

/// Emit a structured event tagged with a facility.
///
/// ```rust,ignore
/// log_event!(warn, "dispatcher", "Backend call failed", endpoint = %ep, attempt = 2);
/// ```
#[macro_export]
macro_rules! log_event {
    (info, $facility:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::tracing::info!(facility = $facility, $($($field)*,)? $msg)
    };
    (warn, $facility:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::tracing::warn!(facility = $facility, $($($field)*,)? $msg)
    };
    (error, $facility:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::tracing::error!(facility = $facility, $($($field)*,)? $msg)
    };
    (debug, $facility:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::tracing::debug!(facility = $facility, $($($field)*,)? $msg)
    };
    (trace, $facility:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::tracing::trace!(facility = $facility, $($($field)*,)? $msg)
    };
}
