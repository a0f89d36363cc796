//! # Broker Runtime
//!
//! Hosts the broker launcher service: a request listener dispatching
//! launcher commands to broker sessions, and the response side of the
//! launcher client.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging, metrics registry)
//! 2. Load configuration from `BROKER_*` environment variables and validate it
//! 3. Open queue stores and wire the container
//! 4. Start listeners and the pending-request sweep
//! 5. With `BROKER_DEMO=1`, run a self-check round trip against the echo backend
//! 6. Wait for Ctrl+C, then shut down gracefully

use anyhow::{ensure, Context, Result};
use broker_runtime::{BrokerConfig, BrokerContainer};
use broker_telemetry::{init_telemetry, TelemetryConfig};
use shared_types::{SessionStartInfo, Value};
use tracing::{info, warn};

const DEMO_SESSION_ID: i32 = 1;

/// Create a session, echo one request through it and close it again.
async fn run_self_check(container: &BrokerContainer) -> Result<()> {
    let client = container.client();
    let info = SessionStartInfo {
        service_name: "echo".to_string(),
        ..Default::default()
    };

    let broker = client
        .create(info, DEMO_SESSION_ID)
        .await
        .context("Create failed")?;
    info!(broker_unique_id = %broker.broker_unique_id, "Demo session created");

    let body = Value::String("ping".to_string());
    let reply = client
        .submit_request(DEMO_SESSION_ID, "Echo", body.clone())
        .await
        .context("SubmitRequest failed")?;
    ensure!(reply == body, "echo backend returned {:?}", reply);

    client.close(DEMO_SESSION_ID).await.context("Close failed")?;
    info!("Self-check passed");
    Ok(())
}

fn demo_enabled() -> bool {
    std::env::var("BROKER_DEMO")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = BrokerConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("===========================================");
    info!("  Broker Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("  Service: {}", telemetry.service_name);
    info!("===========================================");

    let container = BrokerContainer::build(config)
        .await
        .context("Failed to open broker queues")?;
    container.start();

    if demo_enabled() {
        run_self_check(&container).await?;
    }

    info!("Broker is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    container.shutdown().await;
    match container.render_metrics() {
        Ok(metrics) => info!(%metrics, "Final metrics"),
        Err(e) => warn!(error = %e, "Could not render metrics"),
    }
    Ok(())
}
