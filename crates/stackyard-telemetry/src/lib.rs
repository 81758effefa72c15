//! # Stackyard Telemetry
//!
//! Logging, tracing and metrics shared by the DM and the agents.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stackyard_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SY_SERVICE_NAME` | `stackyard` | Service name in logs and traces |
//! | `SY_LOG_LEVEL` | `info` | Log filter (`RUST_LOG` wins) |
//! | `SY_JSON_LOGS` | `false` | JSON formatted logs |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | OTLP trace export |
//! | `SY_METRICS_PORT` | `9100` | Prometheus port |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, record_heartbeat, record_message_failed, record_message_received,
    record_message_sent, record_plugin_failure, record_transition, set_awaiting_messages, Metrics,
};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, tracing and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending traces.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    if metrics::metrics().is_none() {
        return Err(TelemetryError::MetricsInit(
            "metrics could not be registered".to_string(),
        ));
    }
    let tracing = tracing_setup::init_tracing(&config)?;
    Ok(TelemetryGuard {
        _tracing: tracing,
        config,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    config: TelemetryConfig,
}

impl TelemetryGuard {
    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.config.service_name, "Shutting down telemetry");
    }
}
