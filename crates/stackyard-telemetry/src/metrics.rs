//! Prometheus metrics for Stackyard nodes.
//!
//! All metrics follow the naming convention: `sy_<area>_<metric>_<unit>`.
//! Metrics are created once in a private registry; if creation fails the
//! recorders become no-ops instead of panicking.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

/// All node metrics, registered in their own registry.
pub struct Metrics {
    pub registry: Registry,

    // =========================================================================
    // MESSAGING
    // =========================================================================
    /// Messages published, by message kind
    pub messages_sent: CounterVec,
    /// Messages taken from a queue, by message kind
    pub messages_received: CounterVec,
    /// Publications that failed
    pub messages_failed: Counter,
    /// Messages waiting for their machine to come alive
    pub awaiting_messages: IntGauge,

    // =========================================================================
    // LIFECYCLE
    // =========================================================================
    /// Requested transitions, by transition and outcome
    pub transitions: CounterVec,
    /// Plugin failures, by operation
    pub plugin_failures: CounterVec,

    // =========================================================================
    // MACHINES
    // =========================================================================
    /// Heartbeats received by the DM
    pub heartbeats: Counter,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let metrics = Self {
            messages_sent: CounterVec::new(
                Opts::new("sy_messaging_messages_sent_total", "Messages published"),
                &["kind"],
            )
            .map_err(init_error)?,
            messages_received: CounterVec::new(
                Opts::new("sy_messaging_messages_received_total", "Messages consumed from a queue"),
                &["kind"],
            )
            .map_err(init_error)?,
            messages_failed: Counter::new(
                "sy_messaging_messages_failed_total",
                "Publications that could not be delivered",
            )
            .map_err(init_error)?,
            awaiting_messages: IntGauge::new(
                "sy_messaging_awaiting_messages",
                "Messages queued until their machine is alive",
            )
            .map_err(init_error)?,
            transitions: CounterVec::new(
                Opts::new("sy_lifecycle_transitions_total", "Requested lifecycle transitions"),
                &["transition", "outcome"],
            )
            .map_err(init_error)?,
            plugin_failures: CounterVec::new(
                Opts::new("sy_lifecycle_plugin_failures_total", "Plugin failures"),
                &["operation"],
            )
            .map_err(init_error)?,
            heartbeats: Counter::new("sy_machines_heartbeats_total", "Heartbeats received by the DM")
                .map_err(init_error)?,
            registry,
        };

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.messages_sent.clone()),
            Box::new(metrics.messages_received.clone()),
            Box::new(metrics.messages_failed.clone()),
            Box::new(metrics.awaiting_messages.clone()),
            Box::new(metrics.transitions.clone()),
            Box::new(metrics.plugin_failures.clone()),
            Box::new(metrics.heartbeats.clone()),
        ];
        for collector in collectors {
            metrics.registry.register(collector).map_err(init_error)?;
        }
        Ok(metrics)
    }
}

fn init_error(e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsInit(e.to_string())
}

lazy_static! {
    static ref METRICS: Option<Metrics> = Metrics::new().ok();
}

/// Global metrics, `None` if they could not be created.
#[must_use]
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.as_ref()
}

pub fn record_message_sent(kind: &str) {
    if let Some(m) = metrics() {
        m.messages_sent.with_label_values(&[kind]).inc();
    }
}

pub fn record_message_received(kind: &str) {
    if let Some(m) = metrics() {
        m.messages_received.with_label_values(&[kind]).inc();
    }
}

pub fn record_message_failed() {
    if let Some(m) = metrics() {
        m.messages_failed.inc();
    }
}

pub fn set_awaiting_messages(count: usize) {
    if let Some(m) = metrics() {
        m.awaiting_messages
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

/// `outcome` is `reached` or `not_reached`.
pub fn record_transition(transition: &str, outcome: &str) {
    if let Some(m) = metrics() {
        m.transitions.with_label_values(&[transition, outcome]).inc();
    }
}

pub fn record_plugin_failure(operation: &str) {
    if let Some(m) = metrics() {
        m.plugin_failures.with_label_values(&[operation]).inc();
    }
}

pub fn record_heartbeat() {
    if let Some(m) = metrics() {
        m.heartbeats.inc();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let m = metrics().ok_or_else(|| TelemetryError::MetricsInit("metrics unavailable".to_string()))?;
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buffer)
        .map_err(init_error)?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
