//! Prometheus metrics for replication traffic.
//!
//! Series:
//!
//! - `lapsync_deltas_sent_total{channel}`
//! - `lapsync_deltas_received_total{channel}`
//! - `lapsync_deltas_dropped_total{reason}`
//! - `lapsync_merges_total{changed}`
//! - `lapsync_catch_up_total{outcome}`
//! - `lapsync_registered_channels`
//! - `lapsync_replay_duration_seconds`
//! - `lapsync_errors_total{code,category,severity}` (recorded by the error type)
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for replay durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]
}

/// Holds the Prometheus handle when a recorder was installed.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder behind it.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!("lapsync_deltas_sent_total", "Messages published per channel");
    describe_counter!("lapsync_deltas_received_total", "Messages received per channel");
    describe_counter!(
        "lapsync_deltas_dropped_total",
        "Inbound messages dropped without touching state"
    );
    describe_counter!("lapsync_merges_total", "Remote merges, by whether they changed state");
    describe_counter!("lapsync_catch_up_total", "Catch-up requests by outcome");
    describe_gauge!("lapsync_registered_channels", "Channels with a live container");
    describe_histogram!(
        "lapsync_replay_duration_seconds",
        "Time to replay a watch from its base and log"
    );
    describe_counter!("lapsync_errors_total", "Errors by code, category and severity");
}

/// Recording helpers for the replication series.
pub struct SyncMetrics;

impl SyncMetrics {
    pub fn delta_sent(channel: &str) {
        counter!("lapsync_deltas_sent_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn delta_received(channel: &str) {
        counter!("lapsync_deltas_received_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn delta_dropped(reason: &str) {
        counter!("lapsync_deltas_dropped_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn merge(changed: bool) {
        counter!("lapsync_merges_total", "changed" => changed.to_string()).increment(1);
    }

    pub fn catch_up(outcome: &str) {
        counter!("lapsync_catch_up_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn set_registered_channels(count: usize) {
        gauge!("lapsync_registered_channels").set(count as f64);
    }

    pub fn replay(duration: Duration) {
        histogram!("lapsync_replay_duration_seconds").record(duration.as_secs_f64());
    }
}
