//! Observability setup for the pizza service.
//!
//! Provides tracing subscriber configuration, the Prometheus recorder used for
//! the telemetry pipeline's own health counters, and the names of every metric
//! the service emits or exports.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with JSON output and env filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Initialize tracing with human-readable output (for development).
pub fn init_tracing_dev() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize the Prometheus recorder for pipeline health counters.
/// Returns a handle that can render metrics in Prometheus format.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Common metric and log labels.
pub mod labels {
    pub const SOURCE: &str = "source";
    pub const ENV: &str = "env";
    pub const STREAM: &str = "stream";
    pub const METHOD: &str = "method";
    pub const ROUTE: &str = "route";
    pub const STATUS: &str = "status";
    pub const OUTCOME: &str = "outcome";
    pub const SINK: &str = "sink";
}

/// Names of the metrics pushed to the OTLP collector.
pub mod exported {
    pub const HTTP_REQUESTS: &str = "http_requests_total";
    pub const ENDPOINT_LATENCY: &str = "endpoint_latency_milliseconds_total";
    pub const ACTIVE_USERS: &str = "active_users";
    pub const AUTH_ATTEMPTS: &str = "auth_attempts_total";
    pub const CPU_PERCENT: &str = "cpu_percent";
    pub const MEMORY_PERCENT: &str = "memory_percent";
    pub const PIZZAS_SOLD: &str = "pizzas_sold_total";
    pub const PIZZA_FAILURES: &str = "pizza_failures_total";
    pub const REVENUE: &str = "revenue_millicents_total";
    pub const PIZZA_CREATION_LATENCY: &str = "pizza_creation_latency_milliseconds_total";
}

/// Health counters for the telemetry pipeline itself, scraped from `/metrics`.
pub mod pipeline {
    pub const PUSHES: &str = "telemetry_pushes_total";
    pub const PUSH_DURATION: &str = "telemetry_push_duration_seconds";
    pub const TICKS_SKIPPED: &str = "telemetry_export_ticks_skipped_total";
    pub const LOG_ENTRIES_ENQUEUED: &str = "telemetry_log_entries_enqueued_total";
    pub const LOG_ENTRIES_SHIPPED: &str = "telemetry_log_entries_shipped_total";
    pub const LOG_ENTRIES_DROPPED: &str = "telemetry_log_entries_dropped_total";
    pub const LOG_QUEUE_DEPTH: &str = "telemetry_log_queue_depth";
}
