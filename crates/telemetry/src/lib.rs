//! Telemetry core for the pizza service.
//!
//! Two independent pipelines share one handle:
//!
//! - metrics: request, auth and order hooks update an in-process
//!   [`Aggregator`]; a timer snapshots it and pushes OTLP/HTTP JSON.
//! - logs: request, db, factory and error hooks append sanitized records to a
//!   [`LogQueue`]; a second timer ships bounded batches to Loki.
//!
//! Both pushes are best-effort. Failures are logged and never reach a client.

pub mod aggregator;
pub mod clock;
pub mod config;
mod error;
pub mod exporter;
pub mod logs;
pub mod otlp;
pub mod redact;
pub mod schedule;
pub mod shipper;
pub mod sink;
pub mod system;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

pub use self::aggregator::{AggregateSnapshot, Aggregator, EndpointKey, EndpointStats};
pub use self::config::{ActiveUserMode, TelemetryConfig, TruncationLimits};
pub use self::error::{ConfigError, PushError};
pub use self::exporter::{MetricsExporter, TickOutcome};
pub use self::logs::{ErrorReport, FactoryCall, HttpExchange, Labels, LogEntry, LogQueue, Stream};
pub use self::shipper::{FlushOutcome, MAX_BATCH, Shipper};
pub use self::sink::{HttpSink, PushSink};

/// Methods whose outcome on an auth route counts as an auth attempt.
const AUTH_METHODS: [&str; 2] = ["POST", "PUT"];

/// Shared handle passed to middleware and route handlers.
///
/// Cloning is cheap; all clones feed the same aggregator and queue.
#[derive(Clone)]
pub struct Telemetry {
    aggregator: Arc<Aggregator>,
    logs: Arc<LogQueue>,
    auth_routes: Arc<[String]>,
}

impl Telemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            aggregator: Arc::new(Aggregator::new(config.metrics.active_users)),
            logs: Arc::new(LogQueue::new(
                &config.logging.source,
                &config.environment,
                config.limits,
            )),
            auth_routes: config.metrics.auth_routes.clone().into(),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn logs(&self) -> &Arc<LogQueue> {
        &self.logs
    }

    /// Record a finished request, attributing auth outcomes by route.
    ///
    /// A `POST`/`PUT` to a configured auth route counts as a successful auth
    /// attempt when the status is 2xx and a failed one otherwise.
    pub fn observe_request(&self, method: &str, route: &str, status: u16, latency_ms: f64) {
        self.aggregator.record_request(method, route, status, latency_ms);
        if self.is_auth_route(method, route) {
            self.aggregator
                .record_auth_outcome((200..300).contains(&status));
        }
    }

    pub fn is_auth_route(&self, method: &str, route: &str) -> bool {
        AUTH_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
            && self.auth_routes.iter().any(|r| r == route)
    }

    pub fn record_request(&self, method: &str, route: &str, status: u16, latency_ms: f64) {
        self.aggregator.record_request(method, route, status, latency_ms);
    }

    pub fn record_auth_outcome(&self, success: bool) {
        self.aggregator.record_auth_outcome(success);
    }

    pub fn record_order_outcome(&self, success: bool, latency_ms: f64, price_cents: f64) {
        self.aggregator
            .record_order_outcome(success, latency_ms, price_cents);
    }

    pub fn record_active_user(&self, user_id: &str) {
        self.aggregator.record_active_user(user_id);
    }

    pub fn log_http(&self, exchange: HttpExchange<'_>) {
        self.logs.log_http(exchange);
    }

    pub fn log_db<P>(&self, query: &str, params: &P, duration_ms: Option<f64>)
    where
        P: Serialize + Debug + ?Sized,
    {
        self.logs.log_db(query, params, duration_ms);
    }

    pub fn log_factory_request(&self, call: FactoryCall<'_>) {
        self.logs.log_factory_request(call);
    }

    pub fn log_error<C>(&self, report: &ErrorReport, context: &C)
    where
        C: Serialize + Debug + ?Sized,
    {
        self.logs.log_error(report, context);
    }

    /// Spawn the export and flush timers with HTTP sinks built from `config`.
    ///
    /// Unconfigured pipelines, and every pipeline in test mode, get no sink
    /// and their timer jobs do nothing.
    pub fn start(&self, config: &TelemetryConfig) -> TelemetryTasks<HttpSink, HttpSink> {
        let suppressed = config.is_test_mode();
        let metrics_sink = (config.metrics.is_enabled() && !suppressed)
            .then(|| HttpSink::new("otlp", &config.metrics.url, &config.metrics.api_key));
        let log_sink = (config.logging.is_enabled() && !suppressed).then(|| {
            HttpSink::new("loki", &config.logging.url, &config.logging.credentials())
        });

        tracing::info!(
            metrics_enabled = metrics_sink.is_some(),
            metrics_url = %config.metrics.url,
            source = %config.metrics.source,
            logging_enabled = log_sink.is_some(),
            logging_url = %config.logging.url,
            environment = %config.environment,
            "Starting telemetry"
        );

        self.start_with_sinks(
            metrics_sink,
            log_sink,
            Schedule {
                metrics_period: config.metrics.period(),
                flush_interval: config.logging.flush_interval(),
                max_batch: config.logging.max_batch,
                source: config.metrics.source.clone(),
            },
        )
    }

    /// Spawn both timers over caller-supplied sinks.
    pub fn start_with_sinks<M, L>(
        &self,
        metrics_sink: Option<M>,
        log_sink: Option<L>,
        schedule: Schedule,
    ) -> TelemetryTasks<M, L>
    where
        M: PushSink + 'static,
        L: PushSink + 'static,
    {
        let exporter = Arc::new(MetricsExporter::new(
            Arc::clone(&self.aggregator),
            metrics_sink,
            schedule.source,
        ));
        let shipper = Arc::new(Shipper::new(
            Arc::clone(&self.logs),
            log_sink,
            schedule.max_batch,
        ));

        let export_task = exporter.is_enabled().then(|| {
            let exporter = Arc::clone(&exporter);
            schedule::spawn_periodic("metrics_export", schedule.metrics_period, move || {
                let exporter = Arc::clone(&exporter);
                async move {
                    exporter.tick().await;
                }
            })
        });
        let flush_task = shipper.is_enabled().then(|| {
            let shipper = Arc::clone(&shipper);
            schedule::spawn_periodic("log_flush", schedule.flush_interval, move || {
                let shipper = Arc::clone(&shipper);
                async move {
                    shipper.flush().await;
                }
            })
        });

        TelemetryTasks {
            exporter,
            shipper,
            export_task,
            flush_task,
        }
    }
}

/// Timer settings for [`Telemetry::start_with_sinks`].
#[derive(Debug, Clone)]
pub struct Schedule {
    pub metrics_period: Duration,
    pub flush_interval: Duration,
    pub max_batch: usize,
    pub source: String,
}

impl Default for Schedule {
    fn default() -> Self {
        let config = TelemetryConfig::default();
        Self {
            metrics_period: config.metrics.period(),
            flush_interval: config.logging.flush_interval(),
            max_batch: config.logging.max_batch,
            source: config.metrics.source,
        }
    }
}

/// Running timers. Dropping this leaves them running; call
/// [`shutdown`](Self::shutdown) to stop them.
pub struct TelemetryTasks<M, L> {
    exporter: Arc<MetricsExporter<M>>,
    shipper: Arc<Shipper<L>>,
    export_task: Option<JoinHandle<()>>,
    flush_task: Option<JoinHandle<()>>,
}

impl<M: PushSink, L: PushSink> TelemetryTasks<M, L> {
    pub fn exporter(&self) -> &Arc<MetricsExporter<M>> {
        &self.exporter
    }

    pub fn shipper(&self) -> &Arc<Shipper<L>> {
        &self.shipper
    }

    /// Stop both timers, then make one last best-effort export and flush.
    pub async fn shutdown(self) -> (TickOutcome, FlushOutcome) {
        for task in [self.export_task, self.flush_task].into_iter().flatten() {
            task.abort();
        }
        let tick = self.exporter.tick().await;
        let flush = self.shipper.flush().await;
        tracing::info!(?tick, ?flush, "Telemetry stopped");
        (tick, flush)
    }
}
