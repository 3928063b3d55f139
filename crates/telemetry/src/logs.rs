//! In-memory log queue and the structured records that feed it.
//!
//! Hooks on the request path only sanitize, serialize and append; nothing here
//! blocks on I/O. The [`Shipper`](crate::Shipper) drains the queue on a timer.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;

use chrono::{SecondsFormat, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use pizza_observability::{labels, pipeline};
use serde::Serialize;

use crate::clock::MonotonicNanos;
use crate::config::TruncationLimits;
use crate::redact::{sanitize_value, scrub, truncate};

/// Label set identifying a Loki stream.
pub type Labels = BTreeMap<String, String>;

/// Log stream a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Http,
    Db,
    Factory,
    Error,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Db => "db",
            Self::Factory => "factory",
            Self::Error => "error",
        }
    }

    pub fn labels(&self) -> Labels {
        Labels::from([(labels::STREAM.to_string(), self.as_str().to_string())])
    }
}

/// One queued line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub labels: Labels,
    /// Nanoseconds since the Unix epoch, string-encoded for the wire.
    pub timestamp_nanos: String,
    /// JSON-serialized record.
    pub line: String,
}

/// FIFO buffer of sanitized entries, filled from request handlers.
#[derive(Debug)]
pub struct LogQueue {
    entries: Mutex<VecDeque<LogEntry>>,
    default_labels: Labels,
    limits: TruncationLimits,
    clock: MonotonicNanos,
}

impl LogQueue {
    /// `source` and `environment` become the `source`/`env` labels on every entry.
    pub fn new(source: &str, environment: &str, limits: TruncationLimits) -> Self {
        let default_labels = Labels::from([
            (labels::SOURCE.to_string(), source.to_string()),
            (labels::ENV.to_string(), environment.to_string()),
        ]);
        Self {
            entries: Mutex::new(VecDeque::new()),
            default_labels,
            limits,
            clock: MonotonicNanos::new(),
        }
    }

    /// Append a record under the default labels merged with `stream_labels`.
    ///
    /// Stream labels win on key collisions. Serialization failures degrade to
    /// the record's `Debug` form rather than dropping the entry.
    pub fn enqueue<T>(&self, stream_labels: Labels, payload: &T)
    where
        T: Serialize + Debug + ?Sized,
    {
        let mut labels = self.default_labels.clone();
        labels.extend(stream_labels);

        let line = serde_json::to_string(payload)
            .unwrap_or_else(|_| serde_json::Value::String(format!("{payload:?}")).to_string());

        let entry = LogEntry {
            labels,
            timestamp_nanos: self.clock.now().to_string(),
            line,
        };

        let depth = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            entries.len()
        };
        counter!(pipeline::LOG_ENTRIES_ENQUEUED).increment(1);
        gauge!(pipeline::LOG_QUEUE_DEPTH).set(depth as f64);
    }

    /// Remove up to `max` of the oldest entries, in arrival order.
    pub fn drain(&self, max: usize) -> Vec<LogEntry> {
        let mut entries = self.entries.lock();
        let take = max.min(entries.len());
        let batch: Vec<_> = entries.drain(..take).collect();
        gauge!(pipeline::LOG_QUEUE_DEPTH).set(entries.len() as f64);
        batch
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Queue an `http` record for a finished request.
    pub fn log_http(&self, exchange: HttpExchange<'_>) {
        let record = HttpRecord {
            ts: iso_now(),
            method: exchange.method,
            path: truncate(exchange.path, self.limits.default),
            status: exchange.status,
            has_auth: exchange.has_auth,
            req_body: scrub(exchange.request_body.unwrap_or_default(), self.limits.request_body),
            resp_body: scrub(exchange.response_body, self.limits.response_body),
            latency_ms: round_ms(exchange.latency_ms),
            ip: exchange.client_ip.unwrap_or_default(),
            ua: truncate(exchange.user_agent.unwrap_or_default(), self.limits.user_agent),
        };
        self.enqueue(Stream::Http.labels(), &record);
    }

    /// Queue a `db` record for a query and its bound parameters.
    pub fn log_db<P>(&self, query: &str, params: &P, duration_ms: Option<f64>)
    where
        P: Serialize + Debug + ?Sized,
    {
        let record = DbRecord {
            ts: iso_now(),
            query: scrub(query, self.limits.db_query),
            params: truncate(&sanitize_value(params), self.limits.db_params),
            duration_ms: duration_ms.map(round_ms),
        };
        self.enqueue(Stream::Db.labels(), &record);
    }

    /// Queue a `factory` record for an outbound call to the pizza factory.
    pub fn log_factory_request(&self, call: FactoryCall<'_>) {
        let record = FactoryRecord {
            ts: iso_now(),
            url: call.url,
            status: call.status,
            latency_ms: round_ms(call.latency_ms),
            req_body: scrub(call.request_body, self.limits.factory_body),
            resp_body: scrub(call.response_body, self.limits.factory_body),
        };
        self.enqueue(Stream::Factory.labels(), &record);
    }

    /// Queue an `error` record. `context` is sanitized as JSON.
    pub fn log_error<C>(&self, report: &ErrorReport, context: &C)
    where
        C: Serialize + Debug + ?Sized,
    {
        let record = ErrorRecord {
            ts: iso_now(),
            name: &report.name,
            message: scrub(&report.message, self.limits.error_message),
            stack: scrub(&report.stack, self.limits.stack),
            context: truncate(&sanitize_value(context), self.limits.error_context),
        };
        self.enqueue(Stream::Error.labels(), &record);
    }
}

/// Inputs for [`LogQueue::log_http`].
#[derive(Debug, Clone, Default)]
pub struct HttpExchange<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub status: u16,
    pub has_auth: bool,
    /// Only captured for JSON requests.
    pub request_body: Option<&'a str>,
    pub response_body: &'a str,
    pub latency_ms: f64,
    pub client_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Inputs for [`LogQueue::log_factory_request`].
#[derive(Debug, Clone, Default)]
pub struct FactoryCall<'a> {
    pub url: &'a str,
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub request_body: &'a str,
    pub response_body: &'a str,
}

/// An error as reported to the `error` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub name: String,
    pub message: String,
    /// Source chain, one cause per line.
    pub stack: String,
}

impl ErrorReport {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: String::new(),
        }
    }

    /// Build from an error, walking its `source()` chain for the stack.
    pub fn from_error(name: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = Vec::new();
        let mut cause = err.source();
        while let Some(e) = cause {
            stack.push(format!("caused by: {e}"));
            cause = e.source();
        }
        Self {
            name: name.into(),
            message: err.to_string(),
            stack: stack.join("\n"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRecord<'a> {
    ts: String,
    method: &'a str,
    path: String,
    status: u16,
    has_auth: bool,
    req_body: String,
    resp_body: String,
    latency_ms: u64,
    ip: &'a str,
    ua: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DbRecord {
    ts: String,
    query: String,
    params: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FactoryRecord<'a> {
    ts: String,
    url: &'a str,
    status: Option<u16>,
    latency_ms: u64,
    req_body: String,
    resp_body: String,
}

#[derive(Debug, Serialize)]
struct ErrorRecord<'a> {
    ts: String,
    name: &'a str,
    message: String,
    stack: String,
    context: String,
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn round_ms(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        ms.round() as u64
    } else {
        0
    }
}
