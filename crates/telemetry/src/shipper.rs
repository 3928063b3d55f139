//! Batched log shipping to a Loki-compatible push endpoint.

use std::sync::Arc;

use metrics::counter;
use pizza_observability::pipeline;
use serde::Serialize;

use crate::logs::{Labels, LogEntry, LogQueue};
use crate::schedule::InFlight;
use crate::sink::PushSink;

/// Default cap on entries removed by one flush.
pub const MAX_BATCH: usize = 500;

/// What a single [`Shipper::flush`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No sink configured, or running in test mode.
    Disabled,
    /// Another flush is still running.
    InFlight,
    /// Nothing queued.
    Empty,
    /// Batch accepted by the collector.
    Shipped { entries: usize, streams: usize },
    /// Batch dropped after a failed push.
    Failed { entries: usize },
}

/// `{streams: [{stream: {...}, values: [[ts, line], ...]}]}`
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PushRequest {
    pub streams: Vec<StreamBatch>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StreamBatch {
    pub stream: Labels,
    pub values: Vec<[String; 2]>,
}

impl PushRequest {
    /// Group entries by exact label set.
    ///
    /// Streams appear in order of their first entry, and values keep arrival
    /// order within each stream.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        let mut streams: Vec<StreamBatch> = Vec::new();
        for entry in entries {
            let value = [entry.timestamp_nanos, entry.line];
            match streams.iter_mut().find(|s| s.stream == entry.labels) {
                Some(batch) => batch.values.push(value),
                None => streams.push(StreamBatch {
                    stream: entry.labels,
                    values: vec![value],
                }),
            }
        }
        Self { streams }
    }
}

/// Drains the [`LogQueue`] in bounded batches and pushes them once each.
pub struct Shipper<S> {
    queue: Arc<LogQueue>,
    sink: Option<S>,
    max_batch: usize,
    in_flight: InFlight,
}

impl<S: PushSink> Shipper<S> {
    /// `sink` is `None` when shipping is unconfigured or suppressed.
    pub fn new(queue: Arc<LogQueue>, sink: Option<S>, max_batch: usize) -> Self {
        Self {
            queue,
            sink,
            max_batch: max_batch.max(1),
            in_flight: InFlight::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Ship up to `max_batch` of the oldest entries in one push.
    ///
    /// Drained entries are never re-queued: a failed push loses them.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(sink) = &self.sink else {
            return FlushOutcome::Disabled;
        };
        let Some(_guard) = self.in_flight.try_begin() else {
            return FlushOutcome::InFlight;
        };

        let batch = self.queue.drain(self.max_batch);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let entries = batch.len();
        let request = PushRequest::from_entries(batch);
        let streams = request.streams.len();

        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, entries, "Failed to serialize log batch");
                counter!(pipeline::LOG_ENTRIES_DROPPED).increment(entries as u64);
                return FlushOutcome::Failed { entries };
            }
        };

        match sink.push(body).await {
            Ok(()) => {
                counter!(pipeline::LOG_ENTRIES_SHIPPED).increment(entries as u64);
                FlushOutcome::Shipped { entries, streams }
            }
            Err(e) => {
                tracing::warn!(sink = sink.name(), error = %e, entries, "Failed to push logs");
                counter!(pipeline::LOG_ENTRIES_DROPPED).increment(entries as u64);
                FlushOutcome::Failed { entries }
            }
        }
    }
}
