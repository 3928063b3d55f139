//! Outbound push seam for the exporter and the shipper.
//!
//! The trait allows mocking the collector in tests without a network.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use metrics::{counter, histogram};
use pizza_observability::{labels, pipeline};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::error::PushError;

/// Delivers one serialized JSON payload to a collector.
pub trait PushSink: Send + Sync {
    /// Short name used in diagnostics (`otlp`, `loki`).
    fn name(&self) -> &'static str;

    fn push(&self, body: Vec<u8>) -> impl Future<Output = Result<(), PushError>> + Send;
}

impl<T: PushSink> PushSink for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn push(&self, body: Vec<u8>) -> impl Future<Output = Result<(), PushError>> + Send {
        (**self).push(body)
    }
}

/// HTTP POST with basic authentication.
#[derive(Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    name: &'static str,
    url: String,
    authorization: String,
}

impl HttpSink {
    /// `credentials` is the raw `user:secret` pair; it is base64-encoded here.
    pub fn new(name: &'static str, url: impl Into<String>, credentials: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            name,
            url: url.into(),
            authorization: basic_auth(credentials),
        }
    }
}

/// `Basic base64(credentials)`
pub fn basic_auth(credentials: &str) -> String {
    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}

impl PushSink for HttpSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn push(&self, body: Vec<u8>) -> Result<(), PushError> {
        let start = Instant::now();
        let result = self.send(body).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(pipeline::PUSHES, labels::SINK => self.name, labels::OUTCOME => outcome)
            .increment(1);
        histogram!(pipeline::PUSH_DURATION, labels::SINK => self.name)
            .record(start.elapsed().as_secs_f64());

        result
    }
}

impl HttpSink {
    async fn send(&self, body: Vec<u8>) -> Result<(), PushError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, &self.authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PushError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
