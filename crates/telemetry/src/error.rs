use thiserror::Error;

/// Errors raised while loading [`TelemetryConfig`](crate::TelemetryConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

/// Errors from a single outbound push to a telemetry collector.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector rejected push with status {status}: {body}")]
    Status { status: u16, body: String },
}
