//! Telemetry configuration.
//!
//! Static JSON config (optional) layered under environment-variable overrides.
//! Every exporter defaults to disabled: an empty URL or credential turns the
//! corresponding timer job into a no-op.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming an optional static JSON config file.
pub const CONFIG_PATH_ENV: &str = "TELEMETRY_CONFIG";

/// Environment label that suppresses every outbound push.
pub const TEST_ENVIRONMENT: &str = "test";

const DEFAULT_SOURCE: &str = "jwt-pizza-service";

/// Root configuration for the telemetry core.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Deployment environment, attached to every log stream as `env`.
    pub environment: String,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub limits: TruncationLimits,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            limits: TruncationLimits::default(),
        }
    }
}

/// How the active-user gauge counts users within one export window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveUserMode {
    /// Each user id counts once per window.
    #[default]
    Distinct,
    /// Every authenticated request counts, repeat visits included.
    PerRequest,
}

/// OTLP metrics export settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub url: String,
    /// `instanceId:token`, sent base64-encoded as HTTP basic auth.
    pub api_key: String,
    pub source: String,
    pub period_ms: u64,
    pub active_users: ActiveUserMode,
    /// Route patterns whose POST/PUT outcomes count as auth attempts.
    pub auth_routes: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            source: DEFAULT_SOURCE.to_string(),
            period_ms: 1000,
            active_users: ActiveUserMode::Distinct,
            auth_routes: vec!["/api/auth".to_string()],
        }
    }
}

impl MetricsConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty()
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

/// Loki log shipping settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub url: String,
    pub user_id: String,
    pub api_key: String,
    pub source: String,
    pub flush_interval_ms: u64,
    pub max_batch: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user_id: String::new(),
            api_key: String::new(),
            source: DEFAULT_SOURCE.to_string(),
            flush_interval_ms: 1000,
            max_batch: 500,
        }
    }
}

impl LoggingConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty() && !self.user_id.is_empty() && !self.api_key.is_empty()
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// `user:key` credentials for basic auth.
    pub fn credentials(&self) -> String {
        format!("{}:{}", self.user_id, self.api_key)
    }
}

/// Per-field character caps applied before a value enters a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TruncationLimits {
    pub request_body: usize,
    pub response_body: usize,
    pub stack: usize,
    pub error_message: usize,
    pub error_context: usize,
    pub db_query: usize,
    pub db_params: usize,
    pub factory_body: usize,
    pub user_agent: usize,
    pub default: usize,
}

impl Default for TruncationLimits {
    fn default() -> Self {
        Self {
            request_body: 2000,
            response_body: 3000,
            stack: 4000,
            error_message: 2000,
            error_context: 2000,
            db_query: 2000,
            db_params: 1000,
            factory_body: 2000,
            user_agent: 300,
            default: 5000,
        }
    }
}

impl TelemetryConfig {
    /// Load the static file named by `TELEMETRY_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a static JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overlay values returned by `lookup` onto this config.
    ///
    /// `lookup` maps an environment variable name to its value; empty values
    /// are ignored so `FOO=` in a compose file does not clobber the file config.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("APP_ENV") {
            self.environment = v;
        }

        if let Some(v) = get("METRICS_URL") {
            self.metrics.url = v;
        }
        if let Some(v) = get("METRICS_API_KEY") {
            self.metrics.api_key = v.trim().to_string();
        }
        if let Some(v) = get("METRICS_SOURCE") {
            self.metrics.source = v;
        }
        if let Some(v) = get("METRICS_PERIOD_MS") {
            self.metrics.period_ms = parse("METRICS_PERIOD_MS", &v)?;
        }
        if let Some(v) = get("METRICS_ACTIVE_USERS") {
            self.metrics.active_users = match v.as_str() {
                "distinct" => ActiveUserMode::Distinct,
                "per_request" => ActiveUserMode::PerRequest,
                _ => return Err(invalid("METRICS_ACTIVE_USERS", &v)),
            };
        }
        if let Some(v) = lookup("METRICS_AUTH_ROUTES") {
            self.metrics.auth_routes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(v) = get("LOGGING_URL") {
            self.logging.url = v;
        }
        if let Some(v) = get("LOGGING_USER_ID") {
            self.logging.user_id = v;
        }
        if let Some(v) = get("LOGGING_API_KEY") {
            self.logging.api_key = v;
        }
        if let Some(v) = get("LOGGING_SOURCE") {
            self.logging.source = v;
        }
        if let Some(v) = get("LOGGING_FLUSH_MS") {
            self.logging.flush_interval_ms = parse("LOGGING_FLUSH_MS", &v)?;
        }
        if let Some(v) = get("LOGGING_MAX_BATCH") {
            self.logging.max_batch = parse("LOGGING_MAX_BATCH", &v)?;
        }

        let limits = &mut self.limits;
        for (key, field) in [
            ("LOG_LIMIT_REQUEST_BODY", &mut limits.request_body),
            ("LOG_LIMIT_RESPONSE_BODY", &mut limits.response_body),
            ("LOG_LIMIT_STACK", &mut limits.stack),
            ("LOG_LIMIT_ERROR_MESSAGE", &mut limits.error_message),
            ("LOG_LIMIT_ERROR_CONTEXT", &mut limits.error_context),
            ("LOG_LIMIT_DB_QUERY", &mut limits.db_query),
            ("LOG_LIMIT_DB_PARAMS", &mut limits.db_params),
            ("LOG_LIMIT_FACTORY_BODY", &mut limits.factory_body),
            ("LOG_LIMIT_USER_AGENT", &mut limits.user_agent),
            ("LOG_LIMIT_DEFAULT", &mut limits.default),
        ] {
            if let Some(v) = get(key) {
                *field = parse(key, &v)?;
            }
        }

        Ok(())
    }

    /// True when outbound pushes must be suppressed for automated tests.
    pub fn is_test_mode(&self) -> bool {
        self.environment == TEST_ENVIRONMENT
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_disabled() {
        let config = TelemetryConfig::default();
        assert!(!config.metrics.is_enabled());
        assert!(!config.logging.is_enabled());
        assert!(!config.is_test_mode());
        assert_eq!(config.logging.max_batch, 500);
        assert_eq!(config.metrics.period(), Duration::from_secs(1));
        assert_eq!(config.limits.response_body, 3000);
    }

    #[test]
    fn env_overrides_enable_exporters() {
        let mut config = TelemetryConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("METRICS_URL", "https://otlp.example.com/otlp/v1/metrics"),
                ("METRICS_API_KEY", " 1428600:glc_abc \n"),
                ("LOGGING_URL", "https://logs.example.com/loki/api/v1/push"),
                ("LOGGING_USER_ID", "1234"),
                ("LOGGING_API_KEY", "glc_logs"),
                ("METRICS_PERIOD_MS", "5000"),
            ]))
            .unwrap();

        assert!(config.metrics.is_enabled());
        assert_eq!(config.metrics.api_key, "1428600:glc_abc");
        assert_eq!(config.metrics.period_ms, 5000);
        assert!(config.logging.is_enabled());
        assert_eq!(config.logging.credentials(), "1234:glc_logs");
    }

    #[test]
    fn logging_requires_all_three_settings() {
        let mut config = TelemetryConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("LOGGING_URL", "https://logs.example.com"),
                ("LOGGING_API_KEY", "key"),
            ]))
            .unwrap();
        assert!(!config.logging.is_enabled());
    }

    #[test]
    fn empty_values_do_not_override() {
        let mut config = TelemetryConfig::default();
        config.metrics.source = "from-file".to_string();
        config
            .apply_overrides(lookup_from(&[("METRICS_SOURCE", "")]))
            .unwrap();
        assert_eq!(config.metrics.source, "from-file");
    }

    #[test]
    fn invalid_number_is_rejected() {
        let mut config = TelemetryConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("LOGGING_MAX_BATCH", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "LOGGING_MAX_BATCH"));
    }

    #[test]
    fn truncation_limits_are_tunable() {
        let mut config = TelemetryConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("LOG_LIMIT_REQUEST_BODY", "64"),
                ("LOG_LIMIT_USER_AGENT", "10"),
            ]))
            .unwrap();
        assert_eq!(config.limits.request_body, 64);
        assert_eq!(config.limits.user_agent, 10);
        assert_eq!(config.limits.stack, 4000);
    }

    #[test]
    fn active_user_mode_and_auth_routes() {
        let mut config = TelemetryConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("METRICS_ACTIVE_USERS", "per_request"),
                ("METRICS_AUTH_ROUTES", "/api/auth, /api/login,"),
                ("APP_ENV", "test"),
            ]))
            .unwrap();
        assert_eq!(config.metrics.active_users, ActiveUserMode::PerRequest);
        assert_eq!(config.metrics.auth_routes, vec!["/api/auth", "/api/login"]);
        assert!(config.is_test_mode());
    }

    #[test]
    fn empty_auth_routes_disables_route_attribution() {
        let mut config = TelemetryConfig::default();
        config
            .apply_overrides(lookup_from(&[("METRICS_AUTH_ROUTES", "")]))
            .unwrap();
        assert!(config.metrics.auth_routes.is_empty());
    }

    #[test]
    fn parses_partial_static_file() {
        let json = r#"{
            "environment": "staging",
            "metrics": { "url": "https://otlp.example.com", "api_key": "1:abc" },
            "limits": { "stack": 100 }
        }"#;
        let config: TelemetryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.environment, "staging");
        assert!(config.metrics.is_enabled());
        assert_eq!(config.metrics.source, "jwt-pizza-service");
        assert_eq!(config.limits.stack, 100);
        assert_eq!(config.limits.request_body, 2000);
    }
}
