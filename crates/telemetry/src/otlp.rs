//! OTLP/HTTP JSON metric payloads.

use pizza_observability::{exported, labels};
use serde::Serialize;

use crate::aggregator::{AggregateSnapshot, TRACKED_METHODS};
use crate::system::SystemUsage;

/// Whether a point is cumulative or instantaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// One measurement ready for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPoint {
    pub name: &'static str,
    pub kind: MetricKind,
    pub value: u64,
    pub unit: &'static str,
    pub dimensions: Vec<(String, String)>,
    pub timestamp_nanos: u64,
}

impl MetricPoint {
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Expand a snapshot into the full set of exported points.
pub fn build_points(
    snapshot: &AggregateSnapshot,
    system: SystemUsage,
    timestamp_nanos: u64,
) -> Vec<MetricPoint> {
    let counter = |name, value, unit, dimensions| MetricPoint {
        name,
        kind: MetricKind::Counter,
        value,
        unit,
        dimensions,
        timestamp_nanos,
    };
    let gauge = |name, value, unit| MetricPoint {
        name,
        kind: MetricKind::Gauge,
        value,
        unit,
        dimensions: Vec::new(),
        timestamp_nanos,
    };
    let dim = |key: &str, value: &str| vec![(key.to_string(), value.to_string())];

    let mut points = vec![counter(
        exported::HTTP_REQUESTS,
        snapshot.total_requests,
        "1",
        dim(labels::METHOD, "ALL"),
    )];

    for method in TRACKED_METHODS {
        points.push(counter(
            exported::HTTP_REQUESTS,
            snapshot.requests_for(method),
            "1",
            dim(labels::METHOD, method),
        ));
    }
    for (method, count) in &snapshot.requests_by_method {
        if !TRACKED_METHODS.contains(&method.as_str()) {
            points.push(counter(
                exported::HTTP_REQUESTS,
                *count,
                "1",
                dim(labels::METHOD, method),
            ));
        }
    }

    for (key, stats) in &snapshot.endpoints {
        let dims = vec![
            (labels::METHOD.to_string(), key.method.clone()),
            (labels::ROUTE.to_string(), key.route.clone()),
            (labels::STATUS.to_string(), key.status.to_string()),
        ];
        points.push(counter(exported::HTTP_REQUESTS, stats.count, "1", dims.clone()));
        points.push(counter(
            exported::ENDPOINT_LATENCY,
            round_ms(stats.total_latency_ms),
            "ms",
            dims,
        ));
    }

    points.push(gauge(exported::ACTIVE_USERS, snapshot.active_users, "1"));

    points.push(counter(
        exported::AUTH_ATTEMPTS,
        snapshot.auth_success,
        "1",
        dim(labels::OUTCOME, "success"),
    ));
    points.push(counter(
        exported::AUTH_ATTEMPTS,
        snapshot.auth_failure,
        "1",
        dim(labels::OUTCOME, "failure"),
    ));

    points.push(gauge(exported::CPU_PERCENT, system.cpu_percent, "%"));
    points.push(gauge(exported::MEMORY_PERCENT, system.memory_percent, "%"));

    points.push(counter(exported::PIZZAS_SOLD, snapshot.pizzas_sold, "1", vec![]));
    points.push(counter(exported::PIZZA_FAILURES, snapshot.pizza_failures, "1", vec![]));
    points.push(counter(exported::REVENUE, snapshot.revenue_millicents, "m¢", vec![]));
    points.push(counter(
        exported::PIZZA_CREATION_LATENCY,
        round_ms(snapshot.pizza_creation_latency_ms),
        "ms",
        vec![],
    ));

    points
}

fn round_ms(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        ms.round() as u64
    } else {
        0
    }
}

/// `{resourceMetrics: [{scopeMetrics: [{metrics: [...]}]}]}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Serialize)]
pub struct ScopeMetrics {
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Serialize)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    #[serde(flatten)]
    pub data: MetricData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricData {
    Gauge {
        #[serde(rename = "dataPoints")]
        data_points: Vec<NumberDataPoint>,
    },
    Sum {
        #[serde(rename = "aggregationTemporality")]
        aggregation_temporality: &'static str,
        #[serde(rename = "isMonotonic")]
        is_monotonic: bool,
        #[serde(rename = "dataPoints")]
        data_points: Vec<NumberDataPoint>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberDataPoint {
    pub as_int: u64,
    /// String-encoded so JSON consumers never lose precision.
    pub time_unix_nano: String,
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyValue {
    pub string_value: String,
}

const CUMULATIVE: &str = "AGGREGATION_TEMPORALITY_CUMULATIVE";

impl ExportRequest {
    /// Wrap points in a single resource/scope, tagging each with `source`.
    pub fn from_points(points: &[MetricPoint], source: &str) -> Self {
        let metrics = points
            .iter()
            .map(|point| {
                let mut attributes = vec![attribute(labels::SOURCE, source)];
                attributes.extend(point.dimensions.iter().map(|(k, v)| attribute(k, v)));

                let data_points = vec![NumberDataPoint {
                    as_int: point.value,
                    time_unix_nano: point.timestamp_nanos.to_string(),
                    attributes,
                }];

                let data = match point.kind {
                    MetricKind::Gauge => MetricData::Gauge { data_points },
                    MetricKind::Counter => MetricData::Sum {
                        aggregation_temporality: CUMULATIVE,
                        is_monotonic: true,
                        data_points,
                    },
                };

                Metric {
                    name: point.name.to_string(),
                    unit: point.unit.to_string(),
                    data,
                }
            })
            .collect();

        Self {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics { metrics }],
            }],
        }
    }
}

fn attribute(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: AnyValue {
            string_value: value.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::aggregator::Aggregator;

    const TS: u64 = 1_700_000_000_000_000_000;

    fn sample_snapshot() -> AggregateSnapshot {
        let agg = Aggregator::default();
        agg.record_request("GET", "/api/order/menu", 200, 12.4);
        agg.record_request("POST", "/api/auth", 401, 5.0);
        agg.record_request("OPTIONS", "/api/auth", 204, 0.2);
        agg.record_auth_outcome(false);
        agg.record_order_outcome(true, 80.6, 1050.0);
        agg.record_active_user("1");
        agg.snapshot()
    }

    fn find<'a>(
        points: &'a [MetricPoint],
        name: &str,
        dims: &[(&str, &str)],
    ) -> Option<&'a MetricPoint> {
        points.iter().find(|p| {
            p.name == name
                && p.dimensions.len() == dims.len()
                && dims.iter().all(|(k, v)| p.dimension(k) == Some(*v))
        })
    }

    #[test]
    fn builds_method_totals() {
        let points = build_points(&sample_snapshot(), SystemUsage::default(), TS);
        let all = find(&points, "http_requests_total", &[("method", "ALL")]).unwrap();
        assert_eq!(all.value, 3);
        assert_eq!(all.kind, MetricKind::Counter);
        let put = find(&points, "http_requests_total", &[("method", "PUT")]).unwrap();
        assert_eq!(put.value, 0);
        let options = find(&points, "http_requests_total", &[("method", "OPTIONS")]).unwrap();
        assert_eq!(options.value, 1);
    }

    #[test]
    fn builds_endpoint_dimensions() {
        let points = build_points(&sample_snapshot(), SystemUsage::default(), TS);
        let dims = [("method", "GET"), ("route", "/api/order/menu"), ("status", "200")];
        assert_eq!(find(&points, "http_requests_total", &dims).unwrap().value, 1);
        let latency = find(&points, "endpoint_latency_milliseconds_total", &dims).unwrap();
        assert_eq!(latency.value, 12);
        assert_eq!(latency.unit, "ms");
    }

    #[test]
    fn builds_gauges_and_business_counters() {
        let usage = SystemUsage {
            cpu_percent: 37,
            memory_percent: 61,
        };
        let points = build_points(&sample_snapshot(), usage, TS);

        let active = find(&points, "active_users", &[]).unwrap();
        assert_eq!((active.kind, active.value), (MetricKind::Gauge, 1));
        assert_eq!(find(&points, "cpu_percent", &[]).unwrap().value, 37);
        assert_eq!(find(&points, "memory_percent", &[]).unwrap().value, 61);
        assert_eq!(
            find(&points, "auth_attempts_total", &[("outcome", "failure")]).unwrap().value,
            1
        );
        assert_eq!(find(&points, "revenue_millicents_total", &[]).unwrap().value, 1_050_000);
        assert_eq!(
            find(&points, "pizza_creation_latency_milliseconds_total", &[]).unwrap().value,
            81
        );
        assert!(points.iter().all(|p| p.timestamp_nanos == TS));
    }

    #[test]
    fn serializes_sum_and_gauge_shapes() {
        let points = build_points(&sample_snapshot(), SystemUsage::default(), TS);
        let body = serde_json::to_value(ExportRequest::from_points(&points, "pizza-test")).unwrap();

        let metrics = &body["resourceMetrics"][0]["scopeMetrics"][0]["metrics"];
        let metrics = metrics.as_array().unwrap();
        assert_eq!(metrics.len(), points.len());

        let sum = &metrics[0];
        assert_eq!(sum["name"], "http_requests_total");
        assert_eq!(sum["unit"], "1");
        assert_eq!(sum["sum"]["aggregationTemporality"], CUMULATIVE);
        assert_eq!(sum["sum"]["isMonotonic"], true);
        let dp = &sum["sum"]["dataPoints"][0];
        assert_eq!(dp["asInt"], 3);
        assert_eq!(dp["timeUnixNano"], Value::String(TS.to_string()));
        assert_eq!(dp["attributes"][0]["key"], "source");
        assert_eq!(dp["attributes"][0]["value"]["stringValue"], "pizza-test");
        assert_eq!(dp["attributes"][1]["key"], "method");

        let gauge = metrics
            .iter()
            .find(|m| m["name"] == "active_users")
            .unwrap();
        assert!(gauge.get("sum").is_none());
        assert_eq!(gauge["gauge"]["dataPoints"][0]["asInt"], 1);
    }
}
