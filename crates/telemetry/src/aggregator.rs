//! In-process metric aggregation.
//!
//! Every in-flight request mutates the aggregator, so all state sits behind a
//! single mutex: recording is a handful of integer updates under the lock, and
//! a snapshot copies everything under that same lock for a point-in-time view.

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;

use crate::config::ActiveUserMode;

/// Methods that always appear in the export, even at zero.
pub const TRACKED_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// Composite key for per-endpoint accumulators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointKey {
    pub method: String,
    pub route: String,
    pub status: u16,
}

impl EndpointKey {
    pub fn new(method: impl Into<String>, route: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            status,
        }
    }
}

/// Running request count and latency sum for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EndpointStats {
    pub count: u64,
    pub total_latency_ms: f64,
}

/// Immutable copy of the aggregator taken at export time.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSnapshot {
    pub total_requests: u64,
    pub requests_by_method: BTreeMap<String, u64>,
    pub auth_success: u64,
    pub auth_failure: u64,
    pub pizzas_sold: u64,
    pub pizza_failures: u64,
    pub revenue_millicents: u64,
    pub pizza_creation_latency_ms: f64,
    pub endpoints: BTreeMap<EndpointKey, EndpointStats>,
    pub active_users: u64,
}

impl AggregateSnapshot {
    pub fn requests_for(&self, method: &str) -> u64 {
        self.requests_by_method.get(method).copied().unwrap_or(0)
    }

    pub fn endpoint(&self, method: &str, route: &str, status: u16) -> Option<&EndpointStats> {
        self.endpoints.get(&EndpointKey::new(method, route, status))
    }
}

#[derive(Debug)]
enum ActiveUsers {
    Distinct(HashSet<String>),
    PerRequest(u64),
}

impl ActiveUsers {
    fn new(mode: ActiveUserMode) -> Self {
        match mode {
            ActiveUserMode::Distinct => Self::Distinct(HashSet::new()),
            ActiveUserMode::PerRequest => Self::PerRequest(0),
        }
    }

    fn record(&mut self, user_id: &str) {
        match self {
            Self::Distinct(set) => {
                if !set.contains(user_id) {
                    set.insert(user_id.to_string());
                }
            }
            Self::PerRequest(count) => *count += 1,
        }
    }

    fn count(&self) -> u64 {
        match self {
            Self::Distinct(set) => set.len() as u64,
            Self::PerRequest(count) => *count,
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Distinct(set) => set.clear(),
            Self::PerRequest(count) => *count = 0,
        }
    }
}

#[derive(Debug)]
struct AggregatorState {
    total_requests: u64,
    requests_by_method: BTreeMap<String, u64>,
    auth_success: u64,
    auth_failure: u64,
    pizzas_sold: u64,
    pizza_failures: u64,
    revenue_millicents: u64,
    pizza_creation_latency_ms: f64,
    endpoints: BTreeMap<EndpointKey, EndpointStats>,
    active_users: ActiveUsers,
}

/// Process-wide counters and gauges, shared by reference with every request.
#[derive(Debug)]
pub struct Aggregator {
    state: Mutex<AggregatorState>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(ActiveUserMode::default())
    }
}

impl Aggregator {
    pub fn new(active_users: ActiveUserMode) -> Self {
        let requests_by_method = TRACKED_METHODS
            .iter()
            .map(|m| (m.to_string(), 0))
            .collect();

        Self {
            state: Mutex::new(AggregatorState {
                total_requests: 0,
                requests_by_method,
                auth_success: 0,
                auth_failure: 0,
                pizzas_sold: 0,
                pizza_failures: 0,
                revenue_millicents: 0,
                pizza_creation_latency_ms: 0.0,
                endpoints: BTreeMap::new(),
                active_users: ActiveUsers::new(active_users),
            }),
        }
    }

    /// Count one finished request against the totals and its endpoint.
    pub fn record_request(&self, method: &str, route: &str, status: u16, latency_ms: f64) {
        let method = method.to_ascii_uppercase();
        let latency_ms = clamp_latency(latency_ms);

        let mut state = self.state.lock();
        state.total_requests += 1;
        *state.requests_by_method.entry(method.clone()).or_insert(0) += 1;

        let stats = state
            .endpoints
            .entry(EndpointKey::new(method, route, status))
            .or_default();
        stats.count += 1;
        stats.total_latency_ms += latency_ms;
    }

    pub fn record_auth_outcome(&self, success: bool) {
        let mut state = self.state.lock();
        if success {
            state.auth_success += 1;
        } else {
            state.auth_failure += 1;
        }
    }

    /// Count an order attempt. Failed orders never touch revenue.
    ///
    /// `price_cents` may be fractional; revenue is kept in thousandths of a
    /// cent so sub-cent menu prices still register.
    pub fn record_order_outcome(&self, success: bool, latency_ms: f64, price_cents: f64) {
        let mut state = self.state.lock();
        if success {
            state.pizzas_sold += 1;
            state.revenue_millicents += to_millicents(price_cents);
        } else {
            state.pizza_failures += 1;
        }
        if latency_ms.is_finite() && latency_ms >= 0.0 {
            state.pizza_creation_latency_ms += latency_ms;
        }
    }

    pub fn record_active_user(&self, user_id: &str) {
        self.state.lock().active_users.record(user_id);
    }

    /// Copy every counter, then reset the window-scoped active-user gauge.
    ///
    /// Cumulative counters are never reset so the collector can derive rates.
    pub fn snapshot_and_reset_window(&self) -> AggregateSnapshot {
        let mut state = self.state.lock();
        let snapshot = Self::copy(&state);
        state.active_users.reset();
        snapshot
    }

    /// Copy every counter without touching the window.
    pub fn snapshot(&self) -> AggregateSnapshot {
        Self::copy(&self.state.lock())
    }

    fn copy(state: &AggregatorState) -> AggregateSnapshot {
        AggregateSnapshot {
            total_requests: state.total_requests,
            requests_by_method: state.requests_by_method.clone(),
            auth_success: state.auth_success,
            auth_failure: state.auth_failure,
            pizzas_sold: state.pizzas_sold,
            pizza_failures: state.pizza_failures,
            revenue_millicents: state.revenue_millicents,
            pizza_creation_latency_ms: state.pizza_creation_latency_ms,
            endpoints: state.endpoints.clone(),
            active_users: state.active_users.count(),
        }
    }
}

fn to_millicents(price_cents: f64) -> u64 {
    if price_cents.is_finite() && price_cents > 0.0 {
        (price_cents * 1000.0).round() as u64
    } else {
        0
    }
}

fn clamp_latency(latency_ms: f64) -> f64 {
    if latency_ms.is_finite() && latency_ms > 0.0 {
        latency_ms
    } else {
        0.0
    }
}
