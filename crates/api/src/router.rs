//! Router configuration for the API.

use axum::{
    Router,
    http::header,
    middleware,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use pizza_telemetry::Telemetry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::factory::PizzaFactory;
use crate::handlers::{AppState, create_order, get_menu, health, root, unknown_endpoint};
use crate::middleware::{log_http, track_requests};

/// Create the API router with the given state and metrics handle.
///
/// Every route, the fallback included, passes through the request tracker
/// and HTTP logging middleware.
pub fn create_router<F>(state: AppState<F>, metrics_handle: PrometheusHandle) -> Router
where
    F: PizzaFactory + 'static,
{
    let telemetry = state.telemetry.clone();

    let routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route(
            "/metrics",
            get(move || async move {
                (
                    [(header::CACHE_CONTROL, "no-store")],
                    metrics_handle.render(),
                )
            }),
        )
        .route("/api/order/menu", get(get_menu))
        .route("/api/order", post(create_order::<F>))
        .fallback(unknown_endpoint)
        .with_state(state);

    instrument(routes, telemetry)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Wrap `router` in the telemetry middleware.
///
/// The tracker is outermost so its latency covers body capture as well.
pub fn instrument(router: Router, telemetry: Telemetry) -> Router {
    router
        .layer(middleware::from_fn_with_state(telemetry.clone(), log_http))
        .layer(middleware::from_fn_with_state(telemetry, track_requests))
}

/// Create a router for testing without the metrics endpoint.
#[cfg(test)]
pub fn create_test_router<F>(state: AppState<F>) -> Router
where
    F: PizzaFactory + 'static,
{
    let telemetry = state.telemetry.clone();
    let routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/order/menu", get(get_menu))
        .route("/api/order", post(create_order::<F>))
        .fallback(unknown_endpoint)
        .with_state(state);

    instrument(routes, telemetry)
}
