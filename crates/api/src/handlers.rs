//! API request handlers.
//!
//! Order handlers are generic over the [`PizzaFactory`], allowing for easy
//! testing with mock implementations.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use pizza_telemetry::{FactoryCall, Telemetry};
use serde::Serialize;

use crate::error::ApiError;
use crate::factory::{FactoryError, Order, PizzaFactory};

/// Application state shared by all handlers.
pub struct AppState<F> {
    pub telemetry: Telemetry,
    pub factory: Arc<F>,
}

impl<F> AppState<F> {
    pub fn new(telemetry: Telemetry, factory: F) -> Self {
        Self {
            telemetry,
            factory: Arc::new(factory),
        }
    }
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            telemetry: self.telemetry.clone(),
            factory: self.factory.clone(),
        }
    }
}

/// Welcome banner.
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "welcome to JWT Pizza",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check response.
pub async fn health() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Fallback for unmatched routes.
pub async fn unknown_endpoint() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "message": "unknown endpoint" })),
    )
}

/// A pizza on the menu.
#[derive(Debug, Clone, Serialize)]
pub struct MenuItem {
    pub id: u64,
    pub title: &'static str,
    pub image: &'static str,
    pub price: f64,
    pub description: &'static str,
}

const MENU: [MenuItem; 5] = [
    MenuItem {
        id: 1,
        title: "Veggie",
        image: "pizza1.png",
        price: 0.0038,
        description: "A garden of delight",
    },
    MenuItem {
        id: 2,
        title: "Pepperoni",
        image: "pizza2.png",
        price: 0.0042,
        description: "Spicy treat",
    },
    MenuItem {
        id: 3,
        title: "Margarita",
        image: "pizza3.png",
        price: 0.0042,
        description: "Essential classic",
    },
    MenuItem {
        id: 4,
        title: "Crusty",
        image: "pizza4.png",
        price: 0.0028,
        description: "A dry mouthed favorite",
    },
    MenuItem {
        id: 5,
        title: "Charred Leopard",
        image: "pizza5.png",
        price: 0.0099,
        description: "For those with a darker side",
    },
];

/// List the pizza menu.
pub async fn get_menu() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=60")],
        Json(MENU),
    )
}

/// Forward an order to the factory and record its outcome.
///
/// A factory that answers non-2xx or cannot be reached yields a 502; both
/// count as a pizza failure.
pub async fn create_order<F>(
    State(state): State<AppState<F>>,
    Json(order): Json<Order>,
) -> Result<impl IntoResponse, ApiError>
where
    F: PizzaFactory + 'static,
{
    if order.items.is_empty() {
        return Err(ApiError::BadRequest("order has no items".to_string()));
    }

    let request_body = serde_json::to_string(&order).unwrap_or_default();
    let start = Instant::now();
    let result = state.factory.place_order(&order).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    let telemetry = &state.telemetry;
    let (status, response_body) = match &result {
        Ok(reply) => (Some(reply.status), reply.body.as_str()),
        Err(e) => {
            tracing::warn!(error = %e, "Factory request failed");
            (None, "")
        }
    };
    telemetry.log_factory_request(FactoryCall {
        url: state.factory.order_url(),
        status,
        latency_ms,
        request_body: &request_body,
        response_body,
    });

    let reply = match result {
        Ok(reply) if reply.is_success() => reply,
        Ok(reply) => {
            telemetry.record_order_outcome(false, latency_ms, 0.0);
            return Err(ApiError::Factory(FactoryError::Rejected {
                status: reply.status,
                body: reply.body,
            }));
        }
        Err(e) => {
            telemetry.record_order_outcome(false, latency_ms, 0.0);
            return Err(ApiError::Factory(e));
        }
    };

    telemetry.record_order_outcome(true, latency_ms, order.price_cents());

    let factory: serde_json::Value =
        serde_json::from_str(&reply.body).unwrap_or(serde_json::Value::Null);
    Ok(Json(serde_json::json!({
        "order": order,
        "followLinkToEndChaos": factory.get("reportUrl"),
        "jwt": factory.get("jwt"),
    })))
}
