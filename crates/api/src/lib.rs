//! Pizza service HTTP API.
//!
//! Provides the telemetry middleware, error reporting and the order routes.

pub mod error;
pub mod factory;
pub mod handlers;
pub mod middleware;
pub mod router;


pub use self::error::ApiError;
pub use self::factory::{FactoryConfig, FactoryError, HttpPizzaFactory, Order, PizzaFactory};
pub use self::handlers::AppState;
pub use self::router::{create_router, instrument};
