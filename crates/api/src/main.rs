//! Pizza service API server.

use std::env;
use std::net::SocketAddr;

use pizza_api::{AppState, FactoryConfig, HttpPizzaFactory, create_router};
use pizza_observability::{init_tracing, init_tracing_dev};
use pizza_telemetry::{Telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match env::var("LOG_FORMAT").as_deref() {
        Ok("json") => init_tracing(),
        _ => init_tracing_dev(),
    }

    let config = TelemetryConfig::from_env()?;
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let factory_config = FactoryConfig::from_env();

    tracing::info!(
        environment = %config.environment,
        factory_url = %factory_config.url,
        bind_addr = %bind_addr,
        "Starting API server"
    );

    let metrics_handle = pizza_observability::init_metrics();

    let telemetry = Telemetry::new(&config);
    let tasks = telemetry.start(&config);

    let state = AppState::new(telemetry, HttpPizzaFactory::new(factory_config));
    let app = create_router(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tasks.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
