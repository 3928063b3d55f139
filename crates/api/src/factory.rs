//! Client for the pizza factory that fulfills orders.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_FACTORY_URL: &str = "https://pizza-factory.cs329.click";

/// Error placing an order with the factory.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("factory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("factory rejected order with status {status}")]
    Rejected { status: u16, body: String },

    #[error("factory unavailable: {0}")]
    Unavailable(String),
}

/// One pizza on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub menu_id: u64,
    pub description: String,
    pub price: f64,
}

/// Order as posted by the client and forwarded to the factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub franchise_id: u64,
    pub store_id: u64,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Order total in cents, unrounded; menu prices are fractions of a cent.
    pub fn price_cents(&self) -> f64 {
        self.items.iter().map(|item| item.price).sum::<f64>() * 100.0
    }
}

/// Raw reply from the factory; any status counts as a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryReply {
    pub status: u16,
    pub body: String,
}

impl FactoryReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Order fulfillment backend.
///
/// This trait can be mocked for testing the order handler.
pub trait PizzaFactory: Send + Sync {
    /// Endpoint orders are posted to, for logging.
    fn order_url(&self) -> &str;

    fn place_order(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<FactoryReply, FactoryError>> + Send;
}

/// Factory connection settings.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FACTORY_URL.to_string(),
            api_key: None,
        }
    }
}

impl FactoryConfig {
    /// Read `FACTORY_URL` and `FACTORY_API_KEY`, ignoring empty values.
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok().filter(|s| !s.is_empty());
        Self {
            url: get("FACTORY_URL").unwrap_or_else(|| DEFAULT_FACTORY_URL.to_string()),
            api_key: get("FACTORY_API_KEY"),
        }
    }
}

/// [`PizzaFactory`] over HTTP.
#[derive(Clone)]
pub struct HttpPizzaFactory {
    client: reqwest::Client,
    order_url: String,
    api_key: Option<String>,
}

impl HttpPizzaFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            order_url: format!("{}/api/order", config.url.trim_end_matches('/')),
            api_key: config.api_key,
        }
    }
}

impl PizzaFactory for HttpPizzaFactory {
    fn order_url(&self) -> &str {
        &self.order_url
    }

    async fn place_order(&self, order: &Order) -> Result<FactoryReply, FactoryError> {
        let mut request = self
            .client
            .post(&self.order_url)
            .json(&serde_json::json!({ "order": order }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(FactoryReply { status, body })
    }
}
