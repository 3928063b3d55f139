//! API error responses.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use pizza_telemetry::ErrorReport;
use thiserror::Error;

use crate::factory::FactoryError;

/// Errors returned by handlers.
///
/// The response carries an [`ErrorReport`] extension, which the logging
/// middleware turns into an `error` stream entry.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Failed to fulfill order at factory")]
    Factory(#[source] FactoryError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Factory(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::Factory(_) => "FactoryError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = ErrorReport::from_error(self.name(), &self);
        let mut response = (
            self.status(),
            [(header::CACHE_CONTROL, "no-store")],
            Json(serde_json::json!({ "message": self.to_string() })),
        )
            .into_response();
        response.extensions_mut().insert(report);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_error_keeps_cause_in_report() {
        let err = ApiError::Factory(FactoryError::Unavailable("connection refused".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.name, "FactoryError");
        assert_eq!(report.message, "Failed to fulfill order at factory");
        assert_eq!(report.stack, "caused by: factory unavailable: connection refused");
    }

    #[test]
    fn bad_request_maps_to_400() {
        let response = ApiError::BadRequest("order has no items".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }
}
