use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::common::errors::LedgerError;

/// Ledger error rendered as a JSON response
///
/// Server-side failures are logged in full and reported with a generic
/// message so no internal state leaks to the caller.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::DuplicateRequest { .. } | LedgerError::InFlight { .. } => StatusCode::CONFLICT,
            LedgerError::PriceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Persistence(_)
            | LedgerError::Serialization(_)
            | LedgerError::Configuration(_)
            | LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_server_error() {
            error!(error = %self.0, "Request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(LedgerError::Validation("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(LedgerError::InFlight { key: "k".into() }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(LedgerError::Persistence("db down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
