//! Error types for the gateway service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rtap::error::TapError;

/// Errors returned by gateway handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Domain error from issuance, consumption, routing, or proxying.
    #[error(transparent)]
    Tap(#[from] TapError),

    /// JSON deserialization of request body failed.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Tap(err) => tap_status(err),
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

const fn tap_status(err: &TapError) -> StatusCode {
    match err {
        TapError::MalformedProof(_) | TapError::UnknownTier(_) => StatusCode::BAD_REQUEST,
        TapError::InsufficientPayment { .. } | TapError::PaymentUnverified(_) => {
            StatusCode::PAYMENT_REQUIRED
        }
        TapError::NotFound => StatusCode::UNAUTHORIZED,
        TapError::AlreadyConsumed | TapError::InsufficientTier { .. } => StatusCode::FORBIDDEN,
        TapError::RouteNotFound(_) => StatusCode::NOT_FOUND,
        TapError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        TapError::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
        TapError::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        TapError::UpstreamUnreachable(_) | TapError::UpstreamMalformed(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
