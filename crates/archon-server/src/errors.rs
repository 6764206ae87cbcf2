//! Gateway error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Reasons a realtime connection is refused before upgrade.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The handshake identity was missing or malformed.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// What was wrong with the handshake.
        reason: String,
    },
    /// The gateway is at its connection limit.
    #[error("connection limit of {max} reached")]
    CapacityExceeded {
        /// The configured limit.
        max: usize,
    },
}

impl GatewayError {
    /// HTTP status returned instead of the upgrade.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::HandshakeRejected { .. } => StatusCode::UNAUTHORIZED,
            Self::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
