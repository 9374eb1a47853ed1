//! Error taxonomy shared by the REST surface and the live channel.
//!
//! Every fallible relay operation resolves to one of these kinds. REST
//! handlers return them directly (the `IntoResponse` impl produces the
//! structured body); the WebSocket loop turns them into named `error` events.

use crate::models::ErrorResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    CapacityExceeded(String),

    /// Storage or invariant failure on a path that must not fail silently
    /// (credential and prekey mutations).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// Stable wire identifier carried in error bodies and error events.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "invalid_input",
            RelayError::Unauthenticated(_) => "unauthenticated",
            RelayError::Unauthorized(_) => "unauthorized",
            RelayError::Conflict(_) => "conflict",
            RelayError::NotFound(_) => "not_found",
            RelayError::CapacityExceeded(_) => "capacity_exceeded",
            RelayError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RelayError::Unauthorized(_) => StatusCode::FORBIDDEN,
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::CapacityExceeded(_) => StatusCode::FORBIDDEN,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind().to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status_mapping() {
        let err = RelayError::Conflict("username already taken".into());
        assert_eq!(err.kind(), "conflict");
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = RelayError::CapacityExceeded("server full".into());
        assert_eq!(err.kind(), "capacity_exceeded");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = RelayError::Internal(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.kind(), "internal");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display_carries_message() {
        let err = RelayError::InvalidInput("bad registration id".into());
        assert_eq!(err.to_string(), "bad registration id");
    }
}
