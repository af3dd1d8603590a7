use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use piggies_core::PiggiesError;
use serde_json::json;
use tracing::error;

/// Error returned by every handler. Renders as
/// `{"error": <kind>, "message": <text>}`.
#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed or expired bearer token, or no local user yet
    Unauthenticated(&'static str),
    Domain(PiggiesError),
    /// Blocking task panicked or was cancelled
    Internal(String),
}

impl From<PiggiesError> for ApiError {
    fn from(err: PiggiesError) -> Self {
        Self::Domain(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Domain(PiggiesError::Storage(err))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("spawn_blocking join error: {}", err))
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::Unauthenticated(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthenticated", msg.to_string())
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone()),
            Self::Domain(err) => {
                let (status, kind) = match err {
                    PiggiesError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
                    PiggiesError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    PiggiesError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
                    PiggiesError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
                    PiggiesError::External(_) => (StatusCode::BAD_GATEWAY, "external"),
                    PiggiesError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
                };
                (status, kind, err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        let message = if status.is_server_error() {
            error!("{} error: {}", kind, message);
            // Infrastructure details stay in the log
            "internal server error".to_string()
        } else {
            message
        };
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PiggiesError::unauthorized("x"), StatusCode::FORBIDDEN),
            (PiggiesError::NotFound("user"), StatusCode::NOT_FOUND),
            (PiggiesError::invalid_state("x"), StatusCode::CONFLICT),
            (PiggiesError::validation("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (PiggiesError::External("geocoder".into()), StatusCode::BAD_GATEWAY),
            (PiggiesError::Storage(anyhow::anyhow!("disk")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
        assert_eq!(
            ApiError::Unauthenticated("missing token").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
