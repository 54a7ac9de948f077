use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::trips::TripError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

pub fn not_found(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(message)))
}

pub fn internal_error<E: std::fmt::Display>(e: E) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error")),
    )
}

/// Map a state-machine error onto its HTTP shape. Conflicts keep their
/// actionable message; storage failures collapse into a generic 500.
pub fn trip_error(e: TripError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        TripError::InvalidDriverId | TripError::InvalidBusNumber => StatusCode::UNAUTHORIZED,
        TripError::AlreadyActive | TripError::TripStillActive => StatusCode::CONFLICT,
        TripError::TripNotFound => StatusCode::NOT_FOUND,
        TripError::Validation(_) => StatusCode::BAD_REQUEST,
        TripError::Store(_) => return internal_error(e),
    };
    (status, Json(ErrorResponse::new(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_keep_their_message() {
        let (status, body) = trip_error(TripError::TripStillActive);
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.error.contains("end the trip first"));

        let (status, _) = trip_error(TripError::AlreadyActive);
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn storage_errors_are_masked() {
        let (status, body) = trip_error(TripError::Store(
            crate::store::StoreError::Database("connection reset".into()),
        ));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Internal server error");
    }

    #[test]
    fn lookup_errors_are_unauthorized() {
        let (status, body) = trip_error(TripError::InvalidDriverId);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.error, "Invalid driver ID");
    }
}
