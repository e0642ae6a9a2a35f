// =============================================================================
// ERROR MODULE
// =============================================================================
// Error taxonomy for the booking service and its HTTP mapping.
//
// Every service returns AppResult<T>. Business rejections carry enough
// structure (e.g. the contested seat numbers) for the caller to decide
// whether to pick other seats, re-authenticate or give up.
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // LOOKUP ERRORS
    // -------------------------------------------------------------------------
    /// Movie, showtime, booking or review absent
    #[error("{0} not found")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // SEAT ERRORS
    // -------------------------------------------------------------------------
    /// Requested seats are already booked
    #[error("seats already booked: {}", .seats.join(", "))]
    SeatConflict { seats: Vec<String> },

    /// Requested seats are not part of the showtime layout
    #[error("seats not in layout: {}", .seats.join(", "))]
    SeatNotFound { seats: Vec<String> },

    // -------------------------------------------------------------------------
    // REQUEST ERRORS
    // -------------------------------------------------------------------------
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Mutating another user's record, or admin-only operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("you have already reviewed this movie")]
    DuplicateReview,

    /// Operation conflicts with existing state (e.g. deleting a booked movie)
    #[error("conflict: {0}")]
    Conflict(String),

    // -------------------------------------------------------------------------
    // INFRASTRUCTURE ERRORS
    // -------------------------------------------------------------------------
    /// Storage still failing after bounded retries, or a lock wait timed out
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::SeatConflict { .. } => (StatusCode::CONFLICT, "SEAT_CONFLICT"),
            AppError::SeatNotFound { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "SEAT_NOT_FOUND"),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::DuplicateReview => (StatusCode::CONFLICT, "DUPLICATE_REVIEW"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

// =============================================================================
// STORAGE ERROR CONVERSION
// =============================================================================
// Callers that need to react to a specific StoreError (version conflicts in
// the ledger, duplicates in reviews) match on it before converting.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::StorageUnavailable(msg),
            StoreError::Missing(what) => AppError::NotFound(what),
            StoreError::InUse(msg) => AppError::Conflict(msg),
            StoreError::Duplicate(msg) | StoreError::Backend(msg) => AppError::Internal(msg),
            StoreError::VersionConflict(showtime) => {
                AppError::Internal(format!("unresolved version conflict on showtime {showtime}"))
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

// =============================================================================
// HTTP RESPONSE CONVERSION
// =============================================================================
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();

        let body = match &self {
            AppError::SeatConflict { seats } | AppError::SeatNotFound { seats } => {
                ErrorResponse::with_details(
                    error_code,
                    self.to_string(),
                    serde_json::json!({ "seats": seats }),
                )
            }
            // Don't leak storage internals to clients
            AppError::StorageUnavailable(_) => {
                ErrorResponse::new(error_code, "storage temporarily unavailable, try again")
            }
            AppError::Internal(_) => ErrorResponse::new(error_code, "an internal error occurred"),
            _ => ErrorResponse::new(error_code, self.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error_code, error = %self, "Request failed");
        } else if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            tracing::warn!(error_code, error = %self, "Request rejected");
        } else {
            tracing::debug!(error_code, error = %self, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_conflict_names_the_seats() {
        let err = AppError::SeatConflict {
            seats: vec!["A2".into(), "A3".into()],
        };
        assert_eq!(err.to_string(), "seats already booked: A2, A3");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn store_errors_map_to_specific_kinds() {
        assert!(matches!(
            AppError::from(StoreError::Unavailable("down".into())),
            AppError::StorageUnavailable(_)
        ));
        assert!(matches!(
            AppError::from(StoreError::Missing("booking".into())),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(StoreError::InUse("movie".into())),
            AppError::Conflict(_)
        ));
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::SeatNotFound { seats: vec!["Z9".into()] }.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::DuplicateReview.into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::StorageUnavailable("x".into()).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
