//! Error types for HTTP handlers.
//!
//! Every failure leaves the API as `{ "message": ..., "errors": [...] }`.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use sgemp_core::{CoreError, ValidationError};
use sgemp_db::{DbError, ServiceError};

/// HTTP error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    errors: Vec<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    errors: &'a [String],
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = String>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 500 with a generic message; details stay in the log.
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    /// Request failed shape validation.
    pub fn validation(errors: &[ValidationError]) -> Self {
        Self::bad_request("Validation failed").with_errors(errors.iter().map(ToString::to_string))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: &self.message,
            errors: &self.errors,
        };
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Core(CoreError::Validation(e)) => Self::validation(&[e]),
            ServiceError::Core(e) if e.is_not_found() => Self::not_found(e.to_string()),
            ServiceError::Core(e) => Self::bad_request(e.to_string()),
            ServiceError::DuplicateSale(_) => Self::bad_request(err.to_string()),
            ServiceError::Db(DbError::NotFound { .. }) => Self::not_found(err.to_string()),
            ServiceError::Timeout(_) => {
                error!(error = %err, "Sale processing timed out");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service busy, try again")
            }
            ServiceError::Db(e) => {
                error!(error = %e, "Database error");
                Self::internal()
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ServiceError::Db(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("Invalid request body").with_errors([rejection.body_text()])
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request("Invalid path parameter").with_errors([rejection.body_text()])
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request("Invalid query string").with_errors([rejection.body_text()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let insufficient: ServiceError = CoreError::InsufficientStock {
            product_id: 2,
            available: 1,
            requested: 3,
        }
        .into();
        assert_eq!(ApiError::from(insufficient).status(), StatusCode::BAD_REQUEST);

        let missing: ServiceError = CoreError::CustomerNotFound(9).into();
        assert_eq!(ApiError::from(missing).status(), StatusCode::NOT_FOUND);

        assert_eq!(
            ApiError::from(ServiceError::DuplicateSale(4)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ServiceError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(DbError::QueryFailed("disk I/O error".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_lists_every_error() {
        let err = ApiError::validation(&[
            ValidationError::required("customerId"),
            ValidationError::must_be_positive("items[0].quantity"),
        ]);
        assert_eq!(err.errors.len(), 2);
        assert_eq!(err.message, "Validation failed");
    }
}
