//! API error taxonomy.
//!
//! Every handler failure is one of these kinds; the axum response mapping
//! emits the `{code, msg}` JSON envelope with the matching HTTP status.
//! Whether a rejection also lands in the audit log is the handler's call,
//! not the error type's.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::json;
use snafu::Snafu;

/// A request-scoped API failure.
#[derive(Debug, Snafu)]
pub enum ApiError {
    /// Malformed input: missing fields, bad base64, empty path segment.
    #[snafu(display("{message}"))]
    BadRequest {
        /// Client-visible reason.
        message: String,
    },

    /// Missing, invalid, or already-consumed bearer; bad HMAC.
    #[snafu(display("{message}"))]
    Unauthorized {
        /// Client-visible reason.
        message: String,
    },

    /// Allowance exhausted on the verify path.
    #[snafu(display("{message}"))]
    Forbidden {
        /// Client-visible reason.
        message: String,
    },

    /// Unregistered or blocked device asking for firmware.
    #[snafu(display("{message}"))]
    Conflict {
        /// Client-visible reason.
        message: String,
    },

    /// Unknown resource, e.g. an audit category that does not exist.
    #[snafu(display("{message}"))]
    NotFound {
        /// Client-visible reason.
        message: String,
    },

    /// I/O or crypto infrastructure failure.
    #[snafu(display("{message}"))]
    Internal {
        /// Client-visible reason.
        message: String,
    },
}

impl ApiError {
    /// Build a [`ApiError::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest { message: message.into() }
    }

    /// Build a [`ApiError::Unauthorized`].
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized { message: message.into() }
    }

    /// Build a [`ApiError::Forbidden`].
    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden { message: message.into() }
    }

    /// Build a [`ApiError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict { message: message.into() }
    }

    /// Build a [`ApiError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound { message: message.into() }
    }

    /// Build an [`ApiError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal { message: message.into() }
    }

    /// The HTTP status this kind maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "code": status.as_u16(),
            "msg": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::internal("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display_is_the_message() {
        let err = ApiError::unauthorized("invalid signature");
        assert_eq!(err.to_string(), "invalid signature");
    }
}
