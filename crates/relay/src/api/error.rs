//! `ApiError` couples an HTTP status, a machine-readable error code, and a
//! wrapped `anyhow::Error`. Handlers return `Result<T, ApiError>`; every
//! error response body carries both the code and a human-readable message.

use axum::http::StatusCode;
use models::ErrorCode;

#[derive(Debug, thiserror::Error)]
#[error("status: {status}, code: {code}, error: {error}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    #[source]
    pub error: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, error: anyhow::Error) -> Self {
        Self {
            status,
            code,
            error,
        }
    }

    pub fn coded(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(status, code.as_str(), anyhow::anyhow!(message.into()))
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "not_found",
            anyhow::anyhow!("{what} not found"),
        )
    }

    pub fn access_denied() -> Self {
        Self::coded(
            StatusCode::FORBIDDEN,
            ErrorCode::AccessDenied,
            "you do not have access to this resource",
        )
    }

    pub fn not_authenticated() -> Self {
        Self::coded(
            StatusCode::UNAUTHORIZED,
            ErrorCode::NotAuthenticated,
            "authentication required",
        )
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::coded(StatusCode::TOO_MANY_REQUESTS, ErrorCode::RateLimited, message)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(?error, "API responding with internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Unexpected.as_str(),
            error,
        )
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        tracing::error!(?error, "API responding with database error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Unexpected.as_str(),
            anyhow::anyhow!("database error, please retry the request"),
        )
    }
}

impl From<crate::pages::PageOpError> for ApiError {
    fn from(error: crate::pages::PageOpError) -> Self {
        use crate::pages::PageOpError;
        let status = match &error {
            PageOpError::ContentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PageOpError::CreatorOnly { .. } => StatusCode::FORBIDDEN,
            PageOpError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = error.code().as_str();
        Self::new(status, code, error.into())
    }
}

impl From<crate::invitations::InvitationError> for ApiError {
    fn from(error: crate::invitations::InvitationError) -> Self {
        use crate::invitations::InvitationError;
        let status = match &error {
            InvitationError::Invalid => StatusCode::BAD_REQUEST,
            InvitationError::EmailMismatch => StatusCode::FORBIDDEN,
            InvitationError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            InvitationError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = error.code().as_str();
        Self::new(status, code, error.into())
    }
}

impl From<crate::files::UploadError> for ApiError {
    fn from(error: crate::files::UploadError) -> Self {
        use crate::files::UploadError;
        let status = match &error {
            UploadError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::InvalidContentType(_) => StatusCode::BAD_REQUEST,
            UploadError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = error.code().as_str();
        Self::new(status, code, error.into())
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.code,
            "message": format!("{:#}", self.error),
        });
        (self.status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_body_carries_code_and_message() {
        let err = ApiError::coded(
            StatusCode::FORBIDDEN,
            ErrorCode::AccessDenied,
            "no access to this page",
        );
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, "access_denied");
        assert_eq!(format!("{:#}", err.error), "no access to this page");
    }
}
