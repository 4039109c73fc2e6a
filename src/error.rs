use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// The main error type for siteward.
#[derive(Debug, thiserror::Error)]
pub enum SitewardError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Publication(#[from] crate::publication::PublicationError),

    #[error(transparent)]
    Processor(#[from] crate::processor::ProcessorError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Standard error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_id: String,
}

impl SitewardError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) | Self::Anyhow(_) | Self::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::Publication(e) => e.status_code(),
            Self::Processor(e) => e.status_code(),
        }
    }

    /// Message safe to expose to clients.
    ///
    /// Client errors (4xx) carry their real message; server errors (5xx)
    /// collapse to a generic message and keep the detail in the server logs.
    fn safe_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::SERVICE_UNAVAILABLE => "Service unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for SitewardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            status = status.as_u16(),
            error_id = %error_id,
            error = %self,
            "Request failed"
        );

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            error_id,
        });

        (status, body).into_response()
    }
}

/// Result type alias for siteward operations.
pub type Result<T> = std::result::Result<T, SitewardError>;

impl From<serde_json::Error> for SitewardError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            SitewardError::BadRequest(format!("JSON error: {}", err))
        } else {
            SitewardError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<reqwest::Error> for SitewardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SitewardError::RequestTimeout
        } else if err.is_connect() {
            SitewardError::ServiceUnavailable(format!("Connection error: {}", err))
        } else {
            SitewardError::Internal(format!("Request error: {}", err))
        }
    }
}

impl From<sea_orm::DbErr> for SitewardError {
    fn from(err: sea_orm::DbErr) -> Self {
        match &err {
            sea_orm::DbErr::RecordNotFound(msg) => SitewardError::NotFound(if msg.is_empty() {
                "Record not found".to_string()
            } else {
                msg.clone()
            }),
            sea_orm::DbErr::Query(inner) => {
                SitewardError::Database(format!("Query error: {}", inner))
            }
            sea_orm::DbErr::Exec(inner) => {
                SitewardError::Database(format!("Execution error: {}", inner))
            }
            sea_orm::DbErr::Conn(inner) => {
                SitewardError::Database(format!("Connection error: {}", inner))
            }
            _ => SitewardError::Database(format!("Database error: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = SitewardError::not_found("Site not found");
        assert!(matches!(err, SitewardError::NotFound(_)));
        assert_eq!(err.to_string(), "Not found: Site not found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unauthorized_error() {
        let err = SitewardError::unauthorized("bad token");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_safe_message_hides_internal_detail() {
        let err = SitewardError::internal("db password is 'secret123'");
        assert_eq!(err.safe_message(), "Internal server error");

        let err = SitewardError::bad_request("missing subdomain");
        assert_eq!(err.safe_message(), "Bad request: missing subdomain");
    }

    #[test]
    fn test_from_serde_json_syntax_error() {
        let result: std::result::Result<serde_json::Value, _> =
            serde_json::from_str("{ invalid json }");
        let err: SitewardError = result.unwrap_err().into();
        assert!(matches!(err, SitewardError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_into_response_status() {
        let err = SitewardError::bad_request("nope");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
