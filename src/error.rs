//! Unified gateway error type.
//!
//! Every handler returns `Result<T, ApiError>`. Client errors carry their
//! message through to the response body. Downstream and internal failures are
//! logged in full and answered with a generic message plus a correlation id,
//! so CRM payloads, SQL and provider responses never reach the caller.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::integrations::IntegrationError;
use crate::security::cipher::CipherError;
use crate::security::tokens::TokenError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// `correlation_id` is echoed to the caller and matches the audit entry,
    /// if the handler wrote one.
    #[error("integration failure: {source}")]
    Integration {
        source: IntegrationError,
        correlation_id: String,
    },

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn integration(source: IntegrationError, correlation_id: impl Into<String>) -> Self {
        ApiError::Integration {
            source,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Integration { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(m)
            | ApiError::Unauthorized(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m) => json!({ "success": false, "message": m }),

            ApiError::RateLimited { retry_after } => json!({
                "success": false,
                "message": "Rate limit exceeded. Please try again later.",
                "retry_after": retry_after,
            }),

            ApiError::Integration { source, correlation_id } => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    service = source.service(),
                    error = %source,
                    "downstream call failed"
                );
                json!({
                    "success": false,
                    "message": "An upstream service is unavailable. Please try again later.",
                    "correlation_id": correlation_id,
                })
            }

            ApiError::Store(e) => {
                let correlation_id = Uuid::new_v4().to_string();
                tracing::error!(correlation_id = %correlation_id, error = %e, "store error");
                json!({
                    "success": false,
                    "message": "Internal server error",
                    "correlation_id": correlation_id,
                })
            }

            ApiError::Internal(m) => {
                let correlation_id = Uuid::new_v4().to_string();
                tracing::error!(correlation_id = %correlation_id, message = %m, "internal server error");
                json!({
                    "success": false,
                    "message": "Internal server error",
                    "correlation_id": correlation_id,
                })
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<IntegrationError> for ApiError {
    fn from(e: IntegrationError) -> Self {
        ApiError::integration(e, Uuid::new_v4().to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            other => ApiError::Store(other),
        }
    }
}

impl From<CipherError> for ApiError {
    fn from(e: CipherError) -> Self {
        // Cipher detail stays in the server log.
        ApiError::Internal(format!("field cipher: {}", e))
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => ApiError::Unauthorized("Token has expired".to_string()),
            TokenError::Invalid(_) | TokenError::WrongType { .. } => {
                ApiError::Unauthorized("Invalid or expired token".to_string())
            }
            TokenError::Signing(m) => ApiError::Internal(m),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("Malformed request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(format!("Invalid query parameters: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(format!("Invalid path parameter: {}", rejection.body_text()))
    }
}
