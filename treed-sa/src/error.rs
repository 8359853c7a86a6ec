//! Error types for treed-sa
//!
//! `Error` is what the analytics core returns; its three kinds (invalid
//! input, catalog/configuration, store) stay distinguishable all the way to
//! the HTTP layer. `ApiError` maps them, plus authentication failures, onto
//! status codes and the shared JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use treed_common::api::{AuthError, ErrorResponse};
use treed_common::CatalogError;

/// Analytics core error
#[derive(Debug, Error)]
pub enum Error {
    /// Scan payload missing a required field
    #[error("Invalid scan: {0}")]
    InvalidScan(String),

    /// Name or duration not present in the catalog
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Persistence failure; nothing was applied
    #[error("Store error: {0}")]
    Store(#[from] treed_common::Error),
}

/// Convenience Result type using the analytics core Error
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP-facing error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Analytics(#[from] Error),

    /// Administrator gate rejected the request
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Analytics(Error::InvalidScan(_)) => (StatusCode::BAD_REQUEST, "INVALID_SCAN"),
            ApiError::Analytics(Error::Catalog(CatalogError::UnknownArtifact(_))) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_ARTIFACT")
            }
            ApiError::Analytics(Error::Catalog(CatalogError::UnknownLanguage(_))) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_LANGUAGE")
            }
            ApiError::Analytics(Error::Catalog(CatalogError::MissingDuration { .. })) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR")
            }
            ApiError::Analytics(Error::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR")
            }
            ApiError::Auth(AuthError::MissingCredentials) => {
                (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED")
            }
            ApiError::Auth(AuthError::InvalidTimestamp { .. }) => {
                (StatusCode::UNAUTHORIZED, "TIMESTAMP_INVALID")
            }
            ApiError::Auth(AuthError::InvalidHash) => (StatusCode::UNAUTHORIZED, "HASH_INVALID"),
            ApiError::Auth(AuthError::Database(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_UNAVAILABLE")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = Json(ErrorResponse::new(code, self.to_string()));
        (status, body).into_response()
    }
}
