//! Shared API request/response types

use serde::{Deserialize, Serialize};

/// Administrator credentials carried as query parameters
///
/// ```
/// // GET /api/analytics/summary?timestamp=1730000000000&hash=abc123...
/// use treed_common::api::types::AuthQuery;
///
/// let query = AuthQuery {
///     timestamp: 1730000000000,
///     hash: "abc123...".to_string(),
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthQuery {
    /// Unix epoch time in milliseconds
    pub timestamp: i64,

    /// SHA-256 signature (64 hex chars)
    pub hash: String,
}

/// Error body returned by every endpoint
///
/// Serializes as `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable identifier
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
