//! Administrator gate middleware
//!
//! Applied to the analytics routes only. Credentials come from the
//! `timestamp` and `hash` query parameters; the signature covers the method
//! and path, so the body is never buffered here. A verified request carries
//! an [`AdminGrant`] in its extensions; a rejected one never reaches a
//! handler.
//!
//! [`AdminGrant`]: treed_common::api::AdminGrant

use axum::{
    extract::{Query, Request, State},
    http::Uri,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tracing::warn;
use treed_common::api::{verify_admin, AuthQuery};

use crate::error::ApiError;
use crate::AppState;

/// Credential parameters as sent; other query parameters are ignored
#[derive(Debug, Default, Deserialize)]
struct CredentialParams {
    timestamp: Option<String>,
    hash: Option<String>,
}

/// Extract credentials from the query string
///
/// `Ok(None)` when either parameter is absent. A present but non-numeric
/// timestamp is a malformed request.
fn credentials_from_uri(uri: &Uri) -> Result<Option<AuthQuery>, ApiError> {
    let params = match uri.query() {
        Some(_) => {
            Query::<CredentialParams>::try_from_uri(uri)
                .map_err(|e| ApiError::BadRequest(e.body_text()))?
                .0
        }
        None => CredentialParams::default(),
    };

    let (Some(timestamp), Some(hash)) = (params.timestamp, params.hash) else {
        return Ok(None);
    };
    let timestamp = timestamp.trim().parse::<i64>().map_err(|_| {
        ApiError::BadRequest(format!("timestamp '{}' is not Unix milliseconds", timestamp))
    })?;

    Ok(Some(AuthQuery { timestamp, hash }))
}

pub async fn admin_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // An open gate ignores whatever credentials the caller sent
    let credentials = if state.admin_secret == 0 {
        None
    } else {
        credentials_from_uri(request.uri())?
    };

    let now = state.analytics.now().timestamp_millis();
    let grant = verify_admin(
        request.method().as_str(),
        request.uri().path(),
        credentials.as_ref(),
        state.admin_secret,
        now,
        state.auth_window,
    )
    .map_err(|e| {
        warn!(
            "Rejected admin request {} {}: {}",
            request.method(),
            request.uri().path(),
            e
        );
        e
    })?;

    request.extensions_mut().insert(grant);
    Ok(next.run(request).await)
}
