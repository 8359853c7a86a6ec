//! Event recording and server time endpoints
//!
//! All are open: QR clients call them without administrator credentials.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::recorder::{
    ClientEvent, RawScan, RecordedEvent, RecordedScan, RecordedSelection, ScanRequest,
    SelectionRequest,
};
use crate::AppState;

fn body(payload: Result<Json<RawScan>, JsonRejection>) -> ApiResult<RawScan> {
    let Json(raw) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    debug!("Event payload: {:?}", raw);
    Ok(raw)
}

/// POST /scans
pub async fn post_scan(
    State(state): State<AppState>,
    payload: Result<Json<RawScan>, JsonRejection>,
) -> ApiResult<Json<RecordedScan>> {
    let request = ScanRequest::try_from(body(payload)?)?;
    let recorded = state.analytics.record(&request).await?;
    Ok(Json(recorded))
}

/// POST /selections
pub async fn post_selection(
    State(state): State<AppState>,
    payload: Result<Json<RawScan>, JsonRejection>,
) -> ApiResult<Json<RecordedSelection>> {
    let request = SelectionRequest::try_from(body(payload)?)?;
    let recorded = state.analytics.select_language(&request).await?;
    Ok(Json(recorded))
}

/// POST /postdata
///
/// Legacy client endpoint carrying both event kinds.
pub async fn post_client_event(
    State(state): State<AppState>,
    payload: Result<Json<RawScan>, JsonRejection>,
) -> ApiResult<Json<RecordedEvent>> {
    let event = ClientEvent::try_from(body(payload)?)?;
    let recorded = state.analytics.record_event(&event).await?;
    Ok(Json(recorded))
}

#[derive(Debug, Serialize)]
pub struct TimeResponse {
    /// `HH:MM:SS`, UTC
    pub current_time: String,
    /// `YYYY-MM-DD`, UTC
    pub current_date: String,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

/// GET /time
///
/// Clients use this to sign administrator requests against server time.
pub async fn get_time(State(state): State<AppState>) -> Json<TimeResponse> {
    let now = state.analytics.now();
    Json(TimeResponse {
        current_time: now.format("%H:%M:%S").to_string(),
        current_date: now.format("%Y-%m-%d").to_string(),
        timestamp: now.timestamp_millis(),
    })
}
