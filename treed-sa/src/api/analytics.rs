//! Administrator analytics endpoints
//!
//! Routed behind [`admin_middleware`](super::admin_middleware), which puts
//! the [`AdminGrant`] these handlers require into the request extensions.

use axum::{
    extract::{Extension, State},
    Json,
};
use treed_common::api::AdminGrant;

use crate::error::ApiResult;
use crate::evaluator::Evaluation;
use crate::reporter::{
    CompletionReport, DeviceActivity, LanguageTally, PairCounter, ReportSummary,
};
use crate::AppState;

/// GET /api/analytics/sessions
pub async fn get_sessions(
    State(state): State<AppState>,
    Extension(grant): Extension<AdminGrant>,
) -> ApiResult<Json<Evaluation>> {
    Ok(Json(state.analytics.evaluate(&grant).await?))
}

/// GET /api/analytics/completion
pub async fn get_completion(
    State(state): State<AppState>,
    Extension(grant): Extension<AdminGrant>,
) -> ApiResult<Json<CompletionReport>> {
    Ok(Json(state.analytics.summarize(&grant).await?))
}

/// GET /api/analytics/summary
pub async fn get_summary(
    State(state): State<AppState>,
    Extension(grant): Extension<AdminGrant>,
) -> ApiResult<Json<ReportSummary>> {
    Ok(Json(state.analytics.summary(&grant).await?))
}

/// GET /api/analytics/counters
pub async fn get_counters(
    State(state): State<AppState>,
    Extension(grant): Extension<AdminGrant>,
) -> ApiResult<Json<Vec<PairCounter>>> {
    Ok(Json(state.analytics.counters(&grant).await?))
}

/// GET /api/analytics/languages
pub async fn get_languages(
    State(state): State<AppState>,
    Extension(grant): Extension<AdminGrant>,
) -> ApiResult<Json<Vec<LanguageTally>>> {
    Ok(Json(state.analytics.languages(&grant).await?))
}

/// GET /api/analytics/devices
pub async fn get_devices(
    State(state): State<AppState>,
    Extension(grant): Extension<AdminGrant>,
) -> ApiResult<Json<Vec<DeviceActivity>>> {
    Ok(Json(state.analytics.devices(&grant).await?))
}
