//! treed-sa library - Scan Analytics service
//!
//! Records QR scans from museum visitors and turns the scan log into
//! listening-completion analytics for administrators.

use axum::http::{HeaderValue, Method};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use treed_common::api::AuthWindow;

pub mod api;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod recorder;
pub mod reporter;
pub mod store;

pub use engine::ScanAnalytics;
pub use error::{ApiError, ApiResult, Error, Result};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub analytics: Arc<ScanAnalytics>,
    /// Administrator secret; 0 disables the admin gate
    pub admin_secret: i64,
    pub auth_window: AuthWindow,
}

impl AppState {
    pub fn new(analytics: Arc<ScanAnalytics>, admin_secret: i64, auth_window: AuthWindow) -> Self {
        Self {
            analytics,
            admin_secret,
            auth_window,
        }
    }
}

/// Build application router
///
/// Scan recording, server time and health are open. Everything under
/// `/api` passes the administrator gate first.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let protected = Router::new()
        .route("/api/analytics/sessions", get(api::get_sessions))
        .route("/api/analytics/completion", get(api::get_completion))
        .route("/api/analytics/summary", get(api::get_summary))
        .route("/api/analytics/counters", get(api::get_counters))
        .route("/api/analytics/languages", get(api::get_languages))
        .route("/api/analytics/devices", get(api::get_devices))
        .route("/api/buildinfo", get(api::get_build_info))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::admin_middleware,
        ));

    let public = Router::new()
        .route("/scans", post(api::post_scan))
        .route("/selections", post(api::post_selection))
        .route("/postdata", post(api::post_client_event))
        .route("/time", get(api::get_time))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS layer admitting the configured dashboard origins
///
/// Origins that are not valid header values are skipped with a warning.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE])
}
