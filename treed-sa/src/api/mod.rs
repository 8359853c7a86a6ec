//! HTTP API handlers for treed-sa

pub mod analytics;
pub mod auth;
pub mod buildinfo;
pub mod health;
pub mod scans;

pub use analytics::{
    get_completion, get_counters, get_devices, get_languages, get_sessions, get_summary,
};
pub use auth::admin_middleware;
pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use scans::{get_time, post_client_event, post_scan, post_selection};
