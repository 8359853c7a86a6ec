//! API functionality shared by Tree-D services
//!
//! Contains only pure functions, database operations and shared types;
//! each service wraps these with its own Axum middleware.

pub mod auth;
pub mod types;

pub use auth::{
    calculate_signature, load_admin_secret, validate_timestamp, verify_admin, AdminGrant,
    AuthError, AuthWindow,
};
pub use types::{AuthQuery, ErrorResponse};
