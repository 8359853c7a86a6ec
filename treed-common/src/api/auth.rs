//! Administrator request signing and verification
//!
//! Analytics endpoints are restricted to museum administrators. Each admin
//! request carries a Unix-millisecond `timestamp` and a `hash`:
//!
//! ```text
//! hash = hex(SHA-256("{METHOD}\n{path}\n{timestamp}\n{secret}"))
//! ```
//!
//! The secret is an `i64` held in configuration or in the `settings` table.
//! A secret of 0 disables the check entirely (local development only).
//!
//! Passing the gate yields an [`AdminGrant`]; analytics operations require
//! one, so nothing can be computed for a caller that was not verified.
//!
//! This module has no HTTP framework dependencies; the service wraps it in
//! its own middleware.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use super::types::AuthQuery;
use crate::db::settings::{get_setting, set_setting};

/// Settings key holding the administrator secret
pub const ADMIN_SECRET_KEY: &str = "admin_shared_secret";

// ========================================
// Error Types
// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Timestamp outside acceptable window
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp {
        timestamp: i64,
        now: i64,
        reason: String,
    },

    /// Signature does not match
    #[error("Invalid hash")]
    InvalidHash,

    /// Request carried no credentials
    #[error("Missing timestamp or hash")]
    MissingCredentials,

    /// Database error loading or storing the secret
    #[error("Database error: {0}")]
    Database(String),
}

// ========================================
// Grant
// ========================================

/// Proof that the caller passed the administrator gate
///
/// Only [`verify_admin`] constructs one.
#[derive(Debug, Clone)]
pub struct AdminGrant {
    _verified: (),
}

impl AdminGrant {
    fn issue() -> Self {
        Self { _verified: () }
    }
}

/// Accepted age and skew of a signed request timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthWindow {
    pub max_age_ms: i64,
    pub max_skew_ms: i64,
}

impl Default for AuthWindow {
    fn default() -> Self {
        Self {
            max_age_ms: 30_000,
            max_skew_ms: 1_000,
        }
    }
}

// ========================================
// Secret Management
// ========================================

/// Load the administrator secret, generating one on first use
pub async fn load_admin_secret(db: &SqlitePool) -> Result<i64, AuthError> {
    let stored: Option<i64> = get_setting(db, ADMIN_SECRET_KEY)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

    match stored {
        Some(secret) => Ok(secret),
        None => initialize_admin_secret(db).await,
    }
}

/// Generate and store a random non-zero secret
pub async fn initialize_admin_secret(db: &SqlitePool) -> Result<i64, AuthError> {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let secret: i64 = loop {
        let val = rng.gen::<i64>();
        if val != 0 {
            break val;
        }
    };

    set_setting(db, ADMIN_SECRET_KEY, secret)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

    info!("Generated new administrator secret (settings key '{}')", ADMIN_SECRET_KEY);
    Ok(secret)
}

// ========================================
// Validation
// ========================================

/// Check a request timestamp against the server time
pub fn validate_timestamp(timestamp: i64, now: i64, window: AuthWindow) -> Result<(), AuthError> {
    // Timestamps far enough from `now` to overflow are outside any window
    let age = now
        .checked_sub(timestamp)
        .ok_or_else(|| AuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {} out of range", timestamp),
        })?;

    if age > window.max_age_ms {
        return Err(AuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms)", age, window.max_age_ms),
        });
    }

    let ahead = age.saturating_neg();
    if ahead > window.max_skew_ms {
        return Err(AuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}ms in future (max {}ms)",
                ahead, window.max_skew_ms
            ),
        });
    }

    Ok(())
}

/// Signature for one administrator request, as 64 hex characters
pub fn calculate_signature(method: &str, path: &str, timestamp: i64, secret: i64) -> String {
    let canonical = format!(
        "{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        timestamp,
        secret
    );
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Verify an administrator request and issue a grant
///
/// `now` is the server time in Unix milliseconds.
pub fn verify_admin(
    method: &str,
    path: &str,
    credentials: Option<&AuthQuery>,
    secret: i64,
    now: i64,
    window: AuthWindow,
) -> Result<AdminGrant, AuthError> {
    if secret == 0 {
        return Ok(AdminGrant::issue());
    }

    let credentials = credentials.ok_or(AuthError::MissingCredentials)?;
    validate_timestamp(credentials.timestamp, now, window)?;

    let expected = calculate_signature(method, path, credentials.timestamp, secret);
    if !constant_time_eq(expected.as_bytes(), credentials.hash.to_ascii_lowercase().as_bytes()) {
        return Err(AuthError::InvalidHash);
    }

    Ok(AdminGrant::issue())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ========================================
// Tests
// ========================================
