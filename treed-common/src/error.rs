//! Errors shared by the Tree-D crates
//!
//! Name lookups against the catalog have their own `CatalogError`; this enum
//! covers opening, configuring and reading or writing the store.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure, including rejected writes from schema triggers
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Root folder, database or config file not accessible
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or catalog file malformed or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored data violates an invariant the schema should have enforced
    #[error("Internal error: {0}")]
    Internal(String),
}
