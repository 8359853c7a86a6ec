//! Database initialization
//!
//! Schema creation is idempotent and runs at every start. The event logs
//! (`scan_events`, `language_selections`) are append-only and the counters
//! never decrease; triggers enforce both rules so no writer can break them.
//!
//! Version 2 added the language selection tables; opening a version 1
//! database creates them and records the new version.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 2;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the service database and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL allows analytics reads to run alongside scan writes. Options are
    // applied to every pooled connection, not just the first one.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the full schema
///
/// Limited to one connection: every SQLite `:memory:` connection is a
/// separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables, indexes and triggers if they do not exist
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_scan_events_table(pool).await?;
    create_interaction_counters_table(pool).await?;
    create_language_selection_tables(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores service key-value pairs (administrator secret and the like).
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scan_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            slot TEXT NOT NULL,
            lang TEXT NOT NULL,
            recorded_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_scan_events_visitor
        ON scan_events (device_id, slot, lang, recorded_at_ms)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS scan_events_no_update
        BEFORE UPDATE ON scan_events
        BEGIN
            SELECT RAISE(ABORT, 'scan_events is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS scan_events_no_delete
        BEFORE DELETE ON scan_events
        BEGIN
            SELECT RAISE(ABORT, 'scan_events is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_interaction_counters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interaction_counters (
            slot TEXT NOT NULL,
            lang TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
            updated_at_ms INTEGER NOT NULL,
            PRIMARY KEY (slot, lang)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS interaction_counters_monotonic
        BEFORE UPDATE OF count ON interaction_counters
        WHEN NEW.count < OLD.count
        BEGIN
            SELECT RAISE(ABORT, 'interaction counters never decrease');
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS interaction_counters_no_delete
        BEFORE DELETE ON interaction_counters
        BEGIN
            SELECT RAISE(ABORT, 'interaction counters are never deleted');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Language selections: a visitor choosing a narration language on its own
async fn create_language_selection_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS language_selections (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            lang TEXT NOT NULL,
            recorded_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS language_counters (
            lang TEXT PRIMARY KEY,
            count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
            updated_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let triggers = [
        r#"
        CREATE TRIGGER IF NOT EXISTS language_selections_no_update
        BEFORE UPDATE ON language_selections
        BEGIN
            SELECT RAISE(ABORT, 'language_selections is append-only');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS language_selections_no_delete
        BEFORE DELETE ON language_selections
        BEGIN
            SELECT RAISE(ABORT, 'language_selections is append-only');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS language_counters_monotonic
        BEFORE UPDATE OF count ON language_counters
        WHEN NEW.count < OLD.count
        BEGIN
            SELECT RAISE(ABORT, 'language counters never decrease');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS language_counters_no_delete
        BEFORE DELETE ON language_counters
        BEGIN
            SELECT RAISE(ABORT, 'language counters are never deleted');
        END
        "#,
    ];
    for trigger in triggers {
        sqlx::query(trigger).execute(pool).await?;
    }

    Ok(())
}
