//! Integration tests for on-disk database initialization

use treed_common::db::init::{init_database, SCHEMA_VERSION};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("treed.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("treed.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO scan_events (device_id, slot, lang, recorded_at_ms) VALUES ('d1', 'st1', 'en', 0)",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    // Reopening keeps existing rows
    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_events")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_expected_tables_exist() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("treed.db")).await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(
        tables,
        vec![
            "interaction_counters",
            "language_counters",
            "language_selections",
            "scan_events",
            "schema_version",
            "settings",
        ]
    );

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("treed.db")).await.unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}
