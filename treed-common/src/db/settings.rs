//! Settings table access (key-value store)

use crate::{Error, Result};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Generic setting getter
///
/// Returns None if key doesn't exist in database.
/// Parses value from string using FromStr trait.
pub async fn get_setting<T: FromStr>(db: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn test_missing_setting_is_none() {
        let db = init_memory_database().await.unwrap();
        let value: Option<i64> = get_setting(&db, "nothing_here").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_overwrites() {
        let db = init_memory_database().await.unwrap();
        set_setting(&db, "admin_shared_secret", 17i64).await.unwrap();
        set_setting(&db, "admin_shared_secret", 23i64).await.unwrap();

        let value: Option<i64> = get_setting(&db, "admin_shared_secret").await.unwrap();
        assert_eq!(value, Some(23));
    }

    #[tokio::test]
    async fn test_unparseable_setting_is_config_error() {
        let db = init_memory_database().await.unwrap();
        set_setting(&db, "admin_shared_secret", "not-a-number").await.unwrap();

        let result: Result<Option<i64>> = get_setting(&db, "admin_shared_secret").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
