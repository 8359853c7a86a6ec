//! Scan event store
//!
//! The recorder needs two kinds of write from persistence: append a scan or
//! a language selection together with its counter increment, each as one
//! atomic unit. Analytics read the logs and counters back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use treed_common::db::{InteractionCounter, LanguageCounter, LanguageSelection, ScanEvent};
use treed_common::time::from_millis;
use treed_common::{Error, LanguageCode, Result, SlotId};

/// Event to append; the store assigns its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScan {
    pub device_id: String,
    pub slot: SlotId,
    pub code: LanguageCode,
    pub recorded_at: DateTime<Utc>,
}

/// Language selection to append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSelection {
    pub device_id: String,
    pub code: LanguageCode,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Append the event and increment the (slot, code) counter
    ///
    /// Both effects are applied or neither is. The increment is an
    /// in-store atomic add, so concurrent calls never lose updates.
    async fn append_scan(&self, scan: &NewScan) -> Result<ScanEvent>;

    /// Every recorded event in insertion order
    async fn read_all_events(&self) -> Result<Vec<ScanEvent>>;

    /// Every counter that has been incremented at least once
    async fn read_counters(&self) -> Result<Vec<InteractionCounter>>;

    /// Append the selection and increment its language counter, atomically
    async fn append_selection(&self, selection: &NewSelection) -> Result<LanguageSelection>;

    /// Every recorded language selection in insertion order
    async fn read_all_selections(&self) -> Result<Vec<LanguageSelection>>;

    /// Every language counter that has been incremented at least once
    async fn read_language_counters(&self) -> Result<Vec<LanguageCounter>>;
}

/// SQLite-backed store over the `scan_events` and `interaction_counters` tables
#[derive(Debug, Clone)]
pub struct SqliteScanStore {
    pool: SqlitePool,
}

impl SqliteScanStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanStore for SqliteScanStore {
    async fn append_scan(&self, scan: &NewScan) -> Result<ScanEvent> {
        let recorded_at_ms = scan.recorded_at.timestamp_millis();

        // Dropping the transaction without commit rolls both statements back
        let mut tx = self.pool.begin().await?;

        let seq = sqlx::query(
            r#"
            INSERT INTO scan_events (device_id, slot, lang, recorded_at_ms)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&scan.device_id)
        .bind(scan.slot.as_str())
        .bind(scan.code.as_str())
        .bind(recorded_at_ms)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO interaction_counters (slot, lang, count, updated_at_ms)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(slot, lang) DO UPDATE SET
                count = count + 1,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(scan.slot.as_str())
        .bind(scan.code.as_str())
        .bind(recorded_at_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ScanEvent {
            seq,
            device_id: scan.device_id.clone(),
            slot: scan.slot.clone(),
            code: scan.code.clone(),
            recorded_at: from_millis(recorded_at_ms),
        })
    }

    async fn read_all_events(&self) -> Result<Vec<ScanEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, device_id, slot, lang, recorded_at_ms
            FROM scan_events
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ScanEvent {
                seq: row.get("seq"),
                device_id: row.get("device_id"),
                slot: SlotId::new(row.get::<String, _>("slot")),
                code: LanguageCode::new(row.get::<String, _>("lang")),
                recorded_at: from_millis(row.get("recorded_at_ms")),
            })
            .collect())
    }

    async fn read_counters(&self) -> Result<Vec<InteractionCounter>> {
        let rows = sqlx::query("SELECT slot, lang, count FROM interaction_counters ORDER BY slot, lang")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let count: i64 = row.get("count");
                Ok(InteractionCounter {
                    slot: SlotId::new(row.get::<String, _>("slot")),
                    code: LanguageCode::new(row.get::<String, _>("lang")),
                    count: u64::try_from(count)
                        .map_err(|_| Error::Internal(format!("Negative counter value {}", count)))?,
                })
            })
            .collect()
    }

    async fn append_selection(&self, selection: &NewSelection) -> Result<LanguageSelection> {
        let recorded_at_ms = selection.recorded_at.timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let seq = sqlx::query(
            r#"
            INSERT INTO language_selections (device_id, lang, recorded_at_ms)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&selection.device_id)
        .bind(selection.code.as_str())
        .bind(recorded_at_ms)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO language_counters (lang, count, updated_at_ms)
            VALUES (?, 1, ?)
            ON CONFLICT(lang) DO UPDATE SET
                count = count + 1,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(selection.code.as_str())
        .bind(recorded_at_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LanguageSelection {
            seq,
            device_id: selection.device_id.clone(),
            code: selection.code.clone(),
            recorded_at: from_millis(recorded_at_ms),
        })
    }

    async fn read_all_selections(&self) -> Result<Vec<LanguageSelection>> {
        let rows = sqlx::query(
            "SELECT seq, device_id, lang, recorded_at_ms FROM language_selections ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LanguageSelection {
                seq: row.get("seq"),
                device_id: row.get("device_id"),
                code: LanguageCode::new(row.get::<String, _>("lang")),
                recorded_at: from_millis(row.get("recorded_at_ms")),
            })
            .collect())
    }

    async fn read_language_counters(&self) -> Result<Vec<LanguageCounter>> {
        let rows = sqlx::query("SELECT lang, count FROM language_counters ORDER BY lang")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let count: i64 = row.get("count");
                Ok(LanguageCounter {
                    code: LanguageCode::new(row.get::<String, _>("lang")),
                    count: u64::try_from(count)
                        .map_err(|_| Error::Internal(format!("Negative counter value {}", count)))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treed_common::db::init_memory_database;

    fn scan(device: &str, slot: &str, code: &str, at_ms: i64) -> NewScan {
        NewScan {
            device_id: device.to_string(),
            slot: SlotId::new(slot),
            code: LanguageCode::new(code),
            recorded_at: from_millis(at_ms),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_sequence() {
        let store = SqliteScanStore::new(init_memory_database().await.unwrap());

        let first = store.append_scan(&scan("d1", "st1", "en", 1_000)).await.unwrap();
        let second = store.append_scan(&scan("d2", "st1", "en", 2_000)).await.unwrap();
        assert!(second.seq > first.seq);

        let events = store.read_all_events().await.unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[tokio::test]
    async fn test_counter_created_lazily_and_incremented() {
        let store = SqliteScanStore::new(init_memory_database().await.unwrap());
        assert!(store.read_counters().await.unwrap().is_empty());

        store.append_scan(&scan("d1", "st1", "en", 0)).await.unwrap();
        store.append_scan(&scan("d1", "st1", "en", 5_000)).await.unwrap();
        store.append_scan(&scan("d1", "st2", "fr", 9_000)).await.unwrap();

        let counters = store.read_counters().await.unwrap();
        assert_eq!(
            counters,
            vec![
                InteractionCounter {
                    slot: SlotId::new("st1"),
                    code: LanguageCode::new("en"),
                    count: 2,
                },
                InteractionCounter {
                    slot: SlotId::new("st2"),
                    code: LanguageCode::new("fr"),
                    count: 1,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_increment_rolls_back_event() {
        let pool = init_memory_database().await.unwrap();
        // Force the counter statement to fail inside the transaction
        sqlx::query(
            r#"
            CREATE TRIGGER fail_counter BEFORE INSERT ON interaction_counters
            BEGIN SELECT RAISE(ABORT, 'counter unavailable'); END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = SqliteScanStore::new(pool);
        let result = store.append_scan(&scan("d1", "st1", "en", 0)).await;
        assert!(matches!(result, Err(Error::Database(_))));

        assert!(store.read_all_events().await.unwrap().is_empty());
        assert!(store.read_counters().await.unwrap().is_empty());
    }

    fn selection(device: &str, code: &str, at_ms: i64) -> NewSelection {
        NewSelection {
            device_id: device.to_string(),
            code: LanguageCode::new(code),
            recorded_at: from_millis(at_ms),
        }
    }

    #[tokio::test]
    async fn test_selections_counted_per_language() {
        let store = SqliteScanStore::new(init_memory_database().await.unwrap());

        let first = store.append_selection(&selection("d1", "fr", 0)).await.unwrap();
        store.append_selection(&selection("d2", "fr", 1_000)).await.unwrap();
        store.append_selection(&selection("d2", "ar", 2_000)).await.unwrap();

        let counters = store.read_language_counters().await.unwrap();
        assert_eq!(
            counters,
            vec![
                LanguageCounter {
                    code: LanguageCode::new("ar"),
                    count: 1,
                },
                LanguageCounter {
                    code: LanguageCode::new("fr"),
                    count: 2,
                },
            ]
        );

        let selections = store.read_all_selections().await.unwrap();
        assert_eq!(selections.len(), 3);
        assert_eq!(selections[0], first);

        // Selections never touch the artifact counters or scan log
        assert!(store.read_counters().await.unwrap().is_empty());
        assert!(store.read_all_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_language_increment_rolls_back_selection() {
        let pool = init_memory_database().await.unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER fail_language BEFORE INSERT ON language_counters
            BEGIN SELECT RAISE(ABORT, 'counter unavailable'); END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = SqliteScanStore::new(pool);
        let result = store.append_selection(&selection("d1", "fr", 0)).await;
        assert!(matches!(result, Err(Error::Database(_))));
        assert!(store.read_all_selections().await.unwrap().is_empty());
    }
}
