use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};

use super::SeenLedger;
use crate::error::StoreError;
use crate::models::SeenEntry;

/// SQLite-backed ledger, the default store
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) the database file and its schema
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        // One connection: a run is a single writer cycle.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.migrate().await?;

        info!(path = %path.display(), "Opened SQLite ledger");

        Ok(ledger)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partitions (
                endpoint TEXT PRIMARY KEY NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_changes (
                endpoint TEXT NOT NULL REFERENCES partitions(endpoint) ON DELETE CASCADE,
                change_id TEXT NOT NULL,
                first_reported_at TEXT NOT NULL,
                PRIMARY KEY (endpoint, change_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn require_partition(
        tx: &mut Transaction<'_, Sqlite>,
        endpoint: &str,
    ) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM partitions WHERE endpoint = ?")
            .bind(endpoint)
            .fetch_optional(&mut **tx)
            .await?
            .is_some();

        if exists {
            Ok(())
        } else {
            Err(StoreError::MissingPartition(endpoint.to_string()))
        }
    }
}

#[async_trait]
impl SeenLedger for SqliteLedger {
    async fn ensure_partition(&self, endpoint: &str) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO partitions (endpoint) VALUES (?)")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(endpoint, "Created ledger partition");
        }
        Ok(())
    }

    async fn check_and_mark(&self, endpoint: &str, change_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::require_partition(&mut tx, endpoint).await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO seen_changes (endpoint, change_id, first_reported_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(endpoint)
        .bind(change_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reconcile(&self, endpoint: &str, open: &HashSet<String>) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::require_partition(&mut tx, endpoint).await?;

        let rows = sqlx::query("SELECT change_id FROM seen_changes WHERE endpoint = ?")
            .bind(endpoint)
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = 0;
        for row in rows {
            let change_id: String = row.try_get("change_id")?;
            if open.contains(&change_id) {
                continue;
            }
            sqlx::query("DELETE FROM seen_changes WHERE endpoint = ? AND change_id = ?")
                .bind(endpoint)
                .bind(&change_id)
                .execute(&mut *tx)
                .await?;
            removed += 1;
        }

        tx.commit().await?;

        debug!(endpoint, removed, "Reconciled ledger partition");
        Ok(removed)
    }

    async fn entries(&self, endpoint: &str) -> Result<Vec<SeenEntry>, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::require_partition(&mut tx, endpoint).await?;

        let rows = sqlx::query(
            r#"
            SELECT change_id, first_reported_at
            FROM seen_changes
            WHERE endpoint = ?
            ORDER BY CAST(change_id AS INTEGER), change_id
            "#,
        )
        .bind(endpoint)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.iter()
            .map(|row| -> Result<SeenEntry, StoreError> {
                Ok(SeenEntry {
                    change_id: row.try_get("change_id")?,
                    first_reported_at: row.try_get::<DateTime<Utc>, _>("first_reported_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ENDPOINT: &str = "https://review.example.org/";

    async fn open_temp() -> (tempfile::TempDir, SqliteLedger) {
        let dir = tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("seen.db")).await.unwrap();
        ledger.ensure_partition(ENDPOINT).await.unwrap();
        (dir, ledger)
    }

    #[tokio::test]
    async fn test_check_and_mark_is_idempotent() {
        let (_dir, ledger) = open_temp().await;

        assert!(ledger.check_and_mark(ENDPOINT, "42").await.unwrap());
        assert!(!ledger.check_and_mark(ENDPOINT, "42").await.unwrap());

        let entries = ledger.entries(ENDPOINT).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change_id, "42");
    }

    #[tokio::test]
    async fn test_ensure_partition_is_a_noop_when_present() {
        let (_dir, ledger) = open_temp().await;
        ledger.check_and_mark(ENDPOINT, "1").await.unwrap();

        ledger.ensure_partition(ENDPOINT).await.unwrap();

        assert_eq!(ledger.entries(ENDPOINT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_removes_closed_changes() {
        let (_dir, ledger) = open_temp().await;
        for id in ["A", "B", "C"] {
            ledger.check_and_mark(ENDPOINT, id).await.unwrap();
        }

        let open: HashSet<String> = ["A", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ledger.reconcile(ENDPOINT, &open).await.unwrap(), 1);

        let ids: Vec<String> = ledger
            .entries(ENDPOINT)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.change_id)
            .collect();
        assert_eq!(ids, vec!["A", "C"]);

        assert!(ledger.check_and_mark(ENDPOINT, "B").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_ordered_by_change_number() {
        let (_dir, ledger) = open_temp().await;
        for id in ["9", "10", "2"] {
            ledger.check_and_mark(ENDPOINT, id).await.unwrap();
        }

        let ids: Vec<String> = ledger
            .entries(ENDPOINT)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.change_id)
            .collect();
        assert_eq!(ids, vec!["2", "9", "10"]);
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let (_dir, ledger) = open_temp().await;
        let other = "https://other.example.org/";
        ledger.ensure_partition(other).await.unwrap();

        assert!(ledger.check_and_mark(ENDPOINT, "7").await.unwrap());
        assert!(ledger.check_and_mark(other, "7").await.unwrap());

        ledger.reconcile(ENDPOINT, &HashSet::new()).await.unwrap();
        assert!(ledger.entries(ENDPOINT).await.unwrap().is_empty());
        assert_eq!(ledger.entries(other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.db");
        {
            let ledger = SqliteLedger::open(&path).await.unwrap();
            ledger.ensure_partition(ENDPOINT).await.unwrap();
            ledger.check_and_mark(ENDPOINT, "9").await.unwrap();
            ledger.pool.close().await;
        }

        let ledger = SqliteLedger::open(&path).await.unwrap();
        assert!(!ledger.check_and_mark(ENDPOINT, "9").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_partition_is_an_error() {
        let (_dir, ledger) = open_temp().await;

        let err = ledger
            .check_and_mark("https://unknown.example.org/", "1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingPartition(_)));
    }
}
