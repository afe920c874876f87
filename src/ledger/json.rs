use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{change_order, SeenLedger};
use crate::error::StoreError;
use crate::models::SeenEntry;

/// Single JSON document holding every partition.
///
/// Each mutation rewrites the whole document through a temporary file and a
/// rename, so the file on disk is always either the old or the new state.
pub struct JsonLedger {
    path: PathBuf,
    state: Mutex<LedgerFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerFile {
    partitions: BTreeMap<String, BTreeMap<String, DateTime<Utc>>>,
}

impl JsonLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            LedgerFile::default()
        };

        info!(path = %path.display(), "Opened JSON ledger");

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerFile> {
        // A panic mid-mutation never reaches disk, so the inner state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &LedgerFile) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = temp_path(&self.path);
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `mutate` to a copy of the state and swap it in only once it is on disk
    fn update<T>(
        &self,
        mutate: impl FnOnce(&mut LedgerFile) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = mutate(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }
}

/// Sibling of `path` with `.tmp` appended to the file name
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl SeenLedger for JsonLedger {
    async fn ensure_partition(&self, endpoint: &str) -> Result<(), StoreError> {
        if self.lock().partitions.contains_key(endpoint) {
            return Ok(());
        }
        self.update(|state| {
            state.partitions.entry(endpoint.to_string()).or_default();
            Ok(())
        })?;
        debug!(endpoint, "Created ledger partition");
        Ok(())
    }

    async fn check_and_mark(&self, endpoint: &str, change_id: &str) -> Result<bool, StoreError> {
        {
            let state = self.lock();
            let partition = state
                .partitions
                .get(endpoint)
                .ok_or_else(|| StoreError::MissingPartition(endpoint.to_string()))?;
            if partition.contains_key(change_id) {
                return Ok(false);
            }
        }

        self.update(|state| {
            let partition = state
                .partitions
                .get_mut(endpoint)
                .ok_or_else(|| StoreError::MissingPartition(endpoint.to_string()))?;
            if partition.contains_key(change_id) {
                return Ok(false);
            }
            partition.insert(change_id.to_string(), Utc::now());
            Ok(true)
        })
    }

    async fn reconcile(&self, endpoint: &str, open: &HashSet<String>) -> Result<usize, StoreError> {
        let removed = self.update(|state| {
            let partition = state
                .partitions
                .get_mut(endpoint)
                .ok_or_else(|| StoreError::MissingPartition(endpoint.to_string()))?;
            let before = partition.len();
            partition.retain(|key, _| open.contains(key));
            Ok(before - partition.len())
        })?;

        debug!(endpoint, removed, "Reconciled ledger partition");
        Ok(removed)
    }

    async fn entries(&self, endpoint: &str) -> Result<Vec<SeenEntry>, StoreError> {
        let state = self.lock();
        let partition = state
            .partitions
            .get(endpoint)
            .ok_or_else(|| StoreError::MissingPartition(endpoint.to_string()))?;

        let mut entries: Vec<SeenEntry> = partition
            .iter()
            .map(|(change_id, at)| SeenEntry {
                change_id: change_id.clone(),
                first_reported_at: *at,
            })
            .collect();
        entries.sort_by(|a, b| change_order(&a.change_id).cmp(&change_order(&b.change_id)));

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ENDPOINT: &str = "https://review.example.org/";

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_check_and_mark_is_idempotent() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::open(dir.path().join("seen.json")).unwrap();
        ledger.ensure_partition(ENDPOINT).await.unwrap();

        assert!(ledger.check_and_mark(ENDPOINT, "42").await.unwrap());
        assert!(!ledger.check_and_mark(ENDPOINT, "42").await.unwrap());

        let entries = ledger.entries(ENDPOINT).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change_id, "42");
    }

    #[tokio::test]
    async fn test_ensure_partition_twice_keeps_entries() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::open(dir.path().join("seen.json")).unwrap();

        ledger.ensure_partition(ENDPOINT).await.unwrap();
        ledger.check_and_mark(ENDPOINT, "1").await.unwrap();
        ledger.ensure_partition(ENDPOINT).await.unwrap();

        assert_eq!(ledger.entries(ENDPOINT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_removes_closed_changes() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::open(dir.path().join("seen.json")).unwrap();
        ledger.ensure_partition(ENDPOINT).await.unwrap();
        for id in ["A", "B", "C"] {
            ledger.check_and_mark(ENDPOINT, id).await.unwrap();
        }

        let removed = ledger.reconcile(ENDPOINT, &keys(&["A", "C"])).await.unwrap();
        assert_eq!(removed, 1);

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
    async fn test_partitions_are_independent() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::open(dir.path().join("seen.json")).unwrap();
        let other = "https://other.example.org/";
        ledger.ensure_partition(ENDPOINT).await.unwrap();
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
        let path = dir.path().join("seen.json");
        {
            let ledger = JsonLedger::open(&path).unwrap();
            ledger.ensure_partition(ENDPOINT).await.unwrap();
            ledger.check_and_mark(ENDPOINT, "9").await.unwrap();
        }

        let ledger = JsonLedger::open(&path).unwrap();
        assert!(!ledger.check_and_mark(ENDPOINT, "9").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_partition_is_an_error() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::open(dir.path().join("seen.json")).unwrap();

        let err = ledger.check_and_mark(ENDPOINT, "1").await.unwrap_err();
        assert!(matches!(err, StoreError::MissingPartition(_)));
    }

    #[test]
    fn test_temp_path_differs_from_store_path() {
        assert_eq!(
            temp_path(Path::new("/var/lib/seen.json")),
            PathBuf::from("/var/lib/seen.json.tmp")
        );
        assert_eq!(
            temp_path(Path::new("/var/lib/seen.tmp")),
            PathBuf::from("/var/lib/seen.tmp.tmp")
        );
    }

    #[tokio::test]
    async fn test_store_path_ending_in_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.tmp");
        {
            let ledger = JsonLedger::open(&path).unwrap();
            ledger.ensure_partition(ENDPOINT).await.unwrap();
            ledger.check_and_mark(ENDPOINT, "11").await.unwrap();
        }

        assert!(path.is_file());
        assert!(!temp_path(&path).exists());
        let ledger = JsonLedger::open(&path).unwrap();
        assert!(!ledger.check_and_mark(ENDPOINT, "11").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_ordered_by_change_number() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::open(dir.path().join("seen.json")).unwrap();
        ledger.ensure_partition(ENDPOINT).await.unwrap();
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
    async fn test_failed_write_does_not_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");
        let ledger = JsonLedger::open(&path).unwrap();
        ledger.ensure_partition(ENDPOINT).await.unwrap();

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(temp_path(&path)).unwrap();

        assert!(ledger.check_and_mark(ENDPOINT, "5").await.is_err());
        assert!(ledger.entries(ENDPOINT).await.unwrap().is_empty());
    }
}
