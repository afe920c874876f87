pub mod json;
pub mod sqlite;

pub use json::JsonLedger;
pub use sqlite::SqliteLedger;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::models::SeenEntry;

/// Durable record of changes already reported, partitioned by source endpoint.
///
/// An entry means "currently open and already reported", not "ever reported":
/// `reconcile` drops everything the review server no longer lists as open.
#[async_trait]
pub trait SeenLedger: Send + Sync {
    /// Create the partition for `endpoint` if absent; no-op otherwise
    async fn ensure_partition(&self, endpoint: &str) -> Result<(), StoreError>;

    /// Record `change_id` for `endpoint`, returning true if it was not recorded before.
    ///
    /// An error means nothing was recorded.
    async fn check_and_mark(&self, endpoint: &str, change_id: &str) -> Result<bool, StoreError>;

    /// Remove every entry for `endpoint` whose key is not in `open`; returns the number removed
    async fn reconcile(&self, endpoint: &str, open: &HashSet<String>) -> Result<usize, StoreError>;

    /// Entries recorded for `endpoint`, ordered by change number.
    ///
    /// Ids that are not numbers sort as 0, then by text.
    async fn entries(&self, endpoint: &str) -> Result<Vec<SeenEntry>, StoreError>;
}

/// Sort key matching `ORDER BY CAST(change_id AS INTEGER), change_id`
pub(crate) fn change_order(change_id: &str) -> (u64, &str) {
    (change_id.parse().unwrap_or(0), change_id)
}

/// Open the ledger described by `config`
pub async fn open(config: &StoreConfig) -> Result<Box<dyn SeenLedger>, StoreError> {
    Ok(match config.backend {
        StoreBackend::Sqlite => Box::new(SqliteLedger::open(&config.path).await?),
        StoreBackend::Json => Box::new(JsonLedger::open(&config.path)?),
    })
}

/// Open the ledger described by `config` without creating a new store file
pub async fn open_existing(config: &StoreConfig) -> Result<Box<dyn SeenLedger>, StoreError> {
    if !config.path.exists() {
        return Err(StoreError::MissingStore(config.path.clone()));
    }
    open(config).await
}

#[async_trait]
impl<T: SeenLedger + ?Sized> SeenLedger for Box<T> {
    async fn ensure_partition(&self, endpoint: &str) -> Result<(), StoreError> {
        (**self).ensure_partition(endpoint).await
    }

    async fn check_and_mark(&self, endpoint: &str, change_id: &str) -> Result<bool, StoreError> {
        (**self).check_and_mark(endpoint, change_id).await
    }

    async fn reconcile(&self, endpoint: &str, open: &HashSet<String>) -> Result<usize, StoreError> {
        (**self).reconcile(endpoint, open).await
    }

    async fn entries(&self, endpoint: &str) -> Result<Vec<SeenEntry>, StoreError> {
        (**self).entries(endpoint).await
    }
}
