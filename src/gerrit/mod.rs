pub mod client;

pub use client::GerritClient;

use async_trait::async_trait;

use crate::error::ReviewError;
use crate::models::ChangeRecord;

/// Source of open changes for a review server
#[async_trait]
pub trait ReviewClient: Send + Sync {
    /// All open changes in `project` on the server at `endpoint`
    async fn query_open_changes(
        &self,
        endpoint: &str,
        project: &str,
    ) -> Result<Vec<ChangeRecord>, ReviewError>;
}
