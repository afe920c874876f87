use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, info};

use super::ReviewClient;
use crate::config::ReviewConfig;
use crate::error::ReviewError;
use crate::models::ChangeRecord;

/// Gerrit prefixes JSON bodies with this line to defeat XSSI
const XSSI_PREFIX: &str = ")]}'";

/// Gerrit REST API client
pub struct GerritClient {
    client: Client,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct ChangeInfo {
    #[serde(rename = "_number")]
    number: u64,
    project: String,
    subject: String,
    current_revision: Option<String>,
    #[serde(default)]
    revisions: HashMap<String, RevisionInfo>,
    #[serde(rename = "_more_changes", default)]
    more_changes: bool,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    commit: Option<CommitInfo>,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    message: String,
}

impl ChangeInfo {
    fn into_record(self, endpoint: &str) -> ChangeRecord {
        let message = self
            .current_revision
            .as_ref()
            .and_then(|rev| self.revisions.get(rev))
            .and_then(|rev| rev.commit.as_ref())
            .map(|commit| commit.message.clone());

        ChangeRecord {
            id: self.number,
            commit_message: message.unwrap_or_else(|| self.subject.clone()),
            project: self.project,
            subject: self.subject,
            source_endpoint: endpoint.to_string(),
        }
    }
}

impl GerritClient {
    pub fn new(config: &ReviewConfig) -> Result<Self, ReviewError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            page_size: config.page_size.max(1),
        })
    }

    fn changes_url(endpoint: &str) -> Result<Url, ReviewError> {
        let invalid = |reason: String| ReviewError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut base = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        base.join("changes/").map_err(|e| invalid(e.to_string()))
    }

    async fn fetch_page(
        &self,
        url: &Url,
        project: &str,
        offset: usize,
    ) -> Result<Vec<ChangeInfo>, ReviewError> {
        let mut url = url.clone();
        url.query_pairs_mut()
            .append_pair("q", &format!("project:{} status:open", project))
            .append_pair("o", "CURRENT_REVISION")
            .append_pair("o", "CURRENT_COMMIT")
            .append_pair("n", &self.page_size.to_string())
            .append_pair("S", &offset.to_string());

        debug!(url = %url, "Querying changes");

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ReviewError::Status { status, body });
        }

        Ok(serde_json::from_str(strip_xssi(&body))?)
    }
}

fn strip_xssi(body: &str) -> &str {
    body.trim_start()
        .strip_prefix(XSSI_PREFIX)
        .unwrap_or(body)
}

#[async_trait]
impl ReviewClient for GerritClient {
    async fn query_open_changes(
        &self,
        endpoint: &str,
        project: &str,
    ) -> Result<Vec<ChangeRecord>, ReviewError> {
        let url = Self::changes_url(endpoint)?;
        let mut changes = Vec::new();

        loop {
            let page = self.fetch_page(&url, project, changes.len()).await?;
            let more = page.last().is_some_and(|c| c.more_changes);
            let fetched = page.len();

            changes.extend(page.into_iter().map(|c| c.into_record(endpoint)));

            if !more || fetched == 0 {
                break;
            }
        }

        info!(endpoint, project, count = changes.len(), "Fetched open changes");

        Ok(changes)
    }
}
