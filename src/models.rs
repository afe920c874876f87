use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A review server to monitor, validated from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedSource {
    /// Label used in logs; defaults to the endpoint
    pub name: String,
    /// Review server URL, also the ledger partition key
    pub endpoint: String,
    pub projects: Vec<String>,
    /// Regular expressions with OR semantics
    pub patterns: Vec<String>,
    pub recipient: String,
}

impl WatchedSource {
    /// Link to a change on this source's review server
    pub fn change_url(&self, id: u64) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), id)
    }
}

/// An open change returned by a review server for one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: u64,
    pub project: String,
    pub subject: String,
    pub commit_message: String,
    pub source_endpoint: String,
}

impl ChangeRecord {
    /// Canonical textual form of the id, used as the ledger key
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

/// A persisted "already reported" marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub change_id: String,
    pub first_reported_at: DateTime<Utc>,
}

/// Result of scanning one source
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Every open change that matched, reported or not
    pub open_matches: Vec<ChangeRecord>,
    /// Matching changes not reported by a previous run
    pub new_matches: Vec<ChangeRecord>,
    /// Projects whose query failed
    pub failed_projects: Vec<String>,
}

impl ScanResult {
    /// Ledger keys of every open matching change
    pub fn open_keys(&self) -> std::collections::HashSet<String> {
        self.open_matches.iter().map(ChangeRecord::key).collect()
    }
}

/// A composed notification for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub recipient: String,
    pub body: String,
}
