use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::gerrit::ReviewClient;
use crate::ledger::SeenLedger;
use crate::models::{ChangeRecord, ScanResult, WatchedSource};
use crate::patterns::PatternSet;

/// Scans one source's projects for matching open changes
pub struct Scanner<'a> {
    client: &'a dyn ReviewClient,
    ledger: &'a dyn SeenLedger,
}

impl<'a> Scanner<'a> {
    pub fn new(client: &'a dyn ReviewClient, ledger: &'a dyn SeenLedger) -> Self {
        Self { client, ledger }
    }

    /// Query every project of `source`, match commit text and mark new matches.
    ///
    /// A failed project query is logged and the project skipped. Each change
    /// appears at most once in either list.
    pub async fn scan(&self, source: &WatchedSource, patterns: &PatternSet) -> ScanResult {
        let mut result = ScanResult::default();
        let mut matched_ids = HashSet::new();

        for project in &source.projects {
            let changes = match self.client.query_open_changes(&source.endpoint, project).await {
                Ok(changes) => changes,
                Err(e) => {
                    warn!(
                        endpoint = %source.endpoint,
                        project = %project,
                        error = %e,
                        "Unable to query changes, skipping project"
                    );
                    result.failed_projects.push(project.clone());
                    continue;
                }
            };

            for change in changes {
                if !is_interesting(&change, patterns) || !matched_ids.insert(change.id) {
                    continue;
                }

                if self.is_new(source, &change).await {
                    result.new_matches.push(change.clone());
                }
                result.open_matches.push(change);
            }
        }

        info!(
            source = %source.name,
            open = result.open_matches.len(),
            new = result.new_matches.len(),
            failed_projects = result.failed_projects.len(),
            "Scanned source"
        );

        result
    }

    async fn is_new(&self, source: &WatchedSource, change: &ChangeRecord) -> bool {
        match self.ledger.check_and_mark(&source.endpoint, &change.key()).await {
            Ok(true) => {
                info!(endpoint = %source.endpoint, change = change.id, "New change");
                true
            }
            Ok(false) => {
                debug!(endpoint = %source.endpoint, change = change.id, "Already reported change");
                false
            }
            Err(e) => {
                // Not recorded, so the next run sees it as new again.
                warn!(
                    endpoint = %source.endpoint,
                    change = change.id,
                    error = %e,
                    "Failed to record change, deferring it to the next run"
                );
                false
            }
        }
    }
}

/// Commit message is the primary field; subject is checked as a fallback
fn is_interesting(change: &ChangeRecord, patterns: &PatternSet) -> bool {
    patterns.is_match(&change.commit_message) || patterns.is_match(&change.subject)
}
