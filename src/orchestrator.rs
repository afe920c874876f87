use tracing::{error, info, warn};

use crate::digest::compose_digest;
use crate::gerrit::ReviewClient;
use crate::ledger::SeenLedger;
use crate::models::WatchedSource;
use crate::notifications::Mailer;
use crate::patterns::PatternSet;
use crate::scanner::Scanner;

/// What happened to one source during a run
#[derive(Debug, Clone, Default)]
pub struct SourceOutcome {
    pub name: String,
    pub endpoint: String,
    pub open_matches: usize,
    pub new_matches: usize,
    pub notified: bool,
    pub failed_projects: Vec<String>,
    pub invalid_patterns: Vec<String>,
    /// Entries dropped by reconciliation, `None` if it did not run
    pub reconciled: Option<usize>,
    pub errors: Vec<String>,
}

impl SourceOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed_projects.is_empty() && self.invalid_patterns.is_empty() && self.errors.is_empty()
    }
}

/// Per-source outcomes of one run, in config order
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sources: Vec<SourceOutcome>,
}

impl RunReport {
    pub fn digests_sent(&self) -> usize {
        self.sources.iter().filter(|s| s.notified).count()
    }
}

/// Drives one scan, notify and reconcile cycle across all sources
pub struct Orchestrator<L: SeenLedger, C: ReviewClient, M: Mailer> {
    ledger: L,
    client: C,
    mailer: M,
}

impl<L: SeenLedger, C: ReviewClient, M: Mailer> Orchestrator<L, C, M> {
    pub fn new(ledger: L, client: C, mailer: M) -> Self {
        Self {
            ledger,
            client,
            mailer,
        }
    }

    /// Process every source in order. Per-source failures are reported in the
    /// returned outcomes and never stop the run.
    pub async fn run(&self, sources: &[WatchedSource]) -> RunReport {
        info!(sources = sources.len(), "Starting run");

        let mut report = RunReport::default();
        for source in sources {
            report.sources.push(self.process(source).await);
        }

        info!(
            sources = report.sources.len(),
            digests = report.digests_sent(),
            "Run complete"
        );

        report
    }

    async fn process(&self, source: &WatchedSource) -> SourceOutcome {
        let mut outcome = SourceOutcome {
            name: source.name.clone(),
            endpoint: source.endpoint.clone(),
            ..Default::default()
        };

        if let Err(e) = self.ledger.ensure_partition(&source.endpoint).await {
            error!(endpoint = %source.endpoint, error = %e, "Unable to create ledger partition, skipping source");
            outcome.errors.push(format!("ledger partition: {}", e));
            return outcome;
        }

        let (patterns, invalid) = PatternSet::compile(&source.patterns);
        outcome.invalid_patterns = invalid.into_iter().map(|p| p.pattern).collect();

        let scan = Scanner::new(&self.client, &self.ledger)
            .scan(source, &patterns)
            .await;
        outcome.open_matches = scan.open_matches.len();
        outcome.new_matches = scan.new_matches.len();
        outcome.failed_projects = scan.failed_projects.clone();

        // Changes marked above stay marked even if this send fails.
        if let Some(digest) = compose_digest(source, &scan.new_matches) {
            match self.mailer.send(&digest).await {
                Ok(()) => outcome.notified = true,
                Err(e) => {
                    error!(
                        endpoint = %source.endpoint,
                        recipient = %digest.recipient,
                        error = %e,
                        body = %digest.body,
                        "Unable to send report"
                    );
                    outcome.errors.push(format!("mail: {}", e));
                }
            }
        }

        if !scan.failed_projects.is_empty() {
            warn!(
                endpoint = %source.endpoint,
                failed = ?scan.failed_projects,
                "Open set is incomplete, skipping reconciliation"
            );
            return outcome;
        }

        match self.ledger.reconcile(&source.endpoint, &scan.open_keys()).await {
            Ok(removed) => outcome.reconciled = Some(removed),
            Err(e) => {
                error!(endpoint = %source.endpoint, error = %e, "Unable to reconcile ledger");
                outcome.errors.push(format!("reconcile: {}", e));
            }
        }

        outcome
    }

    /// Get the ledger for direct access
    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}
