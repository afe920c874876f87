use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scrutiny::config::{CONFIG_ENV, DEFAULT_CONFIG};
use scrutiny::{ledger, Config, GerritClient, Orchestrator, RunReport, SeenLedger, SmtpMailer, StoreError};

#[derive(Parser)]
#[command(name = "scrutiny")]
#[command(about = "Mail a digest of open Gerrit changes whose commit messages match configured patterns")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the YAML config file
    #[arg(long, global = true, env = CONFIG_ENV, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every source once and mail digests of new matches (default)
    Run,

    /// List changes already reported for a source
    Seen {
        /// Source endpoint as written in the config
        #[arg(long)]
        endpoint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scrutiny=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Seen { endpoint } => list_seen(config, &endpoint).await,
    }
}

async fn run(config: Config) -> Result<()> {
    let sources = config
        .watched_sources()
        .context("Cannot load sources from config")?;

    let ledger = ledger::open(&config.store)
        .await
        .with_context(|| format!("Failed to open ledger: {}", config.store.path.display()))?;
    let client = GerritClient::new(&config.review).context("Failed to create review client")?;
    let mailer = SmtpMailer::new(&config.mail).context("Failed to configure mail transport")?;

    let orchestrator = Orchestrator::new(ledger, client, mailer);
    let report = orchestrator.run(&sources).await;

    print_report(&report);

    Ok(())
}

fn print_report(report: &RunReport) {
    for outcome in &report.sources {
        let status = if outcome.is_clean() { "ok" } else { "with errors" };
        println!(
            "{} ({}): {} open matches, {} new, digest {} [{}]",
            outcome.name,
            outcome.endpoint,
            outcome.open_matches,
            outcome.new_matches,
            if outcome.notified { "sent" } else { "not sent" },
            status
        );
        for project in &outcome.failed_projects {
            println!("    query failed: {}", project);
        }
        for pattern in &outcome.invalid_patterns {
            println!("    invalid pattern: {}", pattern);
        }
        for error in &outcome.errors {
            println!("    {}", error);
        }
    }
}

async fn list_seen(config: Config, endpoint: &str) -> Result<()> {
    let ledger = ledger::open_existing(&config.store)
        .await
        .with_context(|| format!("Failed to open ledger: {}", config.store.path.display()))?;

    let entries = match ledger.entries(endpoint).await {
        Ok(entries) => entries,
        Err(StoreError::MissingPartition(_)) => {
            println!("No partition for {}.", endpoint);
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to read ledger"),
    };

    info!(endpoint, count = entries.len(), "Read ledger entries");

    if entries.is_empty() {
        println!("No reported changes for {}.", endpoint);
        return Ok(());
    }

    println!("Reported changes for {}:\n", endpoint);
    for entry in entries {
        println!(
            "  {}  first reported {}",
            entry.change_id,
            entry.first_reported_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}
