pub mod config;
pub mod digest;
pub mod error;
pub mod gerrit;
pub mod ledger;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod patterns;
pub mod scanner;

pub use config::Config;
pub use digest::compose_digest;
pub use error::{ConfigError, MailError, ReviewError, StoreError};
pub use gerrit::{GerritClient, ReviewClient};
pub use ledger::{JsonLedger, SeenLedger, SqliteLedger};
pub use models::*;
pub use notifications::{Mailer, SmtpMailer};
pub use orchestrator::{Orchestrator, RunReport, SourceOutcome};
pub use patterns::{matches, PatternSet};
pub use scanner::Scanner;
