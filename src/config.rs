use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::models::WatchedSource;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SCRUTINY_CONF";

/// Config file used when neither flag nor environment names one
pub const DEFAULT_CONFIG: &str = "scrutiny.yml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub mail: MailConfig,
    pub review: ReviewConfig,
    pub sources: Vec<SourceConfig>,
}

/// Which ledger implementation backs the store file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Json,
}

/// Seen-change ledger location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scrutiny.db"),
            backend: StoreBackend::Sqlite,
        }
    }
}

/// Outbound SMTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender: Option<String>,
    pub subject: String,
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            sender: None,
            subject: "[gerrit] Changes required attention".to_string(),
            starttls: false,
            username: None,
            password: None,
        }
    }
}

/// Review client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub timeout_secs: u64,
    pub page_size: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            page_size: 100,
        }
    }
}

/// One watched source as written in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: Option<String>,
    pub endpoint: Option<String>,
    #[serde(deserialize_with = "list_or_csv")]
    pub projects: Vec<String>,
    #[serde(deserialize_with = "list_or_csv")]
    pub patterns: Vec<String>,
    pub recipient: Option<String>,
}

/// Accepts either a YAML sequence or a single comma-separated string
fn list_or_csv<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrCsv {
        List(Vec<String>),
        Csv(String),
    }

    let items = match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(items) => items,
        ListOrCsv::Csv(s) => s.split(',').map(str::to_string).collect(),
    };

    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn required(value: &Option<String>, index: usize, field: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::MissingField { index, field })
}

impl SourceConfig {
    /// Validate into a `WatchedSource`; `index` is the position in the config file
    pub fn validate(&self, index: usize) -> Result<WatchedSource, ConfigError> {
        let endpoint = required(&self.endpoint, index, "endpoint")?;
        let recipient = required(&self.recipient, index, "recipient")?;

        let mut projects: Vec<String> = Vec::with_capacity(self.projects.len());
        for project in &self.projects {
            if !projects.contains(project) {
                projects.push(project.clone());
            }
        }

        Ok(WatchedSource {
            name: self.name.clone().unwrap_or_else(|| endpoint.clone()),
            endpoint,
            projects,
            patterns: self.patterns.clone(),
            recipient,
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!(path = %path.display(), sources = config.sources.len(), "Loaded configuration");

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validated sources in config order.
    ///
    /// Invalid or duplicate entries are logged and skipped. Fails only when
    /// nothing is left to watch.
    pub fn watched_sources(&self) -> Result<Vec<WatchedSource>, ConfigError> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();

        for (index, raw) in self.sources.iter().enumerate() {
            let source = match raw.validate(index) {
                Ok(source) => source,
                Err(e) => {
                    error!(error = %e, "Skipping invalid source");
                    continue;
                }
            };

            if !seen.insert(source.endpoint.clone()) {
                let e = ConfigError::DuplicateEndpoint {
                    index,
                    endpoint: source.endpoint,
                };
                error!(error = %e, "Skipping duplicate source");
                continue;
            }

            if source.projects.is_empty() {
                warn!(source = %source.name, "Source has no projects");
            }
            if source.patterns.is_empty() {
                warn!(source = %source.name, "Source has no patterns, nothing will match");
            }

            sources.push(source);
        }

        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        Ok(sources)
    }
}
