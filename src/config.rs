//! YAML configuration for the `issnl` binary.
//!
//! Every field carries a serde default, so an empty file (or no file at all)
//! yields a working production configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use issnl_core::diff::DEFAULT_IGNORED_IDENTIFIERS;
use issnl_core::enrichment::DEFAULT_BATCH_SIZE;
use issnl_core::{IgnoreList, DEFAULT_MINIMUM_RECORDS};

/// Default configuration path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/issnl.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IssnlConfig {
    pub registry: RegistryConfig,
    pub crossref: CrossrefConfig,
    pub issn_org: IssnOrgConfig,
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub enrichment: EnrichmentConfig,
    /// Identifiers never promoted to the canonical table.
    pub ignore_list: Vec<String>,
}

impl Default for IssnlConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            crossref: CrossrefConfig::default(),
            issn_org: IssnOrgConfig::default(),
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            enrichment: EnrichmentConfig::default(),
            ignore_list: DEFAULT_IGNORED_IDENTIFIERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl IssnlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        // serde_yaml rejects an empty document for a struct.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: IssnlConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// The configured ignore list, validated.
    pub fn ignore_list(&self) -> Result<IgnoreList> {
        IgnoreList::parse(&self.ignore_list).context("Invalid ignore_list entry")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Zip archive holding the identifier → linking identifier table.
    pub archive_url: String,
    /// Case-insensitive suffix of the archive member to read.
    pub table_suffix: String,
    /// Loads below this row count abort the run.
    pub minimum_records: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            archive_url: "https://www.issn.org/wp-content/uploads/2014/03/issnltables.zip".into(),
            table_suffix: "issn-to-issn-l.txt".into(),
            minimum_records: DEFAULT_MINIMUM_RECORDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrossrefConfig {
    /// Gzipped CSV with an `issn` column.
    pub identifiers_url: String,
    /// Per-identifier journal lookup, `{journals_api}/{issn}`.
    pub journals_api: String,
}

impl Default for CrossrefConfig {
    fn default() -> Self {
        Self {
            identifiers_url: "https://api.unpaywall.org/crossref_issns.csv.gz".into(),
            journals_api: "https://api.crossref.org/journals".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IssnOrgConfig {
    /// Registry portal, `{portal_api}/{issn}?format=json`.
    pub portal_api: String,
}

impl Default for IssnOrgConfig {
    fn default() -> Self {
        Self {
            portal_api: "https://portal.issn.org/resource/ISSN".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: concat!("issnl/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Environment variable holding the connection string.
    pub url_env: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: "DATABASE_URL".into(),
            max_connections: 5,
            acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Read the connection string from the configured environment variable.
    pub fn url(&self) -> Result<String> {
        std::env::var(&self.url_env)
            .with_context(|| format!("{} must be set to reach the database", self.url_env))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub batch_size: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
