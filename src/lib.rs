//! Operator-facing layer of the ISSN identity graph: configuration, the HTTP
//! source clients and the wiring used by the `issnl` binary.
//!
//! Domain logic lives in [`issnl_core`]; persistence in [`issnl_postgres`].

pub mod config;
pub mod sources;

pub use config::IssnlConfig;
pub use sources::{build_http_client, CrossrefClient, HttpDescriptions, IssnOrgClient};

use std::sync::Arc;

use anyhow::Result;

/// HTTP clients built from one configuration, sharing a connection pool.
pub struct Sources {
    pub registry: Arc<IssnOrgClient>,
    pub crossref: Arc<CrossrefClient>,
    pub descriptions: Arc<HttpDescriptions>,
}

impl Sources {
    pub fn from_config(config: &IssnlConfig) -> Result<Self> {
        let http = build_http_client(&config.http)?;
        let issn_org = || IssnOrgClient::new(http.clone(), &config.registry, &config.issn_org);
        let crossref = || CrossrefClient::new(http.clone(), &config.crossref);
        Ok(Self {
            registry: Arc::new(issn_org()),
            crossref: Arc::new(crossref()),
            descriptions: Arc::new(HttpDescriptions::new(issn_org(), crossref())),
        })
    }
}
