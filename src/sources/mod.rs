//! HTTP-backed implementations of the core source ports.
//!
//! - [`IssnOrgClient`]: registry archive ([`RegistrySource`]) and portal records
//! - [`CrossrefClient`]: identifier list and journal lookups ([`CrossrefSource`])
//! - [`HttpDescriptions`]: both description endpoints ([`DescriptionSource`])

mod crossref;
mod issn_org;

pub use crossref::{parse_identifier_list, CrossrefClient};
pub use issn_org::{parse_registry_archive, IssnOrgClient, RegistryTable};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use issnl_core::{DescriptionSource, IdentityError, Issn, Result};

use crate::config::HttpConfig;

/// Shared client: one connection pool, the configured timeout and user agent.
pub fn build_http_client(config: &HttpConfig) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .context("Failed to create HTTP client")
}

/// Download a whole body. Any transport failure or non-success status is a
/// `Download` error.
pub(crate) async fn download(http: &Client, url: &str) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| IdentityError::Download(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(IdentityError::Download(format!("{url}: HTTP {status}")));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| IdentityError::Download(format!("{url}: {e}")))?;
    debug!(url, bytes = bytes.len(), "downloaded");
    Ok(bytes.to_vec())
}

/// GET a JSON document. `Ok(None)` for non-200 or an undecodable body.
pub(crate) async fn fetch_json(http: &Client, url: &str) -> Result<Option<Value>> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| IdentityError::Download(format!("{url}: {e}")))?;

    if response.status() != StatusCode::OK {
        debug!(url, status = %response.status(), "no document");
        return Ok(None);
    }
    match response.json::<Value>().await {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            debug!(url, error = %e, "undecodable document");
            Ok(None)
        }
    }
}

/// CPU-bound decoding off the async workers.
pub(crate) async fn decode_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IdentityError::Internal(anyhow!(e)))?
}

/// Both description endpoints behind one [`DescriptionSource`].
pub struct HttpDescriptions {
    issn_org: IssnOrgClient,
    crossref: CrossrefClient,
}

impl HttpDescriptions {
    pub fn new(issn_org: IssnOrgClient, crossref: CrossrefClient) -> Self {
        Self { issn_org, crossref }
    }
}

#[async_trait]
impl DescriptionSource for HttpDescriptions {
    async fn registry_description(&self, identifier: Issn) -> Result<Option<Value>> {
        self.issn_org.portal_record(identifier).await
    }

    async fn crossref_description(&self, identifier: Issn) -> Result<Option<Value>> {
        self.crossref.journal_record(identifier).await
    }
}
