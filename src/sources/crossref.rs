//! Citation-index (Crossref) dataset and journal API client.

use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use issnl_core::payload::CrossrefJournal;
use issnl_core::{CrossrefSource, IdentityError, Issn, JournalAliases, Result};

use super::{decode_blocking, download, fetch_json};
use crate::config::CrossrefConfig;

/// Decode the gzipped identifier CSV and return its `issn` column verbatim.
/// Empty cells are dropped; validation happens in the reconciler.
pub fn parse_identifier_list(gzipped: &[u8]) -> Result<Vec<String>> {
    parse_identifier_csv(GzDecoder::new(gzipped))
}

fn parse_identifier_csv<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| IdentityError::Download(format!("crossref identifier list: {e}")))?;
    let column = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("issn"))
        .ok_or_else(|| {
            IdentityError::Download("crossref identifier list has no issn column".into())
        })?;

    let mut identifiers = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| IdentityError::Download(format!("crossref identifier list: {e}")))?;
        match record.get(column).map(str::trim) {
            Some(raw) if !raw.is_empty() => identifiers.push(raw.to_string()),
            _ => {}
        }
    }
    Ok(identifiers)
}

pub struct CrossrefClient {
    http: Client,
    identifiers_url: String,
    journals_api: String,
}

impl CrossrefClient {
    pub fn new(http: Client, config: &CrossrefConfig) -> Self {
        Self {
            http,
            identifiers_url: config.identifiers_url.clone(),
            journals_api: config.journals_api.trim_end_matches('/').to_string(),
        }
    }

    pub fn journal_url(&self, identifier: Issn) -> String {
        format!("{}/{}", self.journals_api, identifier)
    }

    /// Raw journal record, as stored by enrichment.
    pub async fn journal_record(&self, identifier: Issn) -> Result<Option<Value>> {
        fetch_json(&self.http, &self.journal_url(identifier)).await
    }
}

#[async_trait]
impl CrossrefSource for CrossrefClient {
    async fn fetch_known_identifiers(&self) -> Result<Vec<String>> {
        info!(url = %self.identifiers_url, "downloading crossref identifier list");
        let bytes = download(&self.http, &self.identifiers_url).await?;
        let identifiers = decode_blocking(move || parse_identifier_list(&bytes)).await?;
        info!(identifiers = identifiers.len(), "crossref identifier list decoded");
        Ok(identifiers)
    }

    async fn lookup_aliases(&self, identifier: Issn) -> Result<Option<JournalAliases>> {
        let Some(record) = self.journal_record(identifier).await? else {
            return Ok(None);
        };
        Ok(CrossrefJournal::from_value(&record).map(|journal| journal.aliases()))
    }
}
