//! Registry (issn.org) archive and portal client.

use std::io::{Cursor, Read};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use issnl_core::{IdentityError, Issn, MappingPair, RegistrySource, Result};

use super::{decode_blocking, download, fetch_json};
use crate::config::{IssnOrgConfig, RegistryConfig};

/// Decoded identifier → linking identifier table.
#[derive(Debug, Default)]
pub struct RegistryTable {
    pub pairs: Vec<MappingPair>,
    /// Rows that were not UTF-8 or whose identifiers did not parse.
    pub skipped: usize,
}

/// Open the zip archive, pick the member whose name ends with `suffix`
/// (case-insensitive) and decode its tab-separated table. The header row
/// is skipped.
pub fn parse_registry_archive(bytes: &[u8], suffix: &str) -> Result<RegistryTable> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| IdentityError::Download(format!("registry archive unreadable: {e}")))?;

    let suffix = suffix.to_lowercase();
    let member = archive
        .file_names()
        .find(|name| name.to_lowercase().ends_with(&suffix))
        .map(str::to_string)
        .ok_or_else(|| {
            IdentityError::Download(format!("registry archive has no *{suffix} member"))
        })?;

    let file = archive
        .by_name(&member)
        .map_err(|e| IdentityError::Download(format!("registry archive member {member}: {e}")))?;
    info!(member = %member, "reading registry table");
    parse_registry_table(file)
}

fn parse_registry_table<R: Read>(reader: R) -> Result<RegistryTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .quoting(false)
        .flexible(true)
        .from_reader(reader);

    let mut table = RegistryTable::default();
    for record in reader.byte_records() {
        let record =
            record.map_err(|e| IdentityError::Download(format!("registry table: {e}")))?;
        let fields = (
            record.get(0).map(std::str::from_utf8),
            record.get(1).map(std::str::from_utf8),
        );
        let (Some(Ok(raw_issn)), Some(Ok(raw_issn_l))) = fields else {
            if table.skipped < 10 {
                warn!(line = record.position().map(|p| p.line()), "skipping unreadable registry row");
            }
            table.skipped += 1;
            continue;
        };
        match (Issn::parse(raw_issn), Issn::parse(raw_issn_l)) {
            (Ok(identifier), Ok(linking)) => {
                table.pairs.push(MappingPair::new(identifier, linking));
            }
            _ => {
                if table.skipped < 10 {
                    warn!(issn = raw_issn, issn_l = raw_issn_l, "skipping malformed registry row");
                }
                table.skipped += 1;
            }
        }
    }
    Ok(table)
}

pub struct IssnOrgClient {
    http: Client,
    archive_url: String,
    table_suffix: String,
    portal_api: String,
}

impl IssnOrgClient {
    pub fn new(http: Client, registry: &RegistryConfig, issn_org: &IssnOrgConfig) -> Self {
        Self {
            http,
            archive_url: registry.archive_url.clone(),
            table_suffix: registry.table_suffix.clone(),
            portal_api: issn_org.portal_api.trim_end_matches('/').to_string(),
        }
    }

    pub fn portal_url(&self, identifier: Issn) -> String {
        format!("{}/{}?format=json", self.portal_api, identifier)
    }

    /// Portal JSON-LD record for an identifier.
    pub async fn portal_record(&self, identifier: Issn) -> Result<Option<Value>> {
        fetch_json(&self.http, &self.portal_url(identifier)).await
    }
}

#[async_trait]
impl RegistrySource for IssnOrgClient {
    async fn fetch_registry(&self) -> Result<Vec<MappingPair>> {
        info!(url = %self.archive_url, "downloading registry archive");
        let bytes = download(&self.http, &self.archive_url).await?;
        let suffix = self.table_suffix.clone();
        let table = decode_blocking(move || parse_registry_archive(&bytes, &suffix)).await?;
        info!(
            rows = table.pairs.len(),
            skipped = table.skipped,
            "registry table decoded"
        );
        Ok(table.pairs)
    }
}
