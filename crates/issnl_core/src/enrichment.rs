//! Per-journal enrichment from the two description endpoints.
//!
//! Runs after a rebuild against metadata rows that were never enriched. It
//! writes payloads, crossref aliases, journals and linked identities, and
//! never touches the canonical mapping table.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::payload::{format_title, normalize_publisher, CrossrefJournal, RegistryRecord};
use crate::ports::{DescriptionSource, IdentityStore, Result};
use crate::types::{CanonicalMetadata, Issn, Journal, LinkedIdentity};

pub const DEFAULT_BATCH_SIZE: usize = 100;

pub const LINK_REASON_CROSSREF: &str = "crossref";

/// Fields written back to a metadata row. `None` leaves a field as is.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentUpdate {
    pub linking_identifier: Issn,
    pub registry_payload: Option<Value>,
    pub crossref_payload: Option<Value>,
    pub crossref_aliases: Option<Vec<Issn>>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentUpdate {
    /// Only stamps `updated_at`.
    pub fn touched(linking_identifier: Issn) -> Self {
        Self {
            linking_identifier,
            registry_payload: None,
            crossref_payload: None,
            crossref_aliases: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub processed: usize,
    pub failed: usize,
    pub journals_created: usize,
    pub journals_refreshed: usize,
    pub links_recorded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalChange {
    Created,
    Refreshed,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct EnrichmentService {
    batch_size: usize,
}

impl Default for EnrichmentService {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl EnrichmentService {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Enrich pending rows batch by batch, up to `limit` rows when given.
    pub async fn run<S>(
        &self,
        store: &S,
        source: &dyn DescriptionSource,
        limit: Option<usize>,
    ) -> Result<EnrichmentSummary>
    where
        S: IdentityStore + ?Sized,
    {
        let mut summary = EnrichmentSummary::default();
        let mut attempted = HashSet::new();

        loop {
            let remaining = limit.map(|l| l.saturating_sub(attempted.len()));
            if remaining == Some(0) {
                break;
            }
            let batch_size = remaining.map_or(self.batch_size, |r| r.min(self.batch_size));
            let batch = store.pending_enrichment(batch_size).await?;
            let fresh: Vec<_> = batch
                .into_iter()
                .filter(|m| attempted.insert(m.linking_identifier))
                .collect();
            if fresh.is_empty() {
                break;
            }
            debug!(rows = fresh.len(), "enriching batch");

            for meta in fresh {
                let linking = meta.linking_identifier;
                match self.enrich_one(store, source, meta).await {
                    Ok((change, links)) => {
                        summary.processed += 1;
                        summary.links_recorded += links;
                        match change {
                            JournalChange::Created => summary.journals_created += 1,
                            JournalChange::Refreshed => summary.journals_refreshed += 1,
                            JournalChange::Unchanged => {}
                        }
                    }
                    Err(e) => {
                        warn!(linking_identifier = %linking, error = %e, "enrichment failed, skipping");
                        summary.failed += 1;
                        if let Err(e) = store.save_enrichment(&EnrichmentUpdate::touched(linking)).await {
                            warn!(linking_identifier = %linking, error = %e, "could not mark row as attempted");
                        }
                    }
                }
            }
        }

        info!(
            processed = summary.processed,
            failed = summary.failed,
            created = summary.journals_created,
            refreshed = summary.journals_refreshed,
            links = summary.links_recorded,
            "enrichment finished"
        );
        Ok(summary)
    }

    async fn enrich_one<S>(
        &self,
        store: &S,
        source: &dyn DescriptionSource,
        meta: CanonicalMetadata,
    ) -> Result<(JournalChange, usize)>
    where
        S: IdentityStore + ?Sized,
    {
        let linking = meta.linking_identifier;

        let registry_payload = match source.registry_description(linking).await {
            Ok(Some(value)) if RegistryRecord::from_value(&value).is_some() => Some(value),
            Ok(_) => {
                debug!(linking_identifier = %linking, "no registry description");
                None
            }
            Err(e) => {
                warn!(linking_identifier = %linking, error = %e, "registry description failed");
                None
            }
        };

        let crossref_payload = match source.crossref_description(linking).await {
            Ok(value) => value,
            Err(e) => {
                warn!(linking_identifier = %linking, error = %e, "crossref description failed");
                None
            }
        };
        let crossref_aliases = crossref_payload
            .as_ref()
            .and_then(CrossrefJournal::from_value)
            .map(|j| j.aliases().aliases);

        let registry = registry_payload
            .as_ref()
            .or(meta.registry_payload.as_ref())
            .and_then(RegistryRecord::from_value);
        let crossref = crossref_payload
            .as_ref()
            .or(meta.crossref_payload.as_ref())
            .and_then(CrossrefJournal::from_value);

        let title = registry
            .as_ref()
            .and_then(RegistryRecord::title)
            .or_else(|| crossref.as_ref().and_then(|c| c.message.title.clone()))
            .and_then(|t| format_title(&t));
        let publisher = crossref
            .as_ref()
            .and_then(|c| c.message.publisher.as_deref())
            .and_then(normalize_publisher);

        let change = match title {
            Some(title) => self.save_journal(store, linking, title, publisher).await?,
            None => JournalChange::Unchanged,
        };

        let mut links = 0;
        for other in store.find_by_crossref_alias(linking).await? {
            if other.linking_identifier == linking {
                continue;
            }
            let link = LinkedIdentity {
                primary: linking,
                secondary: other.linking_identifier,
                reason: LINK_REASON_CROSSREF.to_string(),
            };
            if store.record_linked_identity(&link).await? {
                links += 1;
            }
        }

        store
            .save_enrichment(&EnrichmentUpdate {
                linking_identifier: linking,
                registry_payload,
                crossref_payload,
                crossref_aliases,
                updated_at: Utc::now(),
            })
            .await?;
        Ok((change, links))
    }

    async fn save_journal<S>(
        &self,
        store: &S,
        linking: Issn,
        title: String,
        publisher: Option<String>,
    ) -> Result<JournalChange>
    where
        S: IdentityStore + ?Sized,
    {
        match store.journal(linking).await? {
            None => {
                let mut journal = Journal::new(linking, title);
                journal.publisher = publisher;
                store.upsert_journal(&journal).await?;
                info!(linking_identifier = %linking, title = %journal.title, "journal created");
                Ok(JournalChange::Created)
            }
            Some(existing) if existing.is_modified_title => Ok(JournalChange::Unchanged),
            Some(existing) => {
                let publisher = publisher.or_else(|| existing.publisher.clone());
                if existing.title == title && existing.publisher == publisher {
                    return Ok(JournalChange::Unchanged);
                }
                let journal = Journal {
                    title,
                    publisher,
                    ..existing
                };
                store.upsert_journal(&journal).await?;
                Ok(JournalChange::Refreshed)
            }
        }
    }
}
