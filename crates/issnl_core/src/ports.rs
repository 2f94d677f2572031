//! Storage and source port traits.
//! Implemented by issnl_postgres (stores) and the issnl binary crate
//! (HTTP sources). Pipeline stages depend only on these traits.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::enrichment::EnrichmentUpdate;
use crate::error::IdentityError;
use crate::mutators::{MergePlan, MovePlan};
use crate::types::*;

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Row counts of the durable tables, used in run reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounts {
    pub mappings: u64,
    pub history: u64,
    pub metadata: u64,
}

// ── Stores ───────────────────────────────────────────────────

/// Canonical mapping table and its history ledger.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Every active canonical mapping.
    async fn active_mappings(&self) -> Result<Vec<CanonicalMapping>>;

    /// The active mapping for an identifier, if any.
    async fn mapping_for(&self, identifier: Issn) -> Result<Option<CanonicalMapping>>;

    /// Every active mapping governed by a linking identifier.
    async fn mappings_for_linking(&self, linking_identifier: Issn)
        -> Result<Vec<CanonicalMapping>>;

    /// Insert mappings, each with exactly one `added` history row, in one
    /// transaction. Pairs already present are skipped. Returns rows inserted.
    async fn insert_mappings(&self, pairs: &[MappingPair]) -> Result<u64>;

    /// Append a `removed` history row for each pair lacking one.
    /// Returns rows appended.
    async fn record_removals(&self, pairs: &[MappingPair]) -> Result<u64>;

    /// History entries touching an identifier, oldest first.
    async fn history_for(&self, identifier: Issn) -> Result<Vec<MappingHistory>>;

    async fn counts(&self) -> Result<GraphCounts>;
}

/// Aggregated per-journal metadata and crossref links.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Upsert one row per group. On conflict only `registry_aliases` is
    /// replaced. Returns rows written.
    async fn upsert_registry_aliases(&self, groups: &[(Issn, Vec<Issn>)]) -> Result<u64>;

    async fn metadata(&self, linking_identifier: Issn) -> Result<Option<CanonicalMetadata>>;

    /// The row whose registry-side alias list contains `identifier`.
    async fn find_by_registry_alias(&self, identifier: Issn)
        -> Result<Option<CanonicalMetadata>>;

    /// Rows whose crossref-side alias list contains `identifier`, ordered by
    /// linking identifier.
    async fn find_by_crossref_alias(&self, identifier: Issn) -> Result<Vec<CanonicalMetadata>>;

    /// Rows never enriched (`updated_at` unset), at most `limit`.
    async fn pending_enrichment(&self, limit: usize) -> Result<Vec<CanonicalMetadata>>;

    /// Write enrichment fields. `None` fields are left untouched.
    async fn save_enrichment(&self, update: &EnrichmentUpdate) -> Result<()>;

    /// Returns `false` when the link was already recorded.
    async fn record_linked_identity(&self, link: &LinkedIdentity) -> Result<bool>;

    async fn linked_identities(&self, linking_identifier: Issn) -> Result<Vec<LinkedIdentity>>;

    /// Delete metadata rows whose linking identifier is not in `keep`.
    /// Returns rows deleted.
    async fn retain_metadata(&self, keep: &HashSet<Issn>) -> Result<u64>;
}

#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn journal(&self, linking_identifier: Issn) -> Result<Option<Journal>>;

    /// Insert or fully replace a journal keyed by its linking identifier.
    async fn upsert_journal(&self, journal: &Journal) -> Result<()>;

    /// Subscription plus article-processing-charge prices attached to a journal.
    async fn priced_record_count(&self, linking_identifier: Issn) -> Result<u64>;
}

/// The "missing journal" submission queue.
#[async_trait]
pub trait PendingRequestStore: Send + Sync {
    /// Requests with status `process` and `processed = false`.
    async fn unprocessed_requests(&self) -> Result<Vec<PendingIdentifierRequest>>;

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64>;
}

/// Operator-triggered graph corrections. Each call is one transaction.
#[async_trait]
pub trait IdentityGraphStore: Send + Sync {
    /// Fails with `MergeBlocked` (and writes nothing) if priced records
    /// appeared on the source journal since the plan was built.
    async fn apply_merge(&self, plan: &MergePlan) -> Result<()>;

    async fn apply_move(&self, plan: &MovePlan) -> Result<()>;

    /// Insert `pair` and append its identifier to the group's registry
    /// aliases, unless the identifier is already mapped. Returns whether
    /// anything was written.
    async fn graft(&self, pair: MappingPair) -> Result<bool>;
}

/// Single-flight guard for reconciliation runs.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// Returns `false` when another run holds the lock.
    async fn try_acquire_run_lock(&self) -> Result<bool>;

    async fn release_run_lock(&self) -> Result<()>;
}

/// Everything the pipeline, resolver and mutators need from persistence.
pub trait IdentityStore:
    MappingStore + MetadataStore + JournalStore + PendingRequestStore + IdentityGraphStore + RunLock
{
}

impl<T> IdentityStore for T where
    T: MappingStore
        + MetadataStore
        + JournalStore
        + PendingRequestStore
        + IdentityGraphStore
        + RunLock
{
}

// ── Sources ──────────────────────────────────────────────────

/// The primary registry snapshot.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Every `(identifier, linking identifier)` row of the current snapshot.
    /// Fails with `Download` when the snapshot cannot be fetched or opened.
    async fn fetch_registry(&self) -> Result<Vec<MappingPair>>;
}

/// The citation-index dataset and its per-identifier lookup API.
#[async_trait]
pub trait CrossrefSource: Send + Sync {
    /// Raw identifier strings from the bulk identifier list.
    async fn fetch_known_identifiers(&self) -> Result<Vec<String>>;

    /// `Ok(None)` for a non-200 or unparseable response; `Err` for transport
    /// failures.
    async fn lookup_aliases(&self, identifier: Issn) -> Result<Option<JournalAliases>>;
}

/// Journal-description endpoints used by enrichment and supersede notices.
#[async_trait]
pub trait DescriptionSource: Send + Sync {
    /// Registry-portal JSON-LD record, when the portal knows the identifier.
    async fn registry_description(&self, identifier: Issn) -> Result<Option<serde_json::Value>>;

    /// Citation-index journal record, when the index knows the identifier.
    async fn crossref_description(&self, identifier: Issn) -> Result<Option<serde_json::Value>>;
}
