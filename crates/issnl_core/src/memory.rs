//! In-memory implementation of every store port.
//!
//! Used by the integration tests and by `--dry-run` imports. One write lock
//! per call stands in for a transaction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::enrichment::EnrichmentUpdate;
use crate::error::IdentityError;
use crate::mutators::{MergePlan, MovePlan};
use crate::ports::*;
use crate::types::*;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    /// Keyed by identifier: one linking identifier per identifier.
    pub mappings: BTreeMap<Issn, CanonicalMapping>,
    pub history: Vec<MappingHistory>,
    pub metadata: BTreeMap<Issn, CanonicalMetadata>,
    pub journals: BTreeMap<Issn, Journal>,
    pub priced_records: HashMap<Issn, u64>,
    pub pending: Vec<PendingIdentifierRequest>,
    pub linked: Vec<LinkedIdentity>,
}

impl MemoryState {
    fn has_history(&self, pair: &MappingPair, status: HistoryStatus) -> bool {
        self.history.iter().any(|h| {
            h.identifier == pair.identifier
                && h.linking_identifier == pair.linking_identifier
                && h.status == status
        })
    }

    fn push_history(&mut self, pair: &MappingPair, status: HistoryStatus) -> bool {
        if self.has_history(pair, status) {
            return false;
        }
        self.history.push(MappingHistory {
            linking_identifier: pair.linking_identifier,
            identifier: pair.identifier,
            status,
            occurred_at: Utc::now(),
        });
        true
    }

    fn insert_mapping(&mut self, pair: MappingPair) -> bool {
        if self.mappings.contains_key(&pair.identifier) {
            return false;
        }
        self.mappings.insert(
            pair.identifier,
            CanonicalMapping {
                identifier: pair.identifier,
                linking_identifier: pair.linking_identifier,
                is_active: true,
                created_at: Utc::now(),
            },
        );
        true
    }

    fn remove_group(&mut self, linking_identifier: Issn) {
        self.mappings
            .retain(|_, m| m.linking_identifier != linking_identifier);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    run_lock: Arc<AtomicBool>,
    /// Identifiers whose `mapping_for` lookup fails.
    unreachable: Arc<RwLock<HashSet<Issn>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the whole store, for before/after comparisons.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.read().await.clone()
    }

    /// Seed canonical mappings without history rows.
    pub async fn seed_mappings(&self, pairs: &[MappingPair]) {
        let mut state = self.state.write().await;
        for pair in pairs {
            state.insert_mapping(*pair);
        }
    }

    pub async fn seed_metadata(&self, metadata: CanonicalMetadata) {
        self.state
            .write()
            .await
            .metadata
            .insert(metadata.linking_identifier, metadata);
    }

    pub async fn seed_journal(&self, journal: Journal) {
        self.state
            .write()
            .await
            .journals
            .insert(journal.linking_identifier, journal);
    }

    pub async fn set_priced_records(&self, linking_identifier: Issn, count: u64) {
        self.state
            .write()
            .await
            .priced_records
            .insert(linking_identifier, count);
    }

    /// Queue a pending request and return its id.
    pub async fn push_pending(&self, identifier: &str, status: &str) -> i64 {
        let mut state = self.state.write().await;
        let id = state.pending.len() as i64 + 1;
        state.pending.push(PendingIdentifierRequest {
            id,
            identifier: identifier.to_string(),
            status: status.to_string(),
            processed: false,
        });
        id
    }

    /// Make `mapping_for(identifier)` fail, as an unreachable database would.
    pub async fn fail_lookups_for(&self, identifier: Issn) {
        self.unreachable.write().await.insert(identifier);
    }

    pub async fn all_history(&self) -> Vec<MappingHistory> {
        self.state.read().await.history.clone()
    }

    pub async fn all_pending(&self) -> Vec<PendingIdentifierRequest> {
        self.state.read().await.pending.clone()
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn active_mappings(&self) -> Result<Vec<CanonicalMapping>> {
        let state = self.state.read().await;
        Ok(state
            .mappings
            .values()
            .filter(|m| m.is_active)
            .cloned()
            .collect())
    }

    async fn mapping_for(&self, identifier: Issn) -> Result<Option<CanonicalMapping>> {
        if self.unreachable.read().await.contains(&identifier) {
            return Err(IdentityError::Internal(anyhow::anyhow!(
                "mapping lookup for {identifier} failed"
            )));
        }
        let state = self.state.read().await;
        Ok(state
            .mappings
            .get(&identifier)
            .filter(|m| m.is_active)
            .cloned())
    }

    async fn mappings_for_linking(
        &self,
        linking_identifier: Issn,
    ) -> Result<Vec<CanonicalMapping>> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .mappings
            .values()
            .filter(|m| m.is_active && m.linking_identifier == linking_identifier)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.identifier.cmp(&b.identifier))
        });
        Ok(rows)
    }

    async fn insert_mappings(&self, pairs: &[MappingPair]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for pair in pairs {
            if state.insert_mapping(*pair) {
                state.push_history(pair, HistoryStatus::Added);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn record_removals(&self, pairs: &[MappingPair]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut appended = 0;
        for pair in pairs {
            if state.push_history(pair, HistoryStatus::Removed) {
                appended += 1;
            }
        }
        Ok(appended)
    }

    async fn history_for(&self, identifier: Issn) -> Result<Vec<MappingHistory>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.identifier == identifier)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let state = self.state.read().await;
        Ok(GraphCounts {
            mappings: state.mappings.len() as u64,
            history: state.history.len() as u64,
            metadata: state.metadata.len() as u64,
        })
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn upsert_registry_aliases(&self, groups: &[(Issn, Vec<Issn>)]) -> Result<u64> {
        let mut state = self.state.write().await;
        for (linking, aliases) in groups {
            state
                .metadata
                .entry(*linking)
                .and_modify(|m| m.registry_aliases = aliases.clone())
                .or_insert_with(|| CanonicalMetadata::new(*linking, aliases.clone()));
        }
        Ok(groups.len() as u64)
    }

    async fn metadata(&self, linking_identifier: Issn) -> Result<Option<CanonicalMetadata>> {
        Ok(self
            .state
            .read()
            .await
            .metadata
            .get(&linking_identifier)
            .cloned())
    }

    async fn find_by_registry_alias(
        &self,
        identifier: Issn,
    ) -> Result<Option<CanonicalMetadata>> {
        let state = self.state.read().await;
        Ok(state
            .metadata
            .values()
            .find(|m| m.registry_aliases.contains(&identifier))
            .cloned())
    }

    async fn find_by_crossref_alias(&self, identifier: Issn) -> Result<Vec<CanonicalMetadata>> {
        let state = self.state.read().await;
        Ok(state
            .metadata
            .values()
            .filter(|m| m.crossref_aliases.contains(&identifier))
            .cloned()
            .collect())
    }

    async fn pending_enrichment(&self, limit: usize) -> Result<Vec<CanonicalMetadata>> {
        let state = self.state.read().await;
        Ok(state
            .metadata
            .values()
            .filter(|m| m.updated_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_enrichment(&self, update: &EnrichmentUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let meta = state
            .metadata
            .get_mut(&update.linking_identifier)
            .ok_or_else(|| {
                IdentityError::NotFound(format!("metadata {}", update.linking_identifier))
            })?;
        if let Some(payload) = &update.registry_payload {
            meta.registry_payload = Some(payload.clone());
        }
        if let Some(payload) = &update.crossref_payload {
            meta.crossref_payload = Some(payload.clone());
        }
        if let Some(aliases) = &update.crossref_aliases {
            meta.crossref_aliases = aliases.clone();
        }
        meta.updated_at = Some(update.updated_at);
        Ok(())
    }

    async fn record_linked_identity(&self, link: &LinkedIdentity) -> Result<bool> {
        let mut state = self.state.write().await;
        let exists = state
            .linked
            .iter()
            .any(|l| l.primary == link.primary && l.secondary == link.secondary);
        if exists {
            return Ok(false);
        }
        state.linked.push(link.clone());
        Ok(true)
    }

    async fn linked_identities(&self, linking_identifier: Issn) -> Result<Vec<LinkedIdentity>> {
        let state = self.state.read().await;
        Ok(state
            .linked
            .iter()
            .filter(|l| l.primary == linking_identifier || l.secondary == linking_identifier)
            .cloned()
            .collect())
    }

    async fn retain_metadata(&self, keep: &HashSet<Issn>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.metadata.len();
        state.metadata.retain(|linking, _| keep.contains(linking));
        Ok((before - state.metadata.len()) as u64)
    }
}

#[async_trait]
impl JournalStore for MemoryStore {
    async fn journal(&self, linking_identifier: Issn) -> Result<Option<Journal>> {
        Ok(self
            .state
            .read()
            .await
            .journals
            .get(&linking_identifier)
            .cloned())
    }

    async fn upsert_journal(&self, journal: &Journal) -> Result<()> {
        self.state
            .write()
            .await
            .journals
            .insert(journal.linking_identifier, journal.clone());
        Ok(())
    }

    async fn priced_record_count(&self, linking_identifier: Issn) -> Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .priced_records
            .get(&linking_identifier)
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl PendingRequestStore for MemoryStore {
    async fn unprocessed_requests(&self) -> Result<Vec<PendingIdentifierRequest>> {
        let state = self.state.read().await;
        Ok(state
            .pending
            .iter()
            .filter(|r| r.status == PENDING_STATUS_PROCESS && !r.processed)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut marked = 0;
        for request in state.pending.iter_mut() {
            if ids.contains(&request.id) && !request.processed {
                request.processed = true;
                marked += 1;
            }
        }
        Ok(marked)
    }
}

#[async_trait]
impl IdentityGraphStore for MemoryStore {
    async fn apply_merge(&self, plan: &MergePlan) -> Result<()> {
        let mut state = self.state.write().await;

        let priced_records = state.priced_records.get(&plan.from).copied().unwrap_or(0);
        if priced_records > 0 {
            return Err(IdentityError::MergeBlocked {
                linking_identifier: plan.from,
                priced_records,
            });
        }
        if !state.metadata.contains_key(&plan.to) || !state.journals.contains_key(&plan.to) {
            return Err(IdentityError::NotFound(format!("linking identifier {}", plan.to)));
        }

        state.journals.remove(&plan.from);
        state.metadata.remove(&plan.from);
        state.remove_group(plan.from);
        for identifier in &plan.repointed {
            state.insert_mapping(MappingPair::new(*identifier, plan.to));
        }

        if let Some(meta) = state.metadata.get_mut(&plan.to) {
            for alias in &plan.moved_aliases {
                if !meta.registry_aliases.contains(alias) {
                    meta.registry_aliases.push(*alias);
                }
            }
            if !meta.previously_known_as.contains(&plan.from) {
                meta.previously_known_as.push(plan.from);
            }
        }
        if let (Some(journal), Some(title)) =
            (state.journals.get_mut(&plan.to), &plan.alternate_title)
        {
            if !journal.alternate_titles.contains(title) {
                journal.alternate_titles.push(title.clone());
            }
        }
        Ok(())
    }

    async fn apply_move(&self, plan: &MovePlan) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.metadata.contains_key(&plan.to) {
            return Err(IdentityError::NotFound(format!("metadata {}", plan.to)));
        }

        if let Some(retired) = plan.retired_linking {
            state.journals.remove(&retired);
            state.metadata.remove(&retired);
            state.remove_group(retired);
        }
        for pair in &plan.deleted_mappings {
            if state
                .mappings
                .get(&pair.identifier)
                .is_some_and(|m| m.linking_identifier == pair.linking_identifier)
            {
                state.mappings.remove(&pair.identifier);
            }
        }
        state.mappings.remove(&plan.identifier);
        state.insert_mapping(MappingPair::new(plan.identifier, plan.to));

        if let Some(meta) = state.metadata.get_mut(&plan.to) {
            if !meta.registry_aliases.contains(&plan.identifier) {
                meta.registry_aliases.push(plan.identifier);
            }
        }
        Ok(())
    }

    async fn graft(&self, pair: MappingPair) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.insert_mapping(pair) {
            return Ok(false);
        }
        if let Some(meta) = state.metadata.get_mut(&pair.linking_identifier) {
            if !meta.registry_aliases.contains(&pair.identifier) {
                meta.registry_aliases.push(pair.identifier);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl RunLock for MemoryStore {
    async fn try_acquire_run_lock(&self) -> Result<bool> {
        Ok(self
            .run_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn release_run_lock(&self) -> Result<()> {
        self.run_lock.store(false, Ordering::Release);
        Ok(())
    }
}
