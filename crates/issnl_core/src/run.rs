//! Per-run working state.
//!
//! Staging rows and the crossref identifier set belong to a single
//! `ReconciliationRun`; nothing is shared between runs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Issn, MappingPair, StagedMapping};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("identifier {0} is already staged")]
pub struct StagingConflict(pub Issn);

/// Staged registry rows, indexed by identifier and by linking identifier.
#[derive(Debug, Default)]
pub struct StagingArea {
    rows: HashMap<Issn, StagedMapping>,
    groups: HashMap<Issn, Vec<Issn>>,
    /// Linking identifiers that arrived with the registry snapshot.
    loaded_groups: HashSet<Issn>,
}

impl StagingArea {
    pub fn reserve(&mut self, additional: usize) {
        self.rows.reserve(additional);
    }

    /// Identifiers are unique within a run.
    pub fn insert(&mut self, row: StagedMapping) -> Result<(), StagingConflict> {
        if self.rows.contains_key(&row.identifier) {
            return Err(StagingConflict(row.identifier));
        }
        self.groups
            .entry(row.linking_identifier)
            .or_default()
            .push(row.identifier);
        self.rows.insert(row.identifier, row);
        Ok(())
    }

    /// Insert a row read from the registry snapshot.
    pub fn insert_loaded(&mut self, row: StagedMapping) -> Result<(), StagingConflict> {
        let linking_identifier = row.linking_identifier;
        self.insert(row)?;
        self.loaded_groups.insert(linking_identifier);
        Ok(())
    }

    /// Whether the registry snapshot of this run carries the group.
    pub fn is_loaded_group(&self, linking_identifier: Issn) -> bool {
        self.loaded_groups.contains(&linking_identifier)
    }

    pub fn get(&self, identifier: Issn) -> Option<&StagedMapping> {
        self.rows.get(&identifier)
    }

    pub fn contains(&self, identifier: Issn) -> bool {
        self.rows.contains_key(&identifier)
    }

    /// Mark every row sharing `linking_identifier` active. Returns how many
    /// rows changed state.
    pub fn activate_group(&mut self, linking_identifier: Issn) -> usize {
        let Some(members) = self.groups.get(&linking_identifier) else {
            return 0;
        };
        let mut changed = 0;
        for identifier in members {
            if let Some(row) = self.rows.get_mut(identifier) {
                if !row.is_active {
                    row.is_active = true;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn active_pairs(&self) -> impl Iterator<Item = MappingPair> + '_ {
        self.rows
            .values()
            .filter(|row| row.is_active)
            .map(StagedMapping::pair)
    }

    pub fn active_count(&self) -> usize {
        self.rows.values().filter(|row| row.is_active).count()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.groups.clear();
        self.loaded_groups.clear();
    }
}

/// Context object threaded through load → reconcile → diff.
#[derive(Debug)]
pub struct ReconciliationRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub staging: StagingArea,
    /// Identifiers the citation index reported for this run.
    pub crossref_known: HashSet<Issn>,
}

impl ReconciliationRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            staging: StagingArea::default(),
            crossref_known: HashSet::new(),
        }
    }

    /// Wipe the run's transient state.
    pub fn finish(&mut self) {
        self.staging.clear();
        self.crossref_known.clear();
    }
}

impl Default for ReconciliationRun {
    fn default() -> Self {
        Self::new()
    }
}
