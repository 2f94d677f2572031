//! Diff engine: active staging vs. canonical mappings.
//!
//! Additions are inserted with one `added` history row each. Removals are
//! recorded in history only; the canonical row stays until an operator
//! moves or merges it.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::ports::{MappingStore, Result};
use crate::run::ReconciliationRun;
use crate::types::{CanonicalMapping, Issn, MappingPair};

/// Identifiers never promoted to the canonical table, even when active.
/// These were merged by the registry in a way that contradicts its own
/// bulk table.
pub const DEFAULT_IGNORED_IDENTIFIERS: [&str; 10] = [
    "1931-3756",
    "2633-0032",
    "2057-0481",
    "2200-6974",
    "2633-5603",
    "1539-6053",
    "0971-7625",
    "0263-8762",
    "1744-3563",
    "2145-7166",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreList(HashSet<Issn>);

impl IgnoreList {
    pub fn new(identifiers: impl IntoIterator<Item = Issn>) -> Self {
        Self(identifiers.into_iter().collect())
    }

    pub fn empty() -> Self {
        Self(HashSet::new())
    }

    /// Parse configured strings. Any malformed entry fails the whole list.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        raw.iter()
            .map(|s| Issn::parse(s.as_ref()))
            .collect::<Result<HashSet<_>>>()
            .map(Self)
    }

    pub fn contains(&self, identifier: Issn) -> bool {
        self.0.contains(&identifier)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self(
            DEFAULT_IGNORED_IDENTIFIERS
                .iter()
                .filter_map(|s| Issn::parse(s).ok())
                .collect(),
        )
    }
}

/// Planned changes, each list sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingDiff {
    pub added: Vec<MappingPair>,
    pub removed: Vec<MappingPair>,
    /// Active pairs withheld because the identifier is on the ignore list.
    pub ignored: Vec<MappingPair>,
    /// Active pairs whose identifier is already mapped to another group.
    pub conflicts: Vec<MappingPair>,
}

impl MappingDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Set difference over `(identifier, linking_identifier)`.
pub fn plan_diff(
    staged_active: impl IntoIterator<Item = MappingPair>,
    canonical: &[CanonicalMapping],
    ignore: &IgnoreList,
) -> MappingDiff {
    let canonical_pairs: HashSet<MappingPair> = canonical.iter().map(|m| m.pair()).collect();
    let canonical_by_identifier: HashMap<Issn, Issn> = canonical
        .iter()
        .map(|m| (m.identifier, m.linking_identifier))
        .collect();

    let mut diff = MappingDiff::default();
    let mut staged = HashSet::new();
    for pair in staged_active {
        staged.insert(pair);
        if canonical_pairs.contains(&pair) {
            continue;
        }
        if ignore.contains(pair.identifier) {
            diff.ignored.push(pair);
        } else if canonical_by_identifier.contains_key(&pair.identifier) {
            diff.conflicts.push(pair);
        } else {
            diff.added.push(pair);
        }
    }
    diff.removed = canonical_pairs
        .into_iter()
        .filter(|pair| !staged.contains(pair))
        .collect();

    diff.added.sort();
    diff.removed.sort();
    diff.ignored.sort();
    diff.conflicts.sort();
    diff
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: u64,
    pub removed: u64,
    pub ignored: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    ignore: IgnoreList,
}

impl DiffEngine {
    pub fn new(ignore: IgnoreList) -> Self {
        Self { ignore }
    }

    pub fn ignore_list(&self) -> &IgnoreList {
        &self.ignore
    }

    pub async fn plan<S>(&self, run: &ReconciliationRun, store: &S) -> Result<MappingDiff>
    where
        S: MappingStore + ?Sized,
    {
        let canonical = store.active_mappings().await?;
        Ok(plan_diff(run.staging.active_pairs(), &canonical, &self.ignore))
    }

    /// Compute and apply the diff. Re-running against unchanged inputs
    /// writes nothing.
    pub async fn apply<S>(&self, run: &ReconciliationRun, store: &S) -> Result<DiffSummary>
    where
        S: MappingStore + ?Sized,
    {
        let diff = self.plan(run, store).await?;

        for pair in &diff.ignored {
            info!(
                identifier = %pair.identifier,
                linking_identifier = %pair.linking_identifier,
                "identifier on ignore list, not promoted"
            );
        }
        for pair in &diff.conflicts {
            warn!(
                identifier = %pair.identifier,
                linking_identifier = %pair.linking_identifier,
                "identifier already mapped to another group, skipping add"
            );
        }

        let added = if diff.added.is_empty() {
            0
        } else {
            store.insert_mappings(&diff.added).await?
        };
        let removed = if diff.removed.is_empty() {
            0
        } else {
            store.record_removals(&diff.removed).await?
        };

        info!(
            run_id = %run.id,
            added,
            removed,
            ignored = diff.ignored.len(),
            conflicts = diff.conflicts.len(),
            "diff applied"
        );
        Ok(DiffSummary {
            added,
            removed,
            ignored: diff.ignored.len(),
            conflicts: diff.conflicts.len(),
        })
    }
}
