//! Operator-triggered identity graph corrections.
//!
//! Each mutator validates against current state, builds a plan, and hands
//! the plan to the store, which applies it in one transaction. Nothing here
//! writes mapping history.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::IdentityError;
use crate::payload::RegistryRecord;
use crate::ports::{DescriptionSource, IdentityStore, Result};
use crate::types::{Issn, MappingPair};

/// Everything `apply_merge` needs, resolved up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    pub from: Issn,
    pub to: Issn,
    /// Identifiers whose mapping moves from `from` to `to`.
    pub repointed: Vec<Issn>,
    /// Appended to `to`'s registry aliases.
    pub moved_aliases: Vec<Issn>,
    /// `from`'s title, when it differs from the surviving title.
    pub alternate_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovePlan {
    pub identifier: Issn,
    pub to: Issn,
    /// Group whose journal, metadata and mappings are deleted first.
    pub retired_linking: Option<Issn>,
    /// Mappings removed by the move, the identifier's own included.
    pub deleted_mappings: Vec<MappingPair>,
}

impl MovePlan {
    /// Other identifiers that lose their mapping.
    pub fn dependents(&self) -> Vec<Issn> {
        self.deleted_mappings
            .iter()
            .map(|p| p.identifier)
            .filter(|id| *id != self.identifier)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SupersedeOutcome {
    Grafted { linking_identifier: Issn },
    /// The replacement has no canonical mapping to graft onto.
    TargetUnmapped,
    /// The cancelled identifier is already mapped; nothing is removed.
    AlreadyMapped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupersedeReport {
    pub grafted: Vec<(Issn, Issn)>,
    pub skipped: Vec<Issn>,
}

pub struct IdentityGraphMutators<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> IdentityGraphMutators<'a, S>
where
    S: IdentityStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    // ── Merge ────────────────────────────────────────────────

    pub async fn plan_merge(&self, from: Issn, to: Issn) -> Result<MergePlan> {
        if from == to {
            return Err(IdentityError::Conflict(format!(
                "cannot merge {from} into itself"
            )));
        }
        let from_journal = self
            .store
            .journal(from)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("journal {from}")))?;
        let to_journal = self
            .store
            .journal(to)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("journal {to}")))?;
        let to_meta = self
            .store
            .metadata(to)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("metadata {to}")))?;

        let priced_records = self.store.priced_record_count(from).await?;
        if priced_records > 0 {
            return Err(IdentityError::MergeBlocked {
                linking_identifier: from,
                priced_records,
            });
        }

        let repointed: Vec<Issn> = self
            .store
            .mappings_for_linking(from)
            .await?
            .into_iter()
            .map(|m| m.identifier)
            .collect();

        let mut moved_aliases = Vec::new();
        let from_aliases = self
            .store
            .metadata(from)
            .await?
            .map(|m| m.registry_aliases)
            .unwrap_or_default();
        for alias in from_aliases.into_iter().chain(repointed.iter().copied()) {
            if !to_meta.registry_aliases.contains(&alias) && !moved_aliases.contains(&alias) {
                moved_aliases.push(alias);
            }
        }

        let alternate_title = (from_journal.title.to_lowercase()
            != to_journal.title.to_lowercase())
        .then(|| from_journal.title.clone());

        Ok(MergePlan {
            from,
            to,
            repointed,
            moved_aliases,
            alternate_title,
        })
    }

    /// Fold `from` into `to`. Refused with `MergeBlocked`, and nothing
    /// written, while `from` has priced records.
    pub async fn merge(&self, from: Issn, to: Issn) -> Result<MergePlan> {
        let plan = self.plan_merge(from, to).await?;
        self.store.apply_merge(&plan).await?;
        info!(
            from = %from,
            to = %to,
            repointed = plan.repointed.len(),
            "merged linking identifiers"
        );
        Ok(plan)
    }

    // ── Move ─────────────────────────────────────────────────

    pub async fn plan_move(&self, identifier: Issn, to: Issn) -> Result<MovePlan> {
        if self.store.metadata(to).await?.is_none() {
            return Err(IdentityError::NotFound(format!("metadata {to}")));
        }

        let current = self.store.mapping_for(identifier).await?;
        if let Some(mapping) = &current {
            if mapping.linking_identifier == to {
                return Err(IdentityError::Conflict(format!(
                    "{identifier} is already mapped to {to}"
                )));
            }
        }

        let retired_linking = match &current {
            Some(mapping) => Some(mapping.linking_identifier),
            None if identifier != to
                && (self.store.journal(identifier).await?.is_some()
                    || self.store.metadata(identifier).await?.is_some()) =>
            {
                Some(identifier)
            }
            None => None,
        };

        let mut deleted_mappings: Vec<MappingPair> = match retired_linking {
            Some(linking) => self
                .store
                .mappings_for_linking(linking)
                .await?
                .iter()
                .map(|m| m.pair())
                .collect(),
            None => Vec::new(),
        };
        if let Some(mapping) = &current {
            if !deleted_mappings.contains(&mapping.pair()) {
                deleted_mappings.push(mapping.pair());
            }
        }
        deleted_mappings.sort();

        Ok(MovePlan {
            identifier,
            to,
            retired_linking,
            deleted_mappings,
        })
    }

    /// Re-map one identifier onto `to`. Collapsing a group with other
    /// members needs `confirmed`.
    pub async fn move_identifier(
        &self,
        identifier: Issn,
        to: Issn,
        confirmed: bool,
    ) -> Result<MovePlan> {
        let plan = self.plan_move(identifier, to).await?;
        let dependents = plan.dependents();
        if !dependents.is_empty() && !confirmed {
            return Err(IdentityError::ConfirmationRequired { dependents });
        }
        self.store.apply_move(&plan).await?;
        info!(
            identifier = %identifier,
            to = %to,
            deleted = plan.deleted_mappings.len(),
            "moved identifier"
        );
        Ok(plan)
    }

    // ── Supersede ────────────────────────────────────────────

    /// Graft `old` onto `new`'s group. Only ever adds a mapping.
    pub async fn supersede(&self, old: Issn, new: Issn) -> Result<SupersedeOutcome> {
        let Some(target) = self.store.mapping_for(new).await? else {
            return Ok(SupersedeOutcome::TargetUnmapped);
        };
        if self.store.mapping_for(old).await?.is_some() {
            return Ok(SupersedeOutcome::AlreadyMapped);
        }
        let pair = MappingPair::new(old, target.linking_identifier);
        if !self.store.graft(pair).await? {
            return Ok(SupersedeOutcome::AlreadyMapped);
        }
        info!(
            old = %old,
            new = %new,
            linking_identifier = %target.linking_identifier,
            "superseded cancelled identifier"
        );
        Ok(SupersedeOutcome::Grafted {
            linking_identifier: target.linking_identifier,
        })
    }

    /// Look up cancellation notices for each identifier and supersede the
    /// ones that name a replacement.
    pub async fn supersede_from_notices(
        &self,
        source: &dyn DescriptionSource,
        identifiers: &[Issn],
    ) -> Result<SupersedeReport> {
        let mut report = SupersedeReport::default();
        for &old in identifiers {
            let record = match source.registry_description(old).await {
                Ok(Some(value)) => RegistryRecord::from_value(&value),
                Ok(None) => None,
                Err(e) => {
                    warn!(identifier = %old, error = %e, "registry lookup failed, skipping");
                    report.skipped.push(old);
                    continue;
                }
            };
            let Some(new) = record.and_then(|r| r.cancelled_in_favor_of()) else {
                info!(identifier = %old, "no cancellation notice, skipping");
                report.skipped.push(old);
                continue;
            };
            match self.supersede(old, new).await? {
                SupersedeOutcome::Grafted { .. } => report.grafted.push((old, new)),
                outcome => {
                    info!(identifier = %old, replacement = %new, ?outcome, "supersede skipped");
                    report.skipped.push(old);
                }
            }
        }
        Ok(report)
    }

    // ── Retain ───────────────────────────────────────────────

    /// Delete metadata for every linking identifier outside `keep`.
    pub async fn retain_metadata(&self, keep: &[Issn]) -> Result<u64> {
        if keep.is_empty() {
            return Err(IdentityError::Conflict(
                "refusing to delete all metadata: keep list is empty".into(),
            ));
        }
        let keep: HashSet<Issn> = keep.iter().copied().collect();
        let deleted = self.store.retain_metadata(&keep).await?;
        info!(kept = keep.len(), deleted, "pruned canonical metadata");
        Ok(deleted)
    }
}
