//! Crossref reconciler: marks staged registry groups active and synthesizes
//! rows for identifiers the registry does not know.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ports::{CrossrefSource, IdentityStore, Result};
use crate::run::ReconciliationRun;
use crate::types::{Issn, JournalAliases, MappingPair, StagedMapping, PENDING_STATUS_PROCESS};

/// Why a worklist item produced no staged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidIdentifier,
    LookupFailed,
    NoData,
    /// The lookup returned two aliases, neither of them the identifier.
    Unrelated,
    /// Two aliases without a usable electronic/print classification.
    Unclassified,
    /// Synthesis would collide with a staged or canonical row.
    AlreadyMapped,
    Ambiguous,
    StagingConflict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub worklist: usize,
    pub pending_consumed: usize,
    pub activated: usize,
    pub carried_forward: usize,
    pub synthesized: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl ReconcileSummary {
    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Outcome of the alias lookup for an identifier unknown to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disambiguation {
    /// The identifier is its own linking identifier.
    SelfMapped(Issn),
    /// Graft onto the existing group of the other alias.
    Graft { identifier: Issn, linking_identifier: Issn },
    /// Mint a new group keyed by the electronic identifier.
    ElectronicPrint { electronic: Issn, print: Issn },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }

    pub async fn reconcile(
        &self,
        run: &mut ReconciliationRun,
        store: &dyn IdentityStore,
        crossref: &dyn CrossrefSource,
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        let known = crossref.fetch_known_identifiers().await?;
        let pending = store.unprocessed_requests().await?;

        // Consumed exactly once, before any per-item work can fail.
        let consumed: Vec<i64> = pending
            .iter()
            .filter(|r| r.status == PENDING_STATUS_PROCESS && !r.processed)
            .map(|r| r.id)
            .collect();
        if !consumed.is_empty() {
            store.mark_processed(&consumed).await?;
        }
        summary.pending_consumed = consumed.len();

        let mut seen = HashSet::new();
        let mut worklist = Vec::with_capacity(known.len() + pending.len());
        for raw in &known {
            match Issn::parse(raw) {
                Ok(issn) => {
                    run.crossref_known.insert(issn);
                    if seen.insert(issn) {
                        worklist.push(issn);
                    }
                }
                Err(_) => {
                    debug!(raw = %raw, "skipping unparseable crossref identifier");
                    summary.skip(SkipReason::InvalidIdentifier);
                }
            }
        }
        for request in pending.iter().filter(|r| consumed.contains(&r.id)) {
            match Issn::parse(&request.identifier) {
                Ok(issn) => {
                    if seen.insert(issn) {
                        worklist.push(issn);
                    }
                }
                Err(_) => {
                    warn!(request_id = request.id, raw = %request.identifier, "skipping unparseable pending request");
                    summary.skip(SkipReason::InvalidIdentifier);
                }
            }
        }
        summary.worklist = worklist.len();
        info!(
            run_id = %run.id,
            worklist = worklist.len(),
            pending = summary.pending_consumed,
            "reconciling against crossref"
        );

        for identifier in worklist {
            self.reconcile_one(run, store, crossref, identifier, &mut summary)
                .await;
        }

        info!(
            run_id = %run.id,
            activated = summary.activated,
            carried_forward = summary.carried_forward,
            synthesized = summary.synthesized,
            skipped = summary.skipped_total(),
            "reconciliation finished"
        );
        Ok(summary)
    }

    /// Never fails: per-item errors are logged and counted.
    async fn reconcile_one(
        &self,
        run: &mut ReconciliationRun,
        store: &dyn IdentityStore,
        crossref: &dyn CrossrefSource,
        identifier: Issn,
        summary: &mut ReconcileSummary,
    ) {
        if let Some(row) = run.staging.get(identifier) {
            let linking = row.linking_identifier;
            summary.activated += run.staging.activate_group(linking);
            return;
        }

        match store.mapping_for(identifier).await {
            Ok(Some(mapping)) => {
                self.carry_forward(run, store, mapping.pair(), summary)
                    .await;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(identifier = %identifier, error = %e, "canonical lookup failed, skipping");
                summary.skip(SkipReason::LookupFailed);
                return;
            }
        }

        let aliases = match crossref.lookup_aliases(identifier).await {
            Ok(Some(aliases)) => aliases,
            Ok(None) => {
                debug!(identifier = %identifier, "no alias data, skipping");
                summary.skip(SkipReason::NoData);
                return;
            }
            Err(e) => {
                warn!(identifier = %identifier, error = %e, "alias lookup failed, skipping");
                summary.skip(SkipReason::LookupFailed);
                return;
            }
        };

        let other_linking = match other_alias(identifier, &aliases) {
            Some(other) => match store.mapping_for(other).await {
                Ok(found) => found.map(|m| m.linking_identifier),
                Err(e) => {
                    warn!(identifier = %identifier, error = %e, "canonical lookup failed, skipping");
                    summary.skip(SkipReason::LookupFailed);
                    return;
                }
            },
            None => None,
        };

        let decision = disambiguate(identifier, &aliases, other_linking);
        self.apply_decision(run, store, identifier, decision, summary)
            .await;
    }

    /// Re-stage a canonical pair the registry snapshot does not carry.
    ///
    /// Only the identifier's own row comes back, unless its group is absent
    /// from the snapshot altogether (a group synthesized by an earlier run):
    /// then the remaining members are re-staged with it.
    async fn carry_forward(
        &self,
        run: &mut ReconciliationRun,
        store: &dyn IdentityStore,
        pair: MappingPair,
        summary: &mut ReconcileSummary,
    ) {
        let linking_identifier = pair.linking_identifier;
        self.restage(run, pair.identifier, linking_identifier, summary);
        if run.staging.is_loaded_group(linking_identifier) {
            return;
        }

        let members = match store.mappings_for_linking(linking_identifier).await {
            Ok(members) => members,
            Err(e) => {
                warn!(linking_identifier = %linking_identifier, error = %e, "group lookup failed, skipping");
                summary.skip(SkipReason::LookupFailed);
                return;
            }
        };
        for member in members {
            if !run.staging.contains(member.identifier) {
                self.restage(run, member.identifier, linking_identifier, summary);
            }
        }
    }

    fn restage(
        &self,
        run: &mut ReconciliationRun,
        identifier: Issn,
        linking_identifier: Issn,
        summary: &mut ReconcileSummary,
    ) {
        let row = StagedMapping {
            identifier,
            linking_identifier,
            is_active: true,
        };
        if run.staging.insert(row).is_ok() {
            summary.carried_forward += 1;
        }
    }

    async fn apply_decision(
        &self,
        run: &mut ReconciliationRun,
        store: &dyn IdentityStore,
        identifier: Issn,
        decision: Disambiguation,
        summary: &mut ReconcileSummary,
    ) {
        match decision {
            Disambiguation::SelfMapped(issn) => {
                self.stage(run, issn, issn, summary);
                info!(identifier = %issn, "synthesized self-mapped row");
            }
            Disambiguation::Graft {
                identifier,
                linking_identifier,
            } => {
                self.stage(run, identifier, linking_identifier, summary);
                info!(
                    identifier = %identifier,
                    linking_identifier = %linking_identifier,
                    "synthesized row on existing group"
                );
            }
            Disambiguation::ElectronicPrint { electronic, print } => {
                for candidate in [electronic, print] {
                    let taken = if run.staging.contains(candidate) {
                        true
                    } else {
                        match store.mapping_for(candidate).await {
                            Ok(found) => found.is_some(),
                            Err(e) => {
                                warn!(
                                    identifier = %identifier,
                                    candidate = %candidate,
                                    error = %e,
                                    "canonical lookup failed, skipping"
                                );
                                summary.skip(SkipReason::LookupFailed);
                                return;
                            }
                        }
                    };
                    if taken {
                        info!(
                            identifier = %identifier,
                            conflicting = %candidate,
                            "electronic/print pair already mapped, skipping"
                        );
                        summary.skip(SkipReason::AlreadyMapped);
                        return;
                    }
                }
                self.stage(run, electronic, electronic, summary);
                self.stage(run, print, electronic, summary);
                info!(electronic = %electronic, print = %print, "synthesized electronic/print group");
            }
            Disambiguation::Skip(reason) => {
                match reason {
                    SkipReason::Ambiguous => {
                        warn!(identifier = %identifier, "three or more aliases, needs manual resolution")
                    }
                    _ => info!(identifier = %identifier, ?reason, "no row synthesized"),
                }
                summary.skip(reason);
            }
        }
    }

    fn stage(
        &self,
        run: &mut ReconciliationRun,
        identifier: Issn,
        linking_identifier: Issn,
        summary: &mut ReconcileSummary,
    ) {
        let row = StagedMapping {
            identifier,
            linking_identifier,
            is_active: true,
        };
        match run.staging.insert(row) {
            Ok(()) => summary.synthesized += 1,
            Err(conflict) => {
                warn!(error = %conflict, "staging conflict, skipping");
                summary.skip(SkipReason::StagingConflict);
            }
        }
    }
}

fn distinct_aliases(aliases: &JournalAliases) -> Vec<Issn> {
    let mut distinct: Vec<Issn> = Vec::with_capacity(aliases.aliases.len());
    for alias in &aliases.aliases {
        if !distinct.contains(alias) {
            distinct.push(*alias);
        }
    }
    distinct
}

/// The alias that is not `identifier`, for two-alias responses.
fn other_alias(identifier: Issn, aliases: &JournalAliases) -> Option<Issn> {
    match distinct_aliases(aliases).as_slice() {
        [a, b] if *a == identifier => Some(*b),
        [a, b] if *b == identifier => Some(*a),
        _ => None,
    }
}

/// Pure branch selection for an identifier missing from the registry.
///
/// `other_linking` is the canonical linking identifier of the second alias
/// in a two-alias response, if it has one.
pub fn disambiguate(
    identifier: Issn,
    aliases: &JournalAliases,
    other_linking: Option<Issn>,
) -> Disambiguation {
    let distinct = distinct_aliases(aliases);
    match distinct.len() {
        0 => Disambiguation::Skip(SkipReason::NoData),
        1 => Disambiguation::SelfMapped(identifier),
        2 => {
            if !distinct.contains(&identifier) {
                return Disambiguation::Skip(SkipReason::Unrelated);
            }
            if let Some(linking_identifier) = other_linking {
                return Disambiguation::Graft {
                    identifier,
                    linking_identifier,
                };
            }
            match (aliases.electronic, aliases.print) {
                (Some(electronic), Some(print))
                    if electronic != print
                        && distinct.contains(&electronic)
                        && distinct.contains(&print) =>
                {
                    Disambiguation::ElectronicPrint { electronic, print }
                }
                _ => Disambiguation::Skip(SkipReason::Unclassified),
            }
        }
        _ => Disambiguation::Skip(SkipReason::Ambiguous),
    }
}
