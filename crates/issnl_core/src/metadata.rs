//! Canonical metadata builder.

use std::collections::BTreeMap;

use tracing::info;

use crate::ports::{MappingStore, MetadataStore, Result};
use crate::types::{CanonicalMapping, Issn};

/// Group active mappings by linking identifier. Members are ordered by
/// insertion time, then identifier; groups by linking identifier.
pub fn aggregate_registry_aliases(mappings: &[CanonicalMapping]) -> Vec<(Issn, Vec<Issn>)> {
    let mut groups: BTreeMap<Issn, Vec<&CanonicalMapping>> = BTreeMap::new();
    for mapping in mappings.iter().filter(|m| m.is_active) {
        groups
            .entry(mapping.linking_identifier)
            .or_default()
            .push(mapping);
    }
    groups
        .into_iter()
        .map(|(linking, mut members)| {
            members.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then(a.identifier.cmp(&b.identifier))
            });
            let mut aliases: Vec<Issn> = Vec::with_capacity(members.len());
            for m in members {
                if !aliases.contains(&m.identifier) {
                    aliases.push(m.identifier);
                }
            }
            (linking, aliases)
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder;

impl MetadataBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Re-aggregate every group. Only the registry alias list of existing
    /// rows is replaced. Returns rows written.
    pub async fn rebuild<S>(&self, store: &S) -> Result<u64>
    where
        S: MappingStore + MetadataStore + ?Sized,
    {
        let mappings = store.active_mappings().await?;
        let groups = aggregate_registry_aliases(&mappings);
        let written = store.upsert_registry_aliases(&groups).await?;
        info!(groups = groups.len(), written, "canonical metadata rebuilt");
        Ok(written)
    }
}
