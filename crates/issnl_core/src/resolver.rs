//! Identity resolver: any known identifier → canonical journal.

use serde::Serialize;
use tracing::debug;

use crate::ports::{JournalStore, MetadataStore, Result};
use crate::types::{CanonicalMetadata, Issn, Journal};

/// Which lookup matched during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedVia {
    Direct,
    RegistryAlias,
    CrossrefAlias,
}

pub struct IdentityResolver<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> IdentityResolver<'a, S>
where
    S: JournalStore + MetadataStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// The journal for `identifier`, or `None` when nothing matches.
    pub async fn resolve(&self, identifier: Issn) -> Result<Option<Journal>> {
        Ok(self.resolve_traced(identifier).await?.map(|(j, _)| j))
    }

    /// Like [`resolve`](Self::resolve) for unvalidated input. A malformed
    /// identifier is simply unknown.
    pub async fn resolve_str(&self, raw: &str) -> Result<Option<Journal>> {
        match Issn::parse(raw) {
            Ok(identifier) => self.resolve(identifier).await,
            Err(_) => Ok(None),
        }
    }

    /// Resolution order: journal keyed by the identifier, then the group
    /// whose registry aliases contain it, then the first group whose
    /// crossref aliases contain it. The first metadata match decides.
    pub async fn resolve_traced(&self, identifier: Issn) -> Result<Option<(Journal, ResolvedVia)>> {
        if let Some(journal) = self.store.journal(identifier).await? {
            return Ok(Some((journal, ResolvedVia::Direct)));
        }

        if let Some(meta) = self.store.find_by_registry_alias(identifier).await? {
            return self.journal_for(meta, ResolvedVia::RegistryAlias).await;
        }

        if let Some(meta) = self
            .store
            .find_by_crossref_alias(identifier)
            .await?
            .into_iter()
            .next()
        {
            return self.journal_for(meta, ResolvedVia::CrossrefAlias).await;
        }

        debug!(identifier = %identifier, "identifier not resolved");
        Ok(None)
    }

    async fn journal_for(
        &self,
        meta: CanonicalMetadata,
        via: ResolvedVia,
    ) -> Result<Option<(Journal, ResolvedVia)>> {
        Ok(self
            .store
            .journal(meta.linking_identifier)
            .await?
            .map(|j| (j, via)))
    }
}
