//! ISSN identity reconciliation core.
//!
//! Keeps the identifier → linking identifier graph current by reconciling
//! the registry snapshot with the citation-index dataset, and exposes the
//! resolver and operator corrections built on it.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ BulkLoader   │──▶│ Reconciler   │──▶│ DiffEngine  │──▶│ Metadata     │
//! │ (registry →  │   │ (crossref →  │   │ (staging vs │   │ Builder      │
//! │  staging)    │   │  is_active)  │   │  canonical) │   │ (aliases)    │
//! └──────────────┘   └──────────────┘   └─────────────┘   └──────────────┘
//!                                                                │
//!                          IdentityResolver / Mutators ◀─────────┘
//! ```
//!
//! Persistence and HTTP live behind the traits in [`ports`]; this crate has
//! no database or network dependency. [`memory::MemoryStore`] implements
//! every store port for tests and dry runs.

pub mod diff;
pub mod enrichment;
pub mod error;
pub mod loader;
pub mod memory;
pub mod metadata;
pub mod mutators;
pub mod payload;
pub mod pipeline;
pub mod ports;
pub mod reconcile;
pub mod resolver;
pub mod run;
pub mod types;

pub use diff::{plan_diff, DiffEngine, DiffSummary, IgnoreList, MappingDiff};
pub use enrichment::{EnrichmentService, EnrichmentSummary, EnrichmentUpdate};
pub use error::IdentityError;
pub use loader::{BulkLoader, DEFAULT_MINIMUM_RECORDS};
pub use memory::MemoryStore;
pub use metadata::{aggregate_registry_aliases, MetadataBuilder};
pub use mutators::{IdentityGraphMutators, MergePlan, MovePlan, SupersedeOutcome, SupersedeReport};
pub use pipeline::{ReconciliationPipeline, RunReport};
pub use ports::{
    CrossrefSource, DescriptionSource, GraphCounts, IdentityGraphStore, IdentityStore,
    JournalStore, MappingStore, MetadataStore, PendingRequestStore, RegistrySource, Result,
    RunLock,
};
pub use reconcile::{Disambiguation, ReconcileSummary, Reconciler, SkipReason};
pub use resolver::{IdentityResolver, ResolvedVia};
pub use run::{ReconciliationRun, StagingArea};
pub use types::*;
