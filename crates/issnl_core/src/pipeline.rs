//! Full reconciliation run: lock → load → reconcile → apply → rebuild.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::diff::{DiffEngine, DiffSummary, IgnoreList};
use crate::error::IdentityError;
use crate::loader::BulkLoader;
use crate::metadata::MetadataBuilder;
use crate::ports::{CrossrefSource, GraphCounts, IdentityStore, RegistrySource, Result};
use crate::reconcile::{ReconcileSummary, Reconciler};
use crate::run::ReconciliationRun;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub loaded: usize,
    pub reconcile: ReconcileSummary,
    pub diff: DiffSummary,
    pub metadata_written: u64,
    pub counts: GraphCounts,
}

pub struct ReconciliationPipeline {
    store: Arc<dyn IdentityStore>,
    registry: Arc<dyn RegistrySource>,
    crossref: Arc<dyn CrossrefSource>,
    loader: BulkLoader,
    reconciler: Reconciler,
    diff: DiffEngine,
    metadata: MetadataBuilder,
}

impl ReconciliationPipeline {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        registry: Arc<dyn RegistrySource>,
        crossref: Arc<dyn CrossrefSource>,
    ) -> Self {
        Self {
            store,
            registry,
            crossref,
            loader: BulkLoader::default(),
            reconciler: Reconciler::new(),
            diff: DiffEngine::default(),
            metadata: MetadataBuilder::new(),
        }
    }

    pub fn with_minimum_records(mut self, minimum_records: usize) -> Self {
        self.loader = BulkLoader::new(minimum_records);
        self
    }

    pub fn with_ignore_list(mut self, ignore: IgnoreList) -> Self {
        self.diff = DiffEngine::new(ignore);
        self
    }

    /// Run every stage under the single-flight lock. The lock is released on
    /// every exit path; staging never outlives the call.
    pub async fn run(&self) -> Result<RunReport> {
        if !self.store.try_acquire_run_lock().await? {
            return Err(IdentityError::RunInProgress);
        }

        let mut run = ReconciliationRun::new();
        info!(run_id = %run.id, "reconciliation run started");
        let outcome = self.run_stages(&mut run).await;
        run.finish();

        if let Err(e) = self.store.release_run_lock().await {
            error!(run_id = %run.id, error = %e, "failed to release run lock");
        }
        match &outcome {
            Ok(report) => info!(
                run_id = %run.id,
                added = report.diff.added,
                removed = report.diff.removed,
                "reconciliation run finished"
            ),
            Err(e) => error!(run_id = %run.id, error = %e, "reconciliation run aborted"),
        }
        outcome
    }

    async fn run_stages(&self, run: &mut ReconciliationRun) -> Result<RunReport> {
        let loaded = self.loader.load(run, self.registry.as_ref()).await?;
        let reconcile = self
            .reconciler
            .reconcile(run, self.store.as_ref(), self.crossref.as_ref())
            .await?;
        let diff = self.diff.apply(run, self.store.as_ref()).await?;
        let metadata_written = self.metadata.rebuild(self.store.as_ref()).await?;
        let counts = self.store.counts().await?;

        Ok(RunReport {
            run_id: run.id,
            started_at: run.started_at,
            finished_at: Utc::now(),
            loaded,
            reconcile,
            diff,
            metadata_written,
            counts,
        })
    }
}
