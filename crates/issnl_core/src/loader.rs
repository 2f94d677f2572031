//! Bulk loader: registry snapshot → staging.

use tracing::{info, warn};

use crate::error::IdentityError;
use crate::ports::{RegistrySource, Result};
use crate::run::ReconciliationRun;
use crate::types::StagedMapping;

/// A healthy registry snapshot carries well over two million rows.
pub const DEFAULT_MINIMUM_RECORDS: usize = 2_000_000;

#[derive(Debug, Clone)]
pub struct BulkLoader {
    minimum_records: usize,
}

impl BulkLoader {
    pub fn new(minimum_records: usize) -> Self {
        Self { minimum_records }
    }

    pub fn minimum_records(&self) -> usize {
        self.minimum_records
    }

    /// Replace the run's staging with the current registry snapshot.
    ///
    /// A snapshot smaller than the threshold leaves staging empty and fails
    /// with `InsufficientRecords`, before anything canonical is touched.
    pub async fn load(
        &self,
        run: &mut ReconciliationRun,
        source: &dyn RegistrySource,
    ) -> Result<usize> {
        run.staging.clear();

        let pairs = source.fetch_registry().await?;
        run.staging.reserve(pairs.len());

        let mut duplicates = 0usize;
        for pair in pairs {
            let row = StagedMapping {
                identifier: pair.identifier,
                linking_identifier: pair.linking_identifier,
                is_active: false,
            };
            if run.staging.insert_loaded(row).is_err() {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(
                run_id = %run.id,
                duplicates,
                "registry snapshot repeats identifiers, kept first occurrence"
            );
        }

        let loaded = run.staging.len();
        if loaded < self.minimum_records {
            run.staging.clear();
            warn!(
                run_id = %run.id,
                loaded,
                minimum = self.minimum_records,
                "registry snapshot too small, aborting run"
            );
            return Err(IdentityError::InsufficientRecords {
                loaded,
                minimum: self.minimum_records,
            });
        }

        info!(run_id = %run.id, loaded, "registry snapshot staged");
        Ok(loaded)
    }
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MINIMUM_RECORDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Issn, MappingPair};
    use async_trait::async_trait;

    struct FixedRegistry(Vec<MappingPair>);

    #[async_trait]
    impl RegistrySource for FixedRegistry {
        async fn fetch_registry(&self) -> Result<Vec<MappingPair>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenRegistry;

    #[async_trait]
    impl RegistrySource for BrokenRegistry {
        async fn fetch_registry(&self) -> Result<Vec<MappingPair>> {
            Err(IdentityError::Download("connection reset".into()))
        }
    }

    fn pair(identifier: &str, linking: &str) -> MappingPair {
        MappingPair::new(
            identifier.parse::<Issn>().unwrap(),
            linking.parse::<Issn>().unwrap(),
        )
    }

    #[tokio::test]
    async fn loads_rows_inactive() {
        let source = FixedRegistry(vec![
            pair("0000-0019", "0000-0019"),
            pair("0000-0051", "0000-0019"),
        ]);
        let mut run = ReconciliationRun::new();
        let loaded = BulkLoader::new(2).load(&mut run, &source).await.unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(run.staging.active_count(), 0);
        assert!(run.staging.is_loaded_group("0000-0019".parse().unwrap()));
    }

    #[tokio::test]
    async fn too_few_rows_clears_staging_and_aborts() {
        let source = FixedRegistry(vec![pair("0000-0019", "0000-0019")]);
        let mut run = ReconciliationRun::new();
        let err = BulkLoader::new(2).load(&mut run, &source).await.unwrap_err();
        assert!(matches!(
            err,
            IdentityError::InsufficientRecords {
                loaded: 1,
                minimum: 2
            }
        ));
        assert!(run.staging.is_empty());
    }

    #[tokio::test]
    async fn reload_replaces_previous_contents() {
        let mut run = ReconciliationRun::new();
        let first = FixedRegistry(vec![pair("0000-0043", "0000-0043")]);
        BulkLoader::new(1).load(&mut run, &first).await.unwrap();

        let second = FixedRegistry(vec![pair("0000-0019", "0000-0019")]);
        BulkLoader::new(1).load(&mut run, &second).await.unwrap();

        assert_eq!(run.staging.len(), 1);
        assert!(run.staging.contains("0000-0019".parse().unwrap()));
    }

    #[tokio::test]
    async fn duplicate_identifiers_keep_first_row() {
        let source = FixedRegistry(vec![
            pair("0000-0051", "0000-0019"),
            pair("0000-0051", "0000-0043"),
        ]);
        let mut run = ReconciliationRun::new();
        let loaded = BulkLoader::new(1).load(&mut run, &source).await.unwrap();
        assert_eq!(loaded, 1);
        let row = run.staging.get("0000-0051".parse().unwrap()).unwrap();
        assert_eq!(row.linking_identifier.as_str(), "0000-0019");
    }

    #[tokio::test]
    async fn download_failure_propagates() {
        let mut run = ReconciliationRun::new();
        let err = BulkLoader::new(1)
            .load(&mut run, &BrokenRegistry)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Download(_)));
    }
}
