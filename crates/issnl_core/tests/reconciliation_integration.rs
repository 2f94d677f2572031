//! End-to-end reconciliation against the in-memory store.

mod helpers;

use std::sync::Arc;

use helpers::{issn, pair, FakeCrossref, FakeRegistry};
use issnl_core::{
    DiffEngine, GraphCounts, HistoryStatus, IdentityError, IgnoreList, MappingStore,
    MemoryStore, PendingRequestStore, ReconciliationPipeline, ReconciliationRun, Reconciler,
    RunLock, SkipReason, StagedMapping, PENDING_STATUS_PROCESS,
};

fn registry() -> FakeRegistry {
    FakeRegistry(vec![
        pair("0000-0019", "0000-0019"),
        pair("0000-0051", "0000-0019"),
        pair("0000-0043", "0000-0043"),
        pair("0000-0027", "0000-0027"),
    ])
}

fn pipeline(store: &MemoryStore, crossref: Arc<FakeCrossref>) -> ReconciliationPipeline {
    ReconciliationPipeline::new(Arc::new(store.clone()), Arc::new(registry()), crossref)
        .with_minimum_records(1)
}

fn active(identifier: &str, linking: &str) -> StagedMapping {
    StagedMapping {
        identifier: issn(identifier),
        linking_identifier: issn(linking),
        is_active: true,
    }
}

#[tokio::test]
async fn test_second_run_with_unchanged_sources_writes_nothing() {
    let store = MemoryStore::new();
    let crossref = Arc::new(
        FakeCrossref::with_known(&["0000-0051", "0000-0043", "1111-1111", "not-an-issn"])
            .alias("1111-1111", &["1111-1111"], None, None),
    );
    let pipeline = pipeline(&store, crossref.clone());

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.loaded, 4);
    assert_eq!(first.diff.added, 4);
    assert_eq!(first.diff.removed, 0);
    assert_eq!(
        first.counts,
        GraphCounts {
            mappings: 4,
            history: 4,
            metadata: 3
        }
    );
    assert_eq!(first.reconcile.skipped[&SkipReason::InvalidIdentifier], 1);

    let second = pipeline.run().await.unwrap();
    assert_eq!(second.diff.added, 0);
    assert_eq!(second.diff.removed, 0);
    assert_eq!(second.counts, first.counts);
    assert_eq!(second.reconcile.carried_forward, 1);
    // The synthesized group is carried forward, not looked up again.
    assert_eq!(crossref.lookup_count(), 1);

    // Inactive registry groups never reach the canonical table.
    assert!(store.mapping_for(issn("0000-0027")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_apply_adds_new_member_with_one_history_row() {
    let store = MemoryStore::new();
    store.seed_mappings(&[pair("0000-0019", "0000-0019")]).await;

    let mut run = ReconciliationRun::new();
    run.staging.insert(active("0000-0019", "0000-0019")).unwrap();
    run.staging.insert(active("0000-0051", "0000-0019")).unwrap();

    let summary = DiffEngine::new(IgnoreList::empty())
        .apply(&run, &store)
        .await
        .unwrap();
    assert_eq!(summary.added, 1);

    let group = store.mappings_for_linking(issn("0000-0019")).await.unwrap();
    assert_eq!(group.len(), 2);

    let history = store.all_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].linking_identifier, issn("0000-0019"));
    assert_eq!(history[0].identifier, issn("0000-0051"));
    assert_eq!(history[0].status, HistoryStatus::Added);
}

#[tokio::test]
async fn test_removal_is_recorded_once_and_mapping_kept() {
    let store = MemoryStore::new();
    store
        .seed_mappings(&[pair("0000-0019", "0000-0019"), pair("0000-0051", "0000-0019")])
        .await;

    let mut run = ReconciliationRun::new();
    run.staging.insert(active("0000-0019", "0000-0019")).unwrap();

    let engine = DiffEngine::new(IgnoreList::empty());
    let first = engine.apply(&run, &store).await.unwrap();
    let second = engine.apply(&run, &store).await.unwrap();
    assert_eq!(first.removed, 1);
    assert_eq!(second.removed, 0);

    let kept = store.mapping_for(issn("0000-0051")).await.unwrap().unwrap();
    assert_eq!(kept.linking_identifier, issn("0000-0019"));

    let removed: Vec<_> = store
        .history_for(issn("0000-0051"))
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.status == HistoryStatus::Removed)
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].linking_identifier, issn("0000-0019"));
}

#[tokio::test]
async fn test_ignored_identifier_is_not_promoted() {
    let store = MemoryStore::new();
    let mut run = ReconciliationRun::new();
    run.staging.insert(active("1931-3756", "1931-3756")).unwrap();

    let summary = DiffEngine::default().apply(&run, &store).await.unwrap();
    assert_eq!(summary.added, 0);
    assert_eq!(summary.ignored, 1);
    assert!(store.mapping_for(issn("1931-3756")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_disambiguation_branches() {
    let store = MemoryStore::new();
    store.seed_mappings(&[pair("0000-0043", "0000-0043")]).await;

    let crossref = FakeCrossref::with_known(&["1111-1111", "2222-2222", "3333-3333", "4444-4444"])
        .alias("1111-1111", &["1111-1111"], None, None)
        .alias("2222-2222", &["2222-2222", "0000-0043"], None, None)
        .alias("3333-3333", &["3333-3333", "5555-5555", "6666-6666"], None, None)
        .alias(
            "4444-4444",
            &["7777-7777", "4444-4444"],
            Some("7777-7777"),
            Some("4444-4444"),
        );

    let mut run = ReconciliationRun::new();
    let summary = Reconciler::new()
        .reconcile(&mut run, &store, &crossref)
        .await
        .unwrap();

    assert_eq!(run.staging.get(issn("1111-1111")), Some(&active("1111-1111", "1111-1111")));
    assert_eq!(run.staging.get(issn("2222-2222")), Some(&active("2222-2222", "0000-0043")));
    assert!(!run.staging.contains(issn("3333-3333")));
    assert_eq!(run.staging.get(issn("7777-7777")), Some(&active("7777-7777", "7777-7777")));
    assert_eq!(run.staging.get(issn("4444-4444")), Some(&active("4444-4444", "7777-7777")));

    assert_eq!(summary.synthesized, 4);
    assert_eq!(summary.skipped[&SkipReason::Ambiguous], 1);
}

#[tokio::test]
async fn test_member_dropped_by_both_sources_is_recorded_removed() {
    let store = MemoryStore::new();
    store
        .seed_mappings(&[
            pair("0000-0019", "0000-0019"),
            pair("0000-0051", "0000-0019"),
            pair("0000-0043", "0000-0019"),
        ])
        .await;
    let registry = FakeRegistry(vec![
        pair("0000-0019", "0000-0019"),
        pair("0000-0027", "0000-0027"),
    ]);
    let crossref = Arc::new(FakeCrossref::with_known(&["0000-0019", "0000-0043"]));

    let report = ReconciliationPipeline::new(Arc::new(store.clone()), Arc::new(registry), crossref.clone())
        .with_minimum_records(1)
        .run()
        .await
        .unwrap();

    // Only 0000-0043's own pair comes back; its group is in the snapshot.
    assert_eq!(report.reconcile.carried_forward, 1);
    assert_eq!(report.diff.removed, 1);
    assert_eq!(crossref.lookup_count(), 0);

    let removed: Vec<_> = store
        .history_for(issn("0000-0051"))
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.status == HistoryStatus::Removed)
        .collect();
    assert_eq!(removed.len(), 1);
    assert!(store
        .history_for(issn("0000-0043"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_group_missing_from_snapshot_is_carried_whole() {
    let store = MemoryStore::new();
    store
        .seed_mappings(&[pair("7777-7777", "7777-7777"), pair("4444-4444", "7777-7777")])
        .await;
    let crossref = Arc::new(FakeCrossref::with_known(&["7777-7777"]));

    let report = pipeline(&store, crossref.clone()).run().await.unwrap();
    assert_eq!(report.reconcile.carried_forward, 2);
    assert_eq!(report.diff.removed, 0);
    assert_eq!(crossref.lookup_count(), 0);
}

#[tokio::test]
async fn test_staged_electronic_identifier_blocks_minting() {
    let store = MemoryStore::new();
    let crossref = FakeCrossref::with_known(&["4444-4444"]).alias(
        "4444-4444",
        &["7777-7777", "4444-4444"],
        Some("7777-7777"),
        Some("4444-4444"),
    );

    let mut run = ReconciliationRun::new();
    run.staging
        .insert_loaded(StagedMapping { is_active: false, ..active("7777-7777", "8888-8888") })
        .unwrap();

    let summary = Reconciler::new()
        .reconcile(&mut run, &store, &crossref)
        .await
        .unwrap();
    assert!(!run.staging.contains(issn("4444-4444")));
    assert!(!run.staging.get(issn("7777-7777")).unwrap().is_active);
    assert_eq!(run.staging.len(), 1);
    assert_eq!(summary.synthesized, 0);
    assert_eq!(summary.skipped[&SkipReason::AlreadyMapped], 1);
}

#[tokio::test]
async fn test_registry_group_is_activated_as_a_whole() {
    let store = MemoryStore::new();
    let crossref = FakeCrossref::with_known(&["0000-0051"]);

    let mut run = ReconciliationRun::new();
    run.staging
        .insert(StagedMapping { is_active: false, ..active("0000-0019", "0000-0019") })
        .unwrap();
    run.staging
        .insert(StagedMapping { is_active: false, ..active("0000-0051", "0000-0019") })
        .unwrap();

    let summary = Reconciler::new()
        .reconcile(&mut run, &store, &crossref)
        .await
        .unwrap();
    assert_eq!(summary.activated, 2);
    assert_eq!(run.staging.active_count(), 2);
    assert!(run.crossref_known.contains(&issn("0000-0051")));
    assert_eq!(crossref.lookup_count(), 0);
}

#[tokio::test]
async fn test_pending_requests_are_consumed_once_even_on_failure() {
    let store = MemoryStore::new();
    store.push_pending("2222-2222", PENDING_STATUS_PROCESS).await;
    store.push_pending("garbage", PENDING_STATUS_PROCESS).await;
    store.push_pending("3333-3333", "review").await;

    let crossref = Arc::new(FakeCrossref::with_known(&["0000-0043"]).failing("2222-2222"));
    let pipeline = pipeline(&store, crossref.clone());

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.reconcile.pending_consumed, 2);
    assert_eq!(first.reconcile.skipped[&SkipReason::LookupFailed], 1);
    assert!(store.unprocessed_requests().await.unwrap().is_empty());

    let second = pipeline.run().await.unwrap();
    assert_eq!(second.reconcile.pending_consumed, 0);
    assert_eq!(crossref.lookup_count(), 1);

    let untouched = store
        .all_pending()
        .await
        .into_iter()
        .find(|r| r.identifier == "3333-3333")
        .unwrap();
    assert!(!untouched.processed);
}

#[tokio::test]
async fn test_small_snapshot_aborts_before_canonical_writes() {
    let store = MemoryStore::new();
    store.seed_mappings(&[pair("0000-0019", "0000-0019")]).await;
    let crossref = Arc::new(FakeCrossref::with_known(&["0000-0043"]));
    let pipeline = pipeline(&store, crossref).with_minimum_records(2_000_000);

    let before = store.snapshot().await;
    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(
        err,
        IdentityError::InsufficientRecords {
            loaded: 4,
            minimum: 2_000_000
        }
    ));
    assert_eq!(store.snapshot().await, before);

    // The lock was released on the error path.
    assert!(store.try_acquire_run_lock().await.unwrap());
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let store = MemoryStore::new();
    let crossref = Arc::new(FakeCrossref::with_known(&[]));
    let pipeline = pipeline(&store, crossref);

    assert!(store.try_acquire_run_lock().await.unwrap());
    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, IdentityError::RunInProgress));

    store.release_run_lock().await.unwrap();
    assert!(pipeline.run().await.is_ok());
}
