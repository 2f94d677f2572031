//! Resolver, graph mutators and enrichment against the in-memory store.

mod helpers;

use chrono::Utc;
use helpers::{issn, pair, FakeDescriptions};
use issnl_core::{
    CanonicalMetadata, EnrichmentService, IdentityError, IdentityGraphMutators, IdentityResolver,
    Journal, JournalStore, MappingStore, MemoryStore, MetadataStore, ResolvedVia,
    SupersedeOutcome,
};
use serde_json::json;

async fn seed_group(store: &MemoryStore, linking: &str, members: &[&str], title: &str) {
    let pairs: Vec<_> = members.iter().map(|m| pair(m, linking)).collect();
    store.seed_mappings(&pairs).await;
    store
        .seed_metadata(CanonicalMetadata::new(
            issn(linking),
            members.iter().map(|m| issn(m)).collect(),
        ))
        .await;
    store.seed_journal(Journal::new(issn(linking), title)).await;
}

// ── Resolver ─────────────────────────────────────────────────

#[tokio::test]
async fn test_resolver_answers_the_same_for_every_alias() {
    let store = MemoryStore::new();
    let mut meta = CanonicalMetadata::new(issn("0000-0019"), vec![issn("0000-0051"), issn("0000-0043")]);
    meta.crossref_aliases = vec![issn("0000-0051"), issn("0000-0027")];
    store.seed_metadata(meta).await;
    store.seed_journal(Journal::new(issn("0000-0019"), "Journal X")).await;

    let resolver = IdentityResolver::new(&store);
    for id in ["0000-0019", "0000-0051", "0000-0043", "0000-0027"] {
        let journal = resolver.resolve(issn(id)).await.unwrap().unwrap();
        assert_eq!(journal.linking_identifier, issn("0000-0019"), "resolving {id}");
    }

    let (_, via) = resolver.resolve_traced(issn("0000-0027")).await.unwrap().unwrap();
    assert_eq!(via, ResolvedVia::CrossrefAlias);
    let (_, via) = resolver.resolve_traced(issn("0000-0051")).await.unwrap().unwrap();
    assert_eq!(via, ResolvedVia::RegistryAlias);

    assert!(resolver.resolve(issn("9999-9999")).await.unwrap().is_none());
    assert!(resolver.resolve_str("unknown").await.unwrap().is_none());
}

// ── Merge ────────────────────────────────────────────────────

#[tokio::test]
async fn test_merge_blocked_by_priced_records_changes_nothing() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0019", &["0000-0019", "0000-0051"], "Old Title").await;
    seed_group(&store, "0000-0043", &["0000-0043"], "New Title").await;
    store.set_priced_records(issn("0000-0019"), 1).await;

    let before = store.snapshot().await;
    let err = IdentityGraphMutators::new(&store)
        .merge(issn("0000-0019"), issn("0000-0043"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IdentityError::MergeBlocked { priced_records: 1, .. }
    ));
    assert_eq!(store.snapshot().await, before);
}

#[tokio::test]
async fn test_merge_repoints_group_and_keeps_old_title() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0019", &["0000-0019", "0000-0051"], "Old Title").await;
    seed_group(&store, "0000-0043", &["0000-0043"], "New Title").await;

    let plan = IdentityGraphMutators::new(&store)
        .merge(issn("0000-0019"), issn("0000-0043"))
        .await
        .unwrap();
    assert_eq!(plan.alternate_title.as_deref(), Some("Old Title"));

    assert!(store.journal(issn("0000-0019")).await.unwrap().is_none());
    assert!(store.metadata(issn("0000-0019")).await.unwrap().is_none());
    let group = store.mappings_for_linking(issn("0000-0043")).await.unwrap();
    assert_eq!(group.len(), 3);

    let meta = store.metadata(issn("0000-0043")).await.unwrap().unwrap();
    assert_eq!(meta.previously_known_as, vec![issn("0000-0019")]);
    assert!(meta.registry_aliases.contains(&issn("0000-0051")));

    let journal = store.journal(issn("0000-0043")).await.unwrap().unwrap();
    assert_eq!(journal.alternate_titles, vec!["Old Title".to_string()]);
}

#[tokio::test]
async fn test_merge_same_title_ignoring_case_adds_no_alternate() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0019", &["0000-0019"], "annals of things").await;
    seed_group(&store, "0000-0043", &["0000-0043"], "Annals of Things").await;

    let plan = IdentityGraphMutators::new(&store)
        .merge(issn("0000-0019"), issn("0000-0043"))
        .await
        .unwrap();
    assert_eq!(plan.alternate_title, None);
}

#[tokio::test]
async fn test_merge_requires_both_journals() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0043", &["0000-0043"], "Survivor").await;
    let err = IdentityGraphMutators::new(&store)
        .merge(issn("0000-0019"), issn("0000-0043"))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::NotFound(_)));
}

// ── Move ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_move_with_dependents_needs_confirmation() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0019", &["0000-0019", "0000-0051"], "Collapsing").await;
    seed_group(&store, "0000-0043", &["0000-0043"], "Target").await;
    let mutators = IdentityGraphMutators::new(&store);

    let before = store.snapshot().await;
    let err = mutators
        .move_identifier(issn("0000-0019"), issn("0000-0043"), false)
        .await
        .unwrap_err();
    match err {
        IdentityError::ConfirmationRequired { dependents } => {
            assert_eq!(dependents, vec![issn("0000-0051")])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.snapshot().await, before);

    mutators
        .move_identifier(issn("0000-0019"), issn("0000-0043"), true)
        .await
        .unwrap();
    let moved = store.mapping_for(issn("0000-0019")).await.unwrap().unwrap();
    assert_eq!(moved.linking_identifier, issn("0000-0043"));
    assert!(store.mapping_for(issn("0000-0051")).await.unwrap().is_none());
    assert!(store.journal(issn("0000-0019")).await.unwrap().is_none());
    let meta = store.metadata(issn("0000-0043")).await.unwrap().unwrap();
    assert!(meta.registry_aliases.contains(&issn("0000-0019")));
}

#[tokio::test]
async fn test_move_to_current_group_is_a_conflict() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0043", &["0000-0043", "0000-0051"], "Target").await;
    let err = IdentityGraphMutators::new(&store)
        .move_identifier(issn("0000-0051"), issn("0000-0043"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Conflict(_)));
}

#[tokio::test]
async fn test_move_to_unknown_target_is_not_found() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0019", &["0000-0019"], "Source").await;
    let err = IdentityGraphMutators::new(&store)
        .move_identifier(issn("0000-0019"), issn("0000-0043"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::NotFound(_)));
}

// ── Supersede & retain ───────────────────────────────────────

#[tokio::test]
async fn test_supersede_only_adds() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0043", &["0000-0043", "0000-0051"], "Target").await;
    let mutators = IdentityGraphMutators::new(&store);

    let outcome = mutators
        .supersede(issn("1111-1111"), issn("0000-0051"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SupersedeOutcome::Grafted {
            linking_identifier: issn("0000-0043")
        }
    );
    let meta = store.metadata(issn("0000-0043")).await.unwrap().unwrap();
    assert!(meta.registry_aliases.contains(&issn("1111-1111")));

    assert_eq!(
        mutators
            .supersede(issn("1111-1111"), issn("0000-0043"))
            .await
            .unwrap(),
        SupersedeOutcome::AlreadyMapped
    );
    assert_eq!(
        mutators
            .supersede(issn("2222-2222"), issn("9999-9999"))
            .await
            .unwrap(),
        SupersedeOutcome::TargetUnmapped
    );
}

#[tokio::test]
async fn test_supersede_from_cancellation_notices() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0043", &["0000-0043"], "Target").await;

    let mut descriptions = FakeDescriptions::default();
    descriptions.registry.insert(
        issn("1111-1111"),
        json!({"@graph": [{"cancelledInFavorOf": ["resource/ISSN/0000-0043"]}]}),
    );
    descriptions
        .registry
        .insert(issn("2222-2222"), json!({"@graph": [{"mainTitle": "Live"}]}));

    let report = IdentityGraphMutators::new(&store)
        .supersede_from_notices(&descriptions, &[issn("1111-1111"), issn("2222-2222")])
        .await
        .unwrap();
    assert_eq!(report.grafted, vec![(issn("1111-1111"), issn("0000-0043"))]);
    assert_eq!(report.skipped, vec![issn("2222-2222")]);
}

#[tokio::test]
async fn test_retain_metadata_prunes_and_refuses_empty_list() {
    let store = MemoryStore::new();
    seed_group(&store, "0000-0019", &["0000-0019"], "Gone").await;
    seed_group(&store, "0000-0043", &["0000-0043"], "Kept").await;
    let mutators = IdentityGraphMutators::new(&store);

    assert!(matches!(
        mutators.retain_metadata(&[]).await.unwrap_err(),
        IdentityError::Conflict(_)
    ));
    assert_eq!(mutators.retain_metadata(&[issn("0000-0043")]).await.unwrap(), 1);
    assert!(store.metadata(issn("0000-0019")).await.unwrap().is_none());
    assert!(store.mapping_for(issn("0000-0019")).await.unwrap().is_some());
}

// ── Enrichment ───────────────────────────────────────────────

#[tokio::test]
async fn test_enrichment_creates_journal_and_links_identities() {
    let store = MemoryStore::new();
    store
        .upsert_registry_aliases(&[
            (issn("2291-5222"), vec![issn("2291-5222")]),
            (issn("0000-0043"), vec![issn("0000-0043")]),
        ])
        .await
        .unwrap();
    let mut descriptions = FakeDescriptions::default();
    descriptions.registry.insert(
        issn("2291-5222"),
        json!({"@graph": [{"mainTitle": "JMIR mHealth and uHealth."}]}),
    );
    descriptions.crossref.insert(
        issn("2291-5222"),
        json!({"message": {"publisher": "\"JMIR Publications Inc.\"", "ISSN": ["2291-5222"]}}),
    );
    descriptions.crossref.insert(
        issn("0000-0043"),
        json!({"message": {"title": "Cross Title", "publisher": "Wiley", "ISSN": ["0000-0043", "2291-5222"]}}),
    );

    let summary = EnrichmentService::new(1)
        .run(&store, &descriptions, None)
        .await
        .unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.journals_created, 2);

    let jmir = store.journal(issn("2291-5222")).await.unwrap().unwrap();
    assert_eq!(jmir.title, "JMIR mHealth and uHealth");
    assert_eq!(jmir.publisher.as_deref(), Some("JMIR Publications Inc."));

    let other = store.journal(issn("0000-0043")).await.unwrap().unwrap();
    assert_eq!(other.title, "Cross Title");
    assert_eq!(other.publisher.as_deref(), Some("Wiley"));

    let meta = store.metadata(issn("0000-0043")).await.unwrap().unwrap();
    assert_eq!(meta.crossref_aliases, vec![issn("0000-0043"), issn("2291-5222")]);
    assert!(meta.updated_at.is_some());
    assert!(meta.registry_payload.is_none());

    // Rows are enriched in linking-identifier order, so 0000-0043's crossref
    // aliases are stored by the time 2291-5222 is processed.
    assert_eq!(summary.links_recorded, 1);
    let links = store.linked_identities(issn("2291-5222")).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].primary, issn("2291-5222"));
    assert_eq!(links[0].secondary, issn("0000-0043"));
    assert_eq!(links[0].reason, "crossref");

    assert!(store.pending_enrichment(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enrichment_leaves_manually_titled_journals() {
    let store = MemoryStore::new();
    store
        .upsert_registry_aliases(&[(issn("0000-0019"), vec![issn("0000-0019")])])
        .await
        .unwrap();
    let mut journal = Journal::new(issn("0000-0019"), "Curated");
    journal.is_modified_title = true;
    store.seed_journal(journal).await;

    let mut descriptions = FakeDescriptions::default();
    descriptions
        .registry
        .insert(issn("0000-0019"), json!({"@graph": [{"name": "Automatic"}]}));

    let summary = EnrichmentService::default()
        .run(&store, &descriptions, None)
        .await
        .unwrap();
    assert_eq!(summary.journals_refreshed, 0);
    let journal = store.journal(issn("0000-0019")).await.unwrap().unwrap();
    assert_eq!(journal.title, "Curated");
    let meta = store.metadata(issn("0000-0019")).await.unwrap().unwrap();
    assert!(meta.registry_payload.is_some());
    assert!(meta.updated_at.unwrap() <= Utc::now());
}
