use chrono::{TimeZone, Utc};
use integrity_common::config::RouterConfig;
use integrity_common::connector::{Capabilities, Capability, SourceConnector};
use integrity_common::errors::AppError;
use integrity_common::models::{BackendId, DocumentId, DocumentRef, SearchFilters, SearchQuery, SourceKind, Version};
use integrity_common::resilience::{BackendPool, RetryPolicy};
use integrity_search::{BackendRegistry, MockConnector, SearchRouter};
use std::sync::Arc;
use std::time::Duration;

fn doc(id: &str, name: &str, day: u32, parties: &[&str]) -> DocumentRef {
    let ts = Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap();
    DocumentRef {
        id: DocumentId::new("any", id),
        name: name.to_string(),
        content_type: "text/plain".to_string(),
        version: Version(1),
        created_at: ts,
        modified_at: ts,
        source: SourceKind::Synced,
        categories: vec!["IDD".to_string()],
        parties: parties.iter().map(|p| p.to_string()).collect(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

fn router(backends: Vec<(Arc<MockConnector>, u32)>, timeout_ms: u64) -> SearchRouter {
    let mut registry = BackendRegistry::new();
    for (mock, priority) in backends {
        let id = mock.id().to_string();
        registry.register(mock, BackendPool::new(id, 4, None, Duration::from_secs(5)), priority);
    }
    let config = RouterConfig {
        top_k: 20,
        per_backend_limit: 25,
        backend_timeout_ms: timeout_ms,
        min_score: 0.0,
    };
    SearchRouter::new(registry, config, fast_retry())
}

#[tokio::test]
async fn test_merges_and_dedups_across_backends() {
    let live = Arc::new(
        MockConnector::new("livelink", SourceKind::RealTime)
            .with_document(doc("1001", "Acme Corp IDD.pdf", 10, &["Acme Corp"]), "Acme Corp was screened."),
    );
    let index = Arc::new(
        MockConnector::new("index", SourceKind::Synced)
            .with_document(doc("1001", "Acme Corp IDD", 10, &["Acme Corp"]), "Acme Corp was screened.")
            .with_document(doc("2002", "Acme follow-up", 12, &["Acme Corp"]), "Acme follow-up note."),
    );

    let result = router(vec![(live, 0), (index, 10)], 1000)
        .route(&SearchQuery::new("Acme", 20))
        .await
        .unwrap();

    assert!(!result.partial);
    assert_eq!(result.hits.len(), 2);
    // newest first
    assert_eq!(result.hits[0].document.id, DocumentId::new("index", "2002"));
    // the duplicate survives as the real-time copy
    assert_eq!(result.hits[1].backend, BackendId::new("livelink"));
}

#[tokio::test]
async fn test_slow_backend_is_excluded_and_flagged() {
    let fast = Arc::new(
        MockConnector::new("index", SourceKind::Synced).with_document(doc("1", "Acme memo", 1, &[]), "Acme"),
    );
    let slow = Arc::new(
        MockConnector::new("livelink", SourceKind::RealTime)
            .with_document(doc("2", "Acme report", 2, &[]), "Acme")
            .with_delay(Duration::from_secs(2)),
    );

    let result = router(vec![(fast, 1), (slow, 0)], 100)
        .route(&SearchQuery::new("acme", 20))
        .await
        .unwrap();

    assert!(result.partial);
    assert_eq!(result.excluded_backends.len(), 1);
    assert_eq!(result.excluded_backends[0].backend, BackendId::new("livelink"));
    assert_eq!(result.hits.len(), 1);
}

#[tokio::test]
async fn test_transient_search_failures_are_retried() {
    let flaky = Arc::new(
        MockConnector::new("index", SourceKind::Synced)
            .with_document(doc("1", "Acme memo", 1, &[]), "Acme")
            .fail_searches(vec![
                AppError::unavailable("index", "503"),
                AppError::unavailable("index", "503"),
            ]),
    );
    let result = router(vec![(flaky.clone(), 0)], 1000)
        .route(&SearchQuery::new("acme", 20))
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 1);
    assert_eq!(flaky.search_calls(), 3);
}

#[tokio::test]
async fn test_forbidden_backend_surfaces_warning() {
    let open = Arc::new(
        MockConnector::new("index", SourceKind::Synced).with_document(doc("1", "Acme memo", 1, &[]), "Acme"),
    );
    let locked = Arc::new(MockConnector::new("livelink", SourceKind::RealTime).denying_access());

    let result = router(vec![(open, 1), (locked.clone(), 0)], 1000)
        .route(&SearchQuery::new("acme", 20))
        .await
        .unwrap();

    assert!(result.partial);
    assert!(result.warnings.iter().any(|w| w.contains("Access denied by backend livelink")));
    // Forbidden is never retried
    assert_eq!(locked.search_calls(), 1);
}

#[tokio::test]
async fn test_all_backends_failing_returns_error() {
    let locked = Arc::new(MockConnector::new("livelink", SourceKind::RealTime).denying_access());
    let down = Arc::new(MockConnector::new("index", SourceKind::Synced).fail_searches(vec![
        AppError::unavailable("index", "down"),
        AppError::unavailable("index", "down"),
        AppError::unavailable("index", "down"),
    ]));

    let err = router(vec![(down, 1), (locked, 0)], 1000)
        .route(&SearchQuery::new("acme", 20))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden { .. }));
}

#[tokio::test]
async fn test_category_filter_degrades_with_warning() {
    let no_categories = Arc::new(
        MockConnector::new("legacy", SourceKind::Synced)
            .with_capabilities(Capabilities::of(&[Capability::FullTextSearch]))
            .with_document(
                DocumentRef {
                    categories: vec![],
                    ..doc("1", "Acme memo", 1, &[])
                },
                "Acme",
            ),
    );

    let query = SearchQuery::new("acme", 20).with_filters(SearchFilters {
        categories: vec!["IDD".into()],
        ..Default::default()
    });
    let result = router(vec![(no_categories, 0)], 1000).route(&query).await.unwrap();

    assert_eq!(result.hits.len(), 1);
    assert!(result.warnings.iter().any(|w| w.contains("category filter ignored")));
}

#[tokio::test]
async fn test_backend_without_search_is_skipped() {
    let searchable = Arc::new(
        MockConnector::new("index", SourceKind::Synced).with_document(doc("1", "Acme memo", 1, &[]), "Acme"),
    );
    let fetch_only = Arc::new(
        MockConnector::new("archive", SourceKind::RealTime).with_capabilities(Capabilities::of(&[Capability::VersionListing])),
    );
    let result = router(vec![(searchable, 0), (fetch_only.clone(), 1)], 1000)
        .route(&SearchQuery::new("acme", 20))
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 1);
    assert_eq!(fetch_only.search_calls(), 0);
}

#[tokio::test]
async fn test_top_k_caps_results() {
    let mut mock = MockConnector::new("index", SourceKind::Synced);
    for i in 1..=9 {
        mock = mock.with_document(doc(&i.to_string(), &format!("Acme memo {}", i), i, &[]), "Acme");
    }
    let result = router(vec![(Arc::new(mock), 0)], 1000)
        .route(&SearchQuery::new("acme", 3))
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 3);
    assert_eq!(result.total_count, 9);
    assert_eq!(result.hits[0].document.id.id, "9");
}
