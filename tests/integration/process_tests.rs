//! Process-only mode tests

use crate::common::{placement_page, Harness, TARGET_ID};
use college_harvest::crawler::RunMode;
use college_harvest::storage::{SqliteStorage, Storage};
use college_harvest::{FetchedDocument, SchemaType};
use chrono::Utc;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stores `count` distinct raw documents for the test target
fn seed_raw_documents(harness: &Harness, count: u32) -> Vec<String> {
    let mut storage = SqliteStorage::new(&harness.db_path).unwrap();
    (0..count)
        .map(|i| {
            let document = FetchedDocument::new(
                TARGET_ID,
                format!("https://college.test/placements/{}", i),
                Some("text/html"),
                placement_page(20 + i, &[]).into_bytes(),
                Utc::now(),
            );
            storage.store_raw(&document).unwrap();
            document.content_hash
        })
        .collect()
}

#[tokio::test]
async fn test_process_only_makes_no_requests() {
    let site = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&site)
        .await;

    let harness = Harness::new(&site.uri(), None);
    seed_raw_documents(&harness, 4);

    let orchestrator = harness.orchestrator();
    let summary = orchestrator
        .run(RunMode::ProcessOnly, false)
        .await
        .unwrap();

    assert_eq!(summary.targets[TARGET_ID].documents(), 4);
    assert_eq!(summary.targets[TARGET_ID].succeeded, 4);

    let versions = orchestrator
        .storage()
        .with(|s| s.list_versions(TARGET_ID, SchemaType::Placement))
        .unwrap();
    assert_eq!(versions.len(), 4);
    assert_eq!(
        versions.iter().map(|v| v.version).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    let received = site.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_process_only_skips_processed_documents() {
    let site = MockServer::start().await;
    let harness = Harness::new(&site.uri(), None);
    let hashes = seed_raw_documents(&harness, 3);

    let orchestrator = harness.orchestrator();
    orchestrator.run(RunMode::ProcessOnly, false).await.unwrap();

    let idle = orchestrator.run(RunMode::ProcessOnly, false).await.unwrap();
    assert_eq!(idle.targets[TARGET_ID].documents(), 0);

    // An explicit re-run request for one document
    assert!(orchestrator
        .storage()
        .with(|s| s.mark_stale(&hashes[1]))
        .unwrap());
    let single = orchestrator.run(RunMode::ProcessOnly, false).await.unwrap();
    assert_eq!(single.targets[TARGET_ID].documents(), 1);

    let all = orchestrator.run(RunMode::ProcessOnly, true).await.unwrap();
    assert_eq!(all.targets[TARGET_ID].documents(), 3);

    let versions = orchestrator
        .storage()
        .with(|s| s.list_versions(TARGET_ID, SchemaType::Placement))
        .unwrap();
    assert_eq!(versions.len(), 7);
}

#[tokio::test]
async fn test_runs_are_recorded() {
    let site = MockServer::start().await;
    let harness = Harness::new(&site.uri(), None);
    seed_raw_documents(&harness, 1);

    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run(RunMode::ProcessOnly, false).await.unwrap();

    let run = orchestrator
        .storage()
        .with(|s| s.get_run(summary.run_id))
        .unwrap();
    assert_eq!(run.mode, "process-only");
    assert_eq!(run.config_hash, "test-config");
    assert!(run.finished_at.is_some());
}
