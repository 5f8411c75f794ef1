//! End-to-end crawl tests

use crate::common::{placement_page, Harness, TARGET_ID};
use college_harvest::crawler::RunMode;
use college_harvest::fusion::RecordStatus;
use college_harvest::storage::RunStatus;
use college_harvest::SchemaType;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: impl Into<Vec<u8>>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}

#[tokio::test]
async fn test_crawl_isolates_malformed_pdf() {
    let site = MockServer::start().await;

    let mut links: Vec<String> = (1..=8).map(|i| format!("/p{}", i)).collect();
    links.push("/brochure.pdf".to_string());
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(placement_page(10, &link_refs)))
        .mount(&site)
        .await;

    for i in 1..=8u32 {
        Mock::given(method("GET"))
            .and(path(format!("/p{}", i)))
            .respond_with(html(placement_page(10 + i, &[])))
            .mount(&site)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/brochure.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"%PDF-1.4\n%\xe2\xe3\n1 0 obj <</Type /Cat".to_vec(), "application/pdf"),
        )
        .mount(&site)
        .await;

    let harness = Harness::new(&site.uri(), None);
    let summary = harness
        .orchestrator()
        .run(RunMode::Crawl, false)
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let counts = summary.targets[TARGET_ID];
    assert_eq!(counts.succeeded, 9);
    assert_eq!(counts.partial + counts.failed, 1);
    assert_eq!(counts.fetch_failures, 0);
}

#[tokio::test]
async fn test_crawl_with_models() {
    let site = MockServer::start().await;
    let models = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            "<html><body><h1>Training and Placement Cell</h1>\
             <p>Our placement drive saw record offers this year from leading firms.</p>\
             </body></html>",
        ))
        .mount(&site)
        .await;

    Mock::given(method("POST"))
        .and(path("/classify/document"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "classification": {"class": "placement", "confidence": 0.92}
        })))
        .mount(&models)
        .await;

    Mock::given(method("POST"))
        .and(path("/extract/entities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entities": [{"label": "ORG", "text": "Google", "score": 0.9}]
        })))
        .mount(&models)
        .await;

    Mock::given(method("POST"))
        .and(path("/answer/question"))
        .and(body_partial_json(serde_json::json!({
            "question": "What is the median package offered in placements?"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"answer": "INR 9 LPA", "score": 0.88}
        })))
        .mount(&models)
        .await;

    Mock::given(method("POST"))
        .and(path("/answer/question"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"answer": "", "score": 0.0}
        })))
        .mount(&models)
        .await;

    let harness = Harness::new(&site.uri(), Some(&models.uri()));
    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run(RunMode::Crawl, false).await.unwrap();
    assert_eq!(summary.targets[TARGET_ID].succeeded, 1);

    let record = orchestrator
        .storage()
        .with(|s| s.get_latest(TARGET_ID, SchemaType::Placement))
        .unwrap()
        .expect("placement record stored");

    assert_eq!(record.version, 1);
    assert_eq!(record.status, RecordStatus::Complete);
    assert_eq!(record.value("median_package"), Some("INR 9 LPA"));
    assert!(record.value("recruiters").unwrap().contains("Google"));
    assert_eq!(requests_to(&models, "/extract/ocr").await, 0);
}

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let site = MockServer::start().await;
    let duplicate = placement_page(25, &[]);

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(placement_page(12, &["/a", "/b"])))
        .mount(&site)
        .await;
    for page in ["/a", "/b"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(html(duplicate.clone()))
            .mount(&site)
            .await;
    }

    let harness = Harness::new(&site.uri(), None);
    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run(RunMode::Crawl, false).await.unwrap();

    let counts = summary.targets[TARGET_ID];
    assert_eq!(counts.succeeded, 2);
    assert_eq!(counts.unchanged, 1);

    let stored = orchestrator.storage().with(|s| s.target_counts()).unwrap();
    assert_eq!(stored[TARGET_ID].raw_documents, 2);
    assert_eq!(stored[TARGET_ID].unprocessed, 0);
}

#[tokio::test]
async fn test_retryable_failures_are_retried() {
    let site = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(placement_page(18, &[])))
        .mount(&site)
        .await;

    let harness = Harness::new(&site.uri(), None);
    let summary = harness
        .orchestrator()
        .run(RunMode::Crawl, false)
        .await
        .unwrap();

    assert_eq!(requests_to(&site, "/").await, 3);
    assert_eq!(summary.targets[TARGET_ID].succeeded, 1);
    assert_eq!(summary.targets[TARGET_ID].fetch_failures, 0);
}

#[tokio::test]
async fn test_permanent_failure_does_not_fail_run() {
    let site = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;

    let harness = Harness::new(&site.uri(), None);
    let summary = harness
        .orchestrator()
        .run(RunMode::Crawl, false)
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(requests_to(&site, "/").await, 1);
    assert_eq!(summary.targets[TARGET_ID].fetch_failures, 1);
    assert!(!summary.is_clean());
}

#[tokio::test]
async fn test_robots_disallow_is_honored() {
    let site = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("User-agent: *\nDisallow: /private\n", "text/plain"),
        )
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(placement_page(14, &["/private", "/open"])))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/open"))
        .respond_with(html(placement_page(15, &[])))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html(placement_page(16, &[])))
        .expect(0)
        .mount(&site)
        .await;

    let harness = Harness::new(&site.uri(), None);
    let summary = harness
        .orchestrator()
        .run(RunMode::Crawl, false)
        .await
        .unwrap();

    let counts = summary.targets[TARGET_ID];
    assert_eq!(counts.succeeded, 2);
    assert_eq!(counts.skipped, 1);
}

#[tokio::test]
async fn test_finished_run_leaves_nothing_to_resume() {
    let site = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(placement_page(20, &[])))
        .mount(&site)
        .await;

    let harness = Harness::new(&site.uri(), None);
    let orchestrator = harness.orchestrator();
    orchestrator.run(RunMode::Crawl, false).await.unwrap();

    let resumable = orchestrator
        .storage()
        .with(|s| s.load_resumable_tasks(None))
        .unwrap();
    assert!(resumable.is_empty());
}
