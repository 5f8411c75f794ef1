//! Fusion tests against a mock inference endpoint

use crate::common::{placement_page, test_config};
use college_harvest::crawler::RetryPolicy;
use college_harvest::extract::{CandidateBuilder, ContentRouter, ExtractorKind};
use college_harvest::fusion::{build_record, FusionEngine, HttpInferenceClient, RecordStatus};
use college_harvest::{FetchedDocument, SchemaType, TargetRegistry};
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn document(body: &str) -> FetchedDocument {
    FetchedDocument::new(
        "test-institute-of-technology",
        "https://college.test/placements",
        Some("text/html"),
        body.as_bytes().to_vec(),
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    )
}

#[test]
fn test_pdf_wins_confidence_tie_against_ocr() {
    let doc = document("<p>placements</p>");
    let ocr = CandidateBuilder::new(&doc, "ocr", ExtractorKind::Image)
        .candidate("highest_package", "INR 40 LPA", "ocr line 2", 0.9)
        .unwrap();
    let pdf = CandidateBuilder::new(&doc, "pdf", ExtractorKind::Pdf)
        .candidate("highest_package", "INR 45 LPA", "page 1 line 7", 0.9)
        .unwrap();

    for candidates in [vec![ocr.clone(), pdf.clone()], vec![pdf.clone(), ocr.clone()]] {
        let record = build_record(
            "test-institute-of-technology",
            SchemaType::Placement,
            &doc.content_hash,
            &candidates,
            0.5,
            false,
        );
        assert_eq!(record.value("highest_package"), Some("INR 45 LPA"));
        assert_eq!(record.status, RecordStatus::Complete);
    }
}

#[test]
fn test_backoff_grows_between_attempts() {
    let config = test_config("http://127.0.0.1:9", None, Path::new("unused.db"));
    let policy = RetryPolicy::from_config(&config.retry);

    assert_eq!(policy.delay_before(1), Duration::ZERO);
    assert!(policy.delay_before(3) > policy.delay_before(2));
}

#[tokio::test]
async fn test_fusion_is_deterministic_with_models() {
    let models = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/classify/document"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "fields": [{"field": "schema_type", "value": "placement", "confidence": 0.9}]
        })))
        .mount(&models)
        .await;
    Mock::given(method("POST"))
        .and(path("/extract/entities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entities": [
                {"label": "ORG", "text": "Microsoft", "score": 0.8},
                {"label": "ORG", "text": "Amazon", "score": 0.7}
            ]
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

    let config = test_config("https://college.test", Some(&models.uri()), Path::new("unused.db"));
    let target = TargetRegistry::from_config(&config).unwrap().all()[0].clone();
    let client = Arc::new(HttpInferenceClient::new(&config.inference).unwrap());
    let retry = RetryPolicy::from_config(&config.retry);
    let router = ContentRouter::new(client.clone(), retry.clone());
    let engine = FusionEngine::new(client, retry, config.inference.clone());

    let doc = document(&placement_page(30, &[]));

    let cancel = CancellationToken::new();
    let first = engine
        .fuse(&target, &doc, router.extract(&doc, &cancel).await, &cancel)
        .await
        .unwrap();
    let second = engine
        .fuse(&target, &doc, router.extract(&doc, &cancel).await, &cancel)
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(first.schema_type, SchemaType::Placement);
    assert_eq!(first.value("highest_package"), Some("INR 30 LPA"));
    assert_eq!(first.status, RecordStatus::Complete);
}
