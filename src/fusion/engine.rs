//! Fusion engine

use super::inference::{
    FieldPrediction, InferenceClient, InferenceError, InferenceRequest, InferenceResponse,
    InferenceStage,
};
use super::resolve::build_record;
use super::schema::{content_indicators, field, fields_for, FieldSpec};
use super::StructuredRecord;
use crate::config::InferenceConfig;
use crate::crawler::{Cancelled, RetryPolicy};
use crate::document::FetchedDocument;
use crate::extract::{CandidateBuilder, Extraction, ExtractionCandidate};
use crate::registry::{SchemaType, Target};
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Distinct organisations kept for a list-valued field
const MAX_LISTED_ENTITIES: usize = 20;

/// Runs the model stages for a document and fuses their output with the
/// extractor candidates
pub struct FusionEngine {
    client: Arc<dyn InferenceClient>,
    retry: RetryPolicy,
    config: InferenceConfig,
}

impl FusionEngine {
    pub fn new(client: Arc<dyn InferenceClient>, retry: RetryPolicy, config: InferenceConfig) -> Self {
        Self {
            client,
            retry,
            config,
        }
    }

    /// Fuses one document into a structured record
    ///
    /// Model stages that fail contribute nothing and degrade the record to
    /// `partially-processed`; extraction errors do the same. Returns
    /// `Cancelled` when `cancel` fires before the record is complete.
    pub async fn fuse(
        &self,
        target: &Target,
        document: &FetchedDocument,
        extraction: Extraction,
        cancel: &CancellationToken,
    ) -> Result<StructuredRecord, Cancelled> {
        let mut failed: Vec<InferenceStage> = Vec::new();
        let use_models = self.client.enabled() && !extraction.text.trim().is_empty();

        let schema = self
            .classify(target, document, &extraction, use_models, &mut failed, cancel)
            .await;

        let mut candidates = extraction.candidates.clone();
        if use_models {
            let context = truncate_chars(&extraction.text, self.config.max_context_chars);
            let builder = CandidateBuilder::new(document, "model", extraction.kind);

            match self.entities(schema, &context, &builder, cancel).await {
                Ok(found) => candidates.extend(found),
                Err(_) => failed.push(InferenceStage::Entities),
            }
            let (answered, error) = self.answers(schema, &context, &builder, cancel).await;
            candidates.extend(answered);
            if error.is_some() {
                failed.push(InferenceStage::Question);
            }
        }

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let degraded = !failed.is_empty() || extraction.has_errors();
        let record = build_record(
            &target.id,
            schema,
            &document.content_hash,
            &candidates,
            self.config.min_confidence,
            degraded,
        );

        tracing::debug!(
            target_id = %target.id,
            url = %document.url,
            content_hash = %document.content_hash,
            schema = %schema,
            resolved = record.resolved_count(),
            status = %record.status,
            failed_stages = ?failed,
            "fused record"
        );

        Ok(record)
    }

    async fn call(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> Result<InferenceResponse, InferenceError> {
        let result = self
            .retry
            .run_cancellable(request.stage.as_str(), cancel, |_| self.client.infer(request))
            .await;
        match &result {
            Err(InferenceError::Cancelled) | Ok(_) => {}
            Err(e) => tracing::warn!(stage = %request.stage, "inference stage failed: {}", e),
        }
        result
    }

    async fn classify(
        &self,
        target: &Target,
        document: &FetchedDocument,
        extraction: &Extraction,
        use_models: bool,
        failed: &mut Vec<InferenceStage>,
        cancel: &CancellationToken,
    ) -> SchemaType {
        let hints: Vec<SchemaType> = if target.schema_hints.is_empty() {
            SchemaType::ALL.to_vec()
        } else {
            target.schema_hints.clone()
        };

        if use_models {
            let request = InferenceRequest::text(
                InferenceStage::Classify,
                truncate_chars(&extraction.text, self.config.max_classify_chars),
            )
            .with_prompt("Classify this college web page as admission, placement or internship")
            .with_schema_hint(SchemaType::ALL.iter().map(|s| s.to_db_string()));

            match self.call(&request, cancel).await {
                Ok(response) => {
                    let schema = response
                        .best("schema_type")
                        .filter(|p| p.confidence >= self.config.classification_threshold)
                        .and_then(|p| schema_from_label(&p.value));
                    if let Some(schema) = schema {
                        return schema;
                    }
                }
                Err(_) => failed.push(InferenceStage::Classify),
            }
        }

        classify_by_keywords(&hints, &document.url, &extraction.text, &extraction.candidates)
    }

    async fn entities(
        &self,
        schema: SchemaType,
        context: &str,
        builder: &CandidateBuilder,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractionCandidate>, InferenceError> {
        let request = InferenceRequest::text(InferenceStage::Entities, context)
            .with_schema_hint(fields_for(schema).map(|f| f.name));
        let response = self.call(&request, cancel).await?;

        Ok(entity_candidates(
            schema,
            &response.fields,
            &builder.with_source("model:entities"),
        ))
    }

    async fn answers(
        &self,
        schema: SchemaType,
        context: &str,
        builder: &CandidateBuilder,
        cancel: &CancellationToken,
    ) -> (Vec<ExtractionCandidate>, Option<InferenceError>) {
        let specs: Vec<&'static FieldSpec> = fields_for(schema).collect();
        let requests: Vec<InferenceRequest> = specs
            .iter()
            .map(|spec| {
                InferenceRequest::text(InferenceStage::Question, context)
                    .with_prompt(spec.question)
                    .with_schema_hint([spec.name])
            })
            .collect();

        let responses = join_all(requests.iter().map(|r| self.call(r, cancel))).await;
        let builder = builder.with_source("model:question");

        let mut candidates = Vec::new();
        let mut first_error = None;
        for (spec, response) in specs.iter().zip(responses) {
            match response {
                Ok(response) => {
                    let answer = response
                        .best("answer")
                        .or_else(|| response.best(spec.name));
                    if let Some(candidate) = answer.and_then(|a| {
                        builder.candidate(
                            spec.name,
                            &a.value,
                            format!("answer to '{}'", spec.question),
                            a.confidence,
                        )
                    }) {
                        candidates.push(candidate);
                    }
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        (candidates, first_error)
    }
}

/// Maps recognized entities onto the schema's fields
///
/// Dates become deadlines, organisations become recruiter or internship
/// company lists, money becomes fees or stipends. Predictions already named
/// after a field of the schema pass through.
fn entity_candidates(
    schema: SchemaType,
    predictions: &[FieldPrediction],
    builder: &CandidateBuilder,
) -> Vec<ExtractionCandidate> {
    let mut candidates = Vec::new();
    let mut organisations: Vec<&FieldPrediction> = Vec::new();

    for prediction in predictions {
        if let Some(spec) = field(&prediction.field).filter(|f| f.schema == schema) {
            candidates.extend(builder.candidate(
                spec.name,
                &prediction.value,
                "entity",
                prediction.confidence,
            ));
            continue;
        }

        let target_field = match (schema, prediction.field.as_str()) {
            (SchemaType::Admission, "DATE") => Some("application_deadline"),
            (SchemaType::Admission, "MONEY") => Some("fee_structure"),
            (SchemaType::Internship, "MONEY") => Some("internship_stipend"),
            (SchemaType::Placement | SchemaType::Internship, "ORG") => {
                if !organisations
                    .iter()
                    .any(|o| o.value.eq_ignore_ascii_case(&prediction.value))
                {
                    organisations.push(prediction);
                }
                None
            }
            _ => None,
        };

        if let Some(name) = target_field {
            candidates.extend(builder.candidate(
                name,
                &prediction.value,
                format!("entity {}", prediction.field),
                prediction.confidence,
            ));
        }
    }

    if !organisations.is_empty() {
        let listed: Vec<&FieldPrediction> =
            organisations.into_iter().take(MAX_LISTED_ENTITIES).collect();
        let value = listed
            .iter()
            .map(|o| o.value.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let confidence = listed.iter().map(|o| o.confidence).sum::<f64>() / listed.len() as f64;
        let name = match schema {
            SchemaType::Internship => "internship_companies",
            _ => "recruiters",
        };
        candidates.extend(builder.candidate(name, &value, "entities ORG", confidence));
    }

    candidates
}

/// Picks a schema type from keyword evidence
///
/// Each hinted schema scores one point per content indicator found in the
/// text or URL and two per extraction candidate for one of its fields. The
/// highest score wins; ties and the no-evidence case go to the first hint.
pub fn classify_by_keywords(
    hints: &[SchemaType],
    url: &str,
    text: &str,
    candidates: &[ExtractionCandidate],
) -> SchemaType {
    let haystack = format!("{}\n{}", url, text).to_lowercase();

    let mut best: Option<(SchemaType, usize)> = None;
    for &schema in hints {
        let indicators = content_indicators(schema)
            .iter()
            .filter(|phrase| haystack.contains(*phrase))
            .count();
        let fields = candidates
            .iter()
            .filter(|c| field(&c.field).map_or(false, |f| f.schema == schema))
            .count();
        let score = indicators + 2 * fields;

        if best.map_or(true, |(_, top)| score > top) {
            best = Some((schema, score));
        }
    }

    best.map(|(schema, _)| schema)
        .unwrap_or(SchemaType::Admission)
}

fn schema_from_label(label: &str) -> Option<SchemaType> {
    let label = label.to_lowercase();
    SchemaType::ALL
        .into_iter()
        .find(|schema| label.contains(schema.to_db_string()))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractorKind, Provenance};
    use crate::fusion::testing::ScriptedInference;
    use crate::fusion::{DisabledInference, RecordStatus};
    use chrono::{DateTime, Utc};
    use std::time::Duration;
    use url::Url;

    fn target(hints: Vec<SchemaType>) -> Target {
        Target {
            id: "iit-bombay".to_string(),
            name: "IIT Bombay".to_string(),
            aliases: vec!["iitb".to_string()],
            root_domain: "iitb.ac.in".to_string(),
            seeds: vec![Url::parse("https://www.iitb.ac.in").unwrap()],
            schema_hints: hints,
        }
    }

    fn fetched_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-07-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn document() -> FetchedDocument {
        FetchedDocument::new(
            "iit-bombay",
            "https://www.iitb.ac.in/placements",
            Some("text/html"),
            b"<p>Placement statistics</p>".to_vec(),
            fetched_at(),
        )
    }

    fn extraction(text: &str, candidates: Vec<(&str, &str, f64)>) -> Extraction {
        let doc = document();
        let builder = CandidateBuilder::new(&doc, "html", ExtractorKind::Html);
        let mut extraction = Extraction::empty(ExtractorKind::Html);
        extraction.text = text.to_string();
        extraction.candidates = candidates
            .into_iter()
            .filter_map(|(f, v, c)| builder.candidate(f, v, "line 1", c))
            .collect();
        extraction
    }

    fn engine(client: ScriptedInference) -> (FusionEngine, Arc<ScriptedInference>) {
        let client = Arc::new(client);
        let engine = FusionEngine::new(
            client.clone(),
            RetryPolicy::no_retry(),
            InferenceConfig::default(),
        );
        (engine, client)
    }

    #[tokio::test]
    async fn test_full_fusion() {
        let client = ScriptedInference::new()
            .respond(InferenceStage::Classify, &[("schema_type", "placement", 0.9)])
            .respond(
                InferenceStage::Entities,
                &[("ORG", "Google", 0.9), ("ORG", "Microsoft", 0.7), ("DATE", "2024", 0.9)],
            )
            .answer("median package", "16 LPA", 0.85);
        let (engine, client) = engine(client);

        let record = engine
            .fuse(
                &target(vec![SchemaType::Admission, SchemaType::Placement]),
                &document(),
                extraction(
                    "Placement statistics 2024\nAverage Package: 21 LPA",
                    vec![("average_package", "21 LPA", 0.6)],
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(record.schema_type, SchemaType::Placement);
        assert_eq!(record.status, RecordStatus::Complete);
        assert_eq!(record.value("average_package"), Some("21 LPA"));
        assert_eq!(record.value("median_package"), Some("16 LPA"));
        assert_eq!(record.value("recruiters"), Some("Google, Microsoft"));
        assert_eq!(record.version, 0);
        assert_eq!(record.source_document, document().content_hash);

        // one question per expected placement field
        assert_eq!(
            client.calls(InferenceStage::Question),
            fields_for(SchemaType::Placement).count()
        );
    }

    #[tokio::test]
    async fn test_failed_stage_degrades_record() {
        let client = ScriptedInference::new()
            .respond(InferenceStage::Classify, &[("schema_type", "admission", 0.95)])
            .fail(InferenceStage::Entities);
        let (engine, _) = engine(client);

        let record = engine
            .fuse(
                &target(vec![SchemaType::Admission]),
                &document(),
                extraction(
                    "Fee Structure: INR 2,20,000",
                    vec![("fee_structure", "INR 2,20,000", 0.6)],
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(record.status, RecordStatus::PartiallyProcessed);
        assert_eq!(record.value("fee_structure"), Some("INR 2,20,000"));
    }

    #[tokio::test]
    async fn test_low_confidence_classification_falls_back_to_keywords() {
        let client =
            ScriptedInference::new().respond(InferenceStage::Classify, &[("schema_type", "admission", 0.3)]);
        let (engine, _) = engine(client);

        let record = engine
            .fuse(
                &target(vec![SchemaType::Admission, SchemaType::Placement]),
                &document(),
                extraction(
                    "Placement statistics: highest package 1.2 crore",
                    vec![("highest_package", "1.2 crore", 0.55)],
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(record.schema_type, SchemaType::Placement);
    }

    #[tokio::test]
    async fn test_disabled_inference_uses_extractors_only() {
        let engine = FusionEngine::new(
            Arc::new(DisabledInference),
            RetryPolicy::no_retry(),
            InferenceConfig::default(),
        );
        let record = engine
            .fuse(
                &target(vec![SchemaType::Placement]),
                &document(),
                extraction("Students placed: 412", vec![("students_placed", "412", 0.6)]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(record.status, RecordStatus::Complete);
        assert_eq!(record.value("students_placed"), Some("412"));
    }

    #[tokio::test]
    async fn test_fuse_is_deterministic() {
        let make = || {
            ScriptedInference::new()
                .respond(InferenceStage::Classify, &[("schema_type", "placement", 0.9)])
                .answer("highest package", "50 LPA", 0.8)
        };
        let input = || {
            extraction(
                "Highest package: 50 LPA\nAverage package: 20 LPA",
                vec![("highest_package", "50 LPA", 0.6), ("average_package", "20 LPA", 0.6)],
            )
        };

        let (first_engine, _) = engine(make());
        let (second_engine, _) = engine(make());
        let t = target(vec![SchemaType::Placement]);
        let cancel = CancellationToken::new();
        let first = first_engine.fuse(&t, &document(), input(), &cancel).await.unwrap();
        let second = second_engine.fuse(&t, &document(), input(), &cancel).await.unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_slow_model_calls() {
        let client = ScriptedInference::new()
            .respond(InferenceStage::Classify, &[("schema_type", "placement", 0.9)])
            .slow(Duration::from_secs(30));
        let (engine, client) = engine(client);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = engine
            .fuse(
                &target(vec![SchemaType::Placement]),
                &document(),
                extraction("Average Package: 21 LPA", vec![("average_package", "21 LPA", 0.6)]),
                &cancel,
            )
            .await;

        assert_eq!(result, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(client.calls(InferenceStage::Classify), 1);
    }

    #[test]
    fn test_keyword_classification() {
        let hints = [SchemaType::Admission, SchemaType::Placement, SchemaType::Internship];
        assert_eq!(
            classify_by_keywords(&hints, "https://x.ac.in/summer-internship", "Internship stipend", &[]),
            SchemaType::Internship
        );
        assert_eq!(
            classify_by_keywords(&hints, "https://x.ac.in/", "", &[]),
            SchemaType::Admission
        );
        assert_eq!(
            classify_by_keywords(&[SchemaType::Placement], "https://x.ac.in/admissions", "", &[]),
            SchemaType::Placement
        );
    }

    #[test]
    fn test_entity_mapping() {
        let doc = document();
        let builder = CandidateBuilder::new(&doc, "model:entities", ExtractorKind::Html);
        let predictions = vec![
            FieldPrediction {
                field: "DATE".to_string(),
                value: "15 May 2025".to_string(),
                confidence: 0.8,
            },
            FieldPrediction {
                field: "ORG".to_string(),
                value: "IIT Bombay".to_string(),
                confidence: 0.8,
            },
        ];

        let admission = entity_candidates(SchemaType::Admission, &predictions, &builder);
        assert_eq!(admission.len(), 1);
        assert_eq!(admission[0].field, "application_deadline");

        let placement = entity_candidates(SchemaType::Placement, &predictions, &builder);
        assert_eq!(placement.len(), 1);
        assert_eq!(placement[0].field, "recruiters");
        assert_eq!(
            placement[0].provenance,
            Provenance {
                source: "model:entities".to_string(),
                kind: ExtractorKind::Html,
                document: doc.content_hash.clone(),
                fetched_at: fetched_at(),
            }
        );
    }
}
