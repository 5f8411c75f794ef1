//! Inference endpoint client
//!
//! Every model stage (classification, entities, question answering, OCR,
//! chart recognition) speaks the same contract: a request carrying a text or
//! image payload plus an optional prompt and schema hint, and a response
//! carrying `(field, value, confidence)` tuples or an error.

use crate::config::InferenceConfig;
use crate::crawler::{Cancelled, Retryable};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Confidence assumed when a response omits a score
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Model stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceStage {
    Classify,
    Entities,
    Question,
    Ocr,
    Chart,
}

impl InferenceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Entities => "entities",
            Self::Question => "question",
            Self::Ocr => "ocr",
            Self::Chart => "chart",
        }
    }
}

impl fmt::Display for InferenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content handed to a model
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Image { mime: String, data: Vec<u8> },
}

/// One call to one stage
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub stage: InferenceStage,
    pub payload: Payload,
    /// Task-specific query, e.g. the question for the QA stage
    pub prompt: Option<String>,
    /// Field names the caller expects back
    pub schema_hint: Vec<String>,
}

impl InferenceRequest {
    pub fn text(stage: InferenceStage, text: impl Into<String>) -> Self {
        Self {
            stage,
            payload: Payload::Text(text.into()),
            prompt: None,
            schema_hint: Vec::new(),
        }
    }

    pub fn image(stage: InferenceStage, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            stage,
            payload: Payload::Image {
                mime: mime.into(),
                data,
            },
            prompt: None,
            schema_hint: Vec::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_schema_hint<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema_hint = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// One `(field, value, confidence)` tuple returned by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPrediction {
    pub field: String,
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResponse {
    pub fields: Vec<FieldPrediction>,
}

impl InferenceResponse {
    /// The highest-confidence prediction for `field`
    pub fn best(&self, field: &str) -> Option<&FieldPrediction> {
        self.fields
            .iter()
            .filter(|p| p.field == field)
            .fold(None, |best: Option<&FieldPrediction>, p| match best {
                Some(b) if b.confidence >= p.confidence => Some(b),
                _ => Some(p),
            })
    }
}

/// Errors raised by inference calls
///
/// Never fatal: a failed stage contributes no candidates and marks the record
/// as partially processed.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference transport error: {0}")]
    Transport(String),

    #[error("Inference call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Malformed inference response: {0}")]
    Malformed(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Inference is disabled")]
    Disabled,

    #[error("Inference call cancelled")]
    Cancelled,
}

impl From<Cancelled> for InferenceError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl Retryable for InferenceError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status(code) => *code == 408 || *code == 429 || *code >= 500,
            Self::Malformed(_) | Self::Model(_) | Self::Disabled | Self::Cancelled => false,
        }
    }
}

/// A model backend
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;

    /// False when calls are known to fail without trying
    fn enabled(&self) -> bool {
        true
    }
}

/// Client for the hosted HTTP inference endpoints
pub struct HttpInferenceClient {
    client: reqwest::Client,
    config: InferenceConfig,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
            timeout,
        })
    }

    pub fn endpoint(&self, stage: InferenceStage) -> String {
        let path = match stage {
            InferenceStage::Classify => &self.config.classify_path,
            InferenceStage::Entities => &self.config.entities_path,
            InferenceStage::Question => &self.config.question_path,
            InferenceStage::Ocr => &self.config.ocr_path,
            InferenceStage::Chart => &self.config.chart_path,
        };
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let endpoint = self.endpoint(request.stage);
        tracing::trace!(stage = %request.stage, %endpoint, "inference call");

        let mut builder = self.client.post(&endpoint).json(&request_body(request));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout)
            } else {
                InferenceError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout)
            } else {
                InferenceError::Transport(e.to_string())
            }
        })?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;

        parse_response(&value)
    }
}

/// Stand-in used when inference is switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledInference;

#[async_trait]
impl InferenceClient for DisabledInference {
    async fn infer(&self, _request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        Err(InferenceError::Disabled)
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// JSON body for a request
///
/// Text payloads are sent as `text`; question answering also gets them as
/// `context` with the prompt as `question`. Images travel base64-encoded.
pub fn request_body(request: &InferenceRequest) -> Value {
    let mut body = json!({
        "stage": request.stage,
        "schema_hint": request.schema_hint,
    });

    match &request.payload {
        Payload::Text(text) => {
            body["text"] = json!(text);
            if request.stage == InferenceStage::Question {
                body["context"] = json!(text);
            }
        }
        Payload::Image { mime, data } => {
            body["image"] = json!(BASE64.encode(data));
            body["mime"] = json!(mime);
        }
    }

    if let Some(prompt) = &request.prompt {
        body["prompt"] = json!(prompt);
        if request.stage == InferenceStage::Question {
            body["question"] = json!(prompt);
        }
    }

    body
}

/// Reads a response body into predictions
///
/// Accepts the native `{"fields": [...]}` form and the shapes the hosted
/// endpoints return:
/// - `{"classification": {"class", "confidence"}}` as field `schema_type`
/// - `{"entities": [{"label", "text", "score"}]}` with the entity label as field
/// - `{"result": {"answer", "score"}}` as field `answer`
/// - `{"result": {"full_text", "confidence"}}` as field `text`
/// - `{"chart_type", "chart_data": {name: value}}` with one field per series
pub fn parse_response(value: &Value) -> Result<InferenceResponse, InferenceError> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Err(InferenceError::Model(value_to_string(error)));
    }

    let mut recognized = false;
    let mut fields = Vec::new();

    if let Some(items) = value.get("fields").and_then(Value::as_array) {
        recognized = true;
        for item in items {
            let Some(field) = item.get("field").and_then(Value::as_str) else {
                continue;
            };
            fields.push(FieldPrediction {
                field: field.to_string(),
                value: item.get("value").map(value_to_string).unwrap_or_default(),
                confidence: score(item, &["confidence", "score"]).unwrap_or(0.0),
            });
        }
    }

    if let Some(classification) = value.get("classification").filter(|c| c.is_object()) {
        recognized = true;
        if let Some(class) = first_string(classification, &["class", "label"]) {
            fields.push(FieldPrediction {
                field: "schema_type".to_string(),
                value: class,
                confidence: score(classification, &["confidence", "score"]).unwrap_or(0.0),
            });
        }
    }

    if let Some(entities) = value.get("entities").and_then(Value::as_array) {
        recognized = true;
        for entity in entities {
            let (Some(label), Some(text)) = (
                first_string(entity, &["label", "entity_group", "entity", "type"]),
                first_string(entity, &["text", "word", "value"]),
            ) else {
                continue;
            };
            fields.push(FieldPrediction {
                field: label.to_uppercase(),
                value: text,
                confidence: score(entity, &["score", "confidence"]).unwrap_or(DEFAULT_CONFIDENCE),
            });
        }
    }

    if let Some(result) = value.get("result").filter(|r| r.is_object()) {
        recognized = true;
        if let Some(answer) = first_string(result, &["answer"]) {
            fields.push(FieldPrediction {
                field: "answer".to_string(),
                value: answer,
                confidence: score(result, &["score", "confidence"]).unwrap_or(0.0),
            });
        }
        if let Some(text) = first_string(result, &["full_text", "text"]) {
            fields.push(FieldPrediction {
                field: "text".to_string(),
                value: text,
                confidence: score(result, &["confidence", "score"]).unwrap_or(DEFAULT_CONFIDENCE),
            });
        }
    }

    if let Some(data) = value.get("chart_data").and_then(Value::as_object) {
        recognized = true;
        let confidence = score(value, &["confidence", "score"]).unwrap_or(DEFAULT_CONFIDENCE);
        for (name, series) in data {
            fields.push(FieldPrediction {
                field: name.clone(),
                value: value_to_string(series),
                confidence,
            });
        }
    }

    if !recognized {
        return Err(InferenceError::Malformed(
            "response carries no recognizable fields".to_string(),
        ));
    }

    Ok(InferenceResponse { fields })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find(|v| !v.is_null())
        .map(value_to_string)
        .filter(|s| !s.trim().is_empty())
}

fn score(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_f64))
        .map(|s| s.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> InferenceConfig {
        InferenceConfig {
            base_url: base_url.to_string(),
            api_key: Some("secret".to_string()),
            timeout_secs: 5,
            ..InferenceConfig::default()
        }
    }

    #[test]
    fn test_parse_native_fields() {
        let response = parse_response(&json!({
            "fields": [
                {"field": "average_package", "value": "12 LPA", "confidence": 0.82},
                {"field": "recruiters", "value": ["Google", "Amazon"], "confidence": 1.4}
            ]
        }))
        .unwrap();

        assert_eq!(response.fields.len(), 2);
        assert_eq!(response.fields[1].value, "Google, Amazon");
        assert_eq!(response.fields[1].confidence, 1.0);
    }

    #[test]
    fn test_parse_hosted_shapes() {
        let classify = parse_response(&json!({
            "classification": {"class": "placement", "confidence": 0.91}
        }))
        .unwrap();
        assert_eq!(classify.best("schema_type").unwrap().value, "placement");

        let entities = parse_response(&json!({
            "entities": [
                {"entity_group": "org", "word": "Infosys", "score": 0.88},
                {"label": "DATE", "text": "30 June 2024"}
            ]
        }))
        .unwrap();
        assert_eq!(entities.fields[0].field, "ORG");
        assert_eq!(entities.fields[1].confidence, DEFAULT_CONFIDENCE);

        let ocr = parse_response(&json!({"result": {"full_text": "Median CTC 14 LPA"}})).unwrap();
        assert_eq!(ocr.best("text").unwrap().value, "Median CTC 14 LPA");

        let chart = parse_response(&json!({
            "chart_type": "bar",
            "chart_data": {"average_package": "11.2 LPA"}
        }))
        .unwrap();
        assert_eq!(chart.fields[0].field, "average_package");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_response(&json!({"error": "model overloaded"})),
            Err(InferenceError::Model(_))
        ));
        assert!(matches!(
            parse_response(&json!({"hello": "world"})),
            Err(InferenceError::Malformed(_))
        ));
        assert!(parse_response(&json!({"entities": []})).unwrap().fields.is_empty());
    }

    #[test]
    fn test_retryable() {
        assert!(InferenceError::Status(503).is_retryable());
        assert!(InferenceError::Status(429).is_retryable());
        assert!(InferenceError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!InferenceError::Status(400).is_retryable());
        assert!(!InferenceError::Malformed("x".into()).is_retryable());
        assert!(!InferenceError::Disabled.is_retryable());
        assert!(!InferenceError::Cancelled.is_retryable());
    }

    #[test]
    fn test_image_body_is_base64() {
        let request = InferenceRequest::image(InferenceStage::Ocr, "image/png", vec![1, 2, 3]);
        let body = request_body(&request);
        assert_eq!(body["image"], "AQID");
        assert_eq!(body["mime"], "image/png");
        assert_eq!(body["stage"], "ocr");
    }

    #[tokio::test]
    async fn test_question_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/answer/question"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "stage": "question",
                "question": "What is the median package?",
                "context": "Median package: 14 LPA"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"answer": "14 LPA", "score": 0.93}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&config(&server.uri())).unwrap();
        let request = InferenceRequest::text(InferenceStage::Question, "Median package: 14 LPA")
            .with_prompt("What is the median package?");
        let response = client.infer(&request).await.unwrap();

        let answer = response.best("answer").unwrap();
        assert_eq!(answer.value, "14 LPA");
        assert!((answer.confidence - 0.93).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&config(&server.uri())).unwrap();
        let request = InferenceRequest::text(InferenceStage::Classify, "text");
        let error = client.infer(&request).await.unwrap_err();
        assert!(matches!(error, InferenceError::Status(503)));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_disabled_client() {
        let request = InferenceRequest::text(InferenceStage::Classify, "text");
        assert!(!DisabledInference.enabled());
        assert!(matches!(
            DisabledInference.infer(&request).await,
            Err(InferenceError::Disabled)
        ));
    }
}
