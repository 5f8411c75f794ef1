//! AI fusion
//!
//! Turns one document's extraction candidates into a structured record:
//! 1. Classification picks the schema type and with it the expected fields
//! 2. Entity recognition and question answering add model candidates
//! 3. Conflict resolution picks one value (or "unresolved") per field

mod engine;
pub mod inference;
mod resolve;
pub mod schema;

pub use engine::{classify_by_keywords, FusionEngine};
pub use inference::{
    DisabledInference, FieldPrediction, HttpInferenceClient, InferenceClient, InferenceError,
    InferenceRequest, InferenceResponse, InferenceStage, Payload,
};
pub use resolve::{build_record, compare_candidates, resolve_fields};

use crate::extract::Provenance;
use crate::registry::SchemaType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Processing outcome of a structured record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    /// Every stage ran and at least one field resolved
    Complete,
    /// Some stage failed or the extractor reported an error
    PartiallyProcessed,
    /// No expected field resolved
    Unresolved,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::PartiallyProcessed => "partially-processed",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(Self::Complete),
            "partially-processed" => Some(Self::PartiallyProcessed),
            "unresolved" => Some(Self::Unresolved),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final value of one expected field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FieldValue {
    Resolved {
        value: String,
        confidence: f64,
        /// Where in the source the winning candidate was read
        location: String,
        provenance: Provenance,
    },
    /// No candidate reached the confidence threshold
    Unresolved,
}

impl FieldValue {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Resolved { value, .. } => Some(value),
            Self::Unresolved => None,
        }
    }
}

/// Fused output for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub target_id: String,
    pub schema_type: SchemaType,
    /// Every expected field of the schema, resolved or not
    pub fields: BTreeMap<String, FieldValue>,
    /// Assigned by the store; 0 until the record is persisted
    pub version: u32,
    /// Content hash of the source document
    pub source_document: String,
    pub status: RecordStatus,
}

impl StructuredRecord {
    pub fn resolved_count(&self) -> usize {
        self.fields.values().filter(|v| v.is_resolved()).count()
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::value)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted inference double shared by unit tests

    use super::inference::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub struct ScriptedInference {
        responses: HashMap<InferenceStage, Vec<FieldPrediction>>,
        answers: Vec<(String, FieldPrediction)>,
        failing: HashSet<InferenceStage>,
        calls: Mutex<Vec<InferenceRequest>>,
        delay: Option<Duration>,
    }

    fn prediction(field: &str, value: &str, confidence: f64) -> FieldPrediction {
        FieldPrediction {
            field: field.to_string(),
            value: value.to_string(),
            confidence,
        }
    }

    impl ScriptedInference {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, stage: InferenceStage, fields: &[(&str, &str, f64)]) -> Self {
            self.responses.insert(
                stage,
                fields
                    .iter()
                    .map(|(f, v, c)| prediction(f, v, *c))
                    .collect(),
            );
            self
        }

        /// Answers questions whose prompt contains `needle`
        pub fn answer(mut self, needle: &str, value: &str, confidence: f64) -> Self {
            self.answers
                .push((needle.to_string(), prediction("answer", value, confidence)));
            self
        }

        pub fn fail(mut self, stage: InferenceStage) -> Self {
            self.failing.insert(stage);
            self
        }

        /// Every call waits `delay` before answering
        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self, stage: InferenceStage) -> usize {
            self.calls
                .lock()
                .map(|calls| calls.iter().filter(|r| r.stage == stage).count())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedInference {
        async fn infer(
            &self,
            request: &InferenceRequest,
        ) -> Result<InferenceResponse, InferenceError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(request.clone());
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(&request.stage) {
                return Err(InferenceError::Status(503));
            }

            if request.stage == InferenceStage::Question {
                let prompt = request.prompt.clone().unwrap_or_default();
                let fields = self
                    .answers
                    .iter()
                    .filter(|(needle, _)| prompt.contains(needle.as_str()))
                    .map(|(_, p)| p.clone())
                    .take(1)
                    .collect();
                return Ok(InferenceResponse { fields });
            }

            Ok(InferenceResponse {
                fields: self
                    .responses
                    .get(&request.stage)
                    .cloned()
                    .unwrap_or_default(),
            })
        }
    }
}
