//! Conflict resolution
//!
//! Pure functions: the same candidates always produce the same record.

use super::schema::fields_for;
use super::{FieldValue, RecordStatus, StructuredRecord};
use crate::extract::ExtractionCandidate;
use crate::registry::SchemaType;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Orders two candidates for the same field, best first
///
/// Higher confidence wins; on a tie the more authoritative source kind
/// (PDF > HTML/table > OCR), then the more recently fetched document.
pub fn compare_candidates(a: &ExtractionCandidate, b: &ExtractionCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| {
            b.provenance
                .kind
                .authority()
                .cmp(&a.provenance.kind.authority())
        })
        .then_with(|| b.provenance.fetched_at.cmp(&a.provenance.fetched_at))
}

/// Picks one value per expected field of `schema`
///
/// Candidates for fields outside the schema are ignored. Fields whose best
/// candidate is below `min_confidence` (or that have none) are unresolved.
/// Ties that survive every rule go to the candidate listed first.
pub fn resolve_fields(
    schema: SchemaType,
    candidates: &[ExtractionCandidate],
    min_confidence: f64,
) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();

    for spec in fields_for(schema) {
        let mut matching: Vec<&ExtractionCandidate> = candidates
            .iter()
            .filter(|c| c.field == spec.name && c.confidence >= min_confidence)
            .collect();
        matching.sort_by(|a, b| compare_candidates(a, b));

        let value = match matching.first() {
            Some(best) => FieldValue::Resolved {
                value: best.value.clone(),
                confidence: best.confidence,
                location: best.location.clone(),
                provenance: best.provenance.clone(),
            },
            None => FieldValue::Unresolved,
        };
        fields.insert(spec.name.to_string(), value);
    }

    fields
}

/// Assembles a record from resolved candidates
///
/// # Arguments
///
/// * `degraded` - A model stage failed or the extractor reported an error
pub fn build_record(
    target_id: &str,
    schema: SchemaType,
    source_document: &str,
    candidates: &[ExtractionCandidate],
    min_confidence: f64,
    degraded: bool,
) -> StructuredRecord {
    let fields = resolve_fields(schema, candidates, min_confidence);

    let status = if !fields.values().any(FieldValue::is_resolved) {
        RecordStatus::Unresolved
    } else if degraded {
        RecordStatus::PartiallyProcessed
    } else {
        RecordStatus::Complete
    };

    StructuredRecord {
        target_id: target_id.to_string(),
        schema_type: schema,
        fields,
        version: 0,
        source_document: source_document.to_string(),
        status,
    }
}
