//! Image extraction through OCR and chart recognition

use crate::crawler::RetryPolicy;
use crate::document::{ContentKind, FetchedDocument};
use crate::extract::tables::{table_candidates, Table};
use crate::extract::text::{label_value_candidates, statistic_candidates};
use crate::extract::{CandidateBuilder, Diagnostic, Extraction, ExtractorKind};
use crate::fusion::inference::{InferenceClient, InferenceError, InferenceRequest, InferenceStage};
use crate::fusion::schema::{resolve_field_name, FIELDS};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Recovers text from images (and scanned PDFs) with the OCR endpoint
///
/// Candidates found in the recognized text are scaled by the OCR confidence.
/// Images additionally go through chart recognition, whose series map onto
/// catalog fields.
pub struct ImageExtractor {
    client: Arc<dyn InferenceClient>,
    retry: RetryPolicy,
}

impl ImageExtractor {
    pub fn new(client: Arc<dyn InferenceClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub async fn extract(&self, document: &FetchedDocument, cancel: &CancellationToken) -> Extraction {
        let mut extraction = Extraction::empty(ExtractorKind::Image);
        if !self.client.enabled() {
            extraction
                .diagnostics
                .push(Diagnostic::error("OCR unavailable: inference is disabled"));
            return extraction;
        }

        let builder = CandidateBuilder::new(document, "ocr", ExtractorKind::Image);
        let ocr = InferenceRequest::image(
            InferenceStage::Ocr,
            document.content_type.clone(),
            document.body.clone(),
        );
        match self.recognize_text(&ocr, &builder, cancel).await {
            Ok(Some(recognized)) => extraction.absorb(recognized),
            Ok(None) => extraction
                .diagnostics
                .push(Diagnostic::warning("OCR returned no text")),
            Err(e) => extraction
                .diagnostics
                .push(Diagnostic::error(format!("OCR failed: {}", e))),
        }

        if document.kind() == ContentKind::Image && !cancel.is_cancelled() {
            self.recognize_chart(document, &builder, &mut extraction, cancel)
                .await;
        }

        extraction
    }

    /// OCRs JPEG images embedded in a text PDF
    ///
    /// The PDF's own text already produced candidates, so a failed image is
    /// only a warning.
    pub async fn extract_embedded(
        &self,
        document: &FetchedDocument,
        images: Vec<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Extraction {
        let mut extraction = Extraction::empty(ExtractorKind::Image);
        if images.is_empty() || !self.client.enabled() {
            return extraction;
        }

        let builder = CandidateBuilder::new(document, "ocr:embedded", ExtractorKind::Image);
        for (index, image) in images.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let ocr = InferenceRequest::image(InferenceStage::Ocr, "image/jpeg", image);
            match self.recognize_text(&ocr, &builder, cancel).await {
                Ok(Some(recognized)) => extraction.absorb(recognized),
                Ok(None) => {}
                Err(e) => extraction.diagnostics.push(Diagnostic::warning(format!(
                    "OCR of embedded image {} failed: {}",
                    index + 1,
                    e
                ))),
            }
        }

        extraction
    }

    /// Runs OCR and the text heuristics over its output
    async fn recognize_text(
        &self,
        request: &InferenceRequest,
        builder: &CandidateBuilder,
        cancel: &CancellationToken,
    ) -> Result<Option<Extraction>, InferenceError> {
        let response = self
            .retry
            .run_cancellable("ocr", cancel, |_| self.client.infer(request))
            .await?;
        let Some(text) = response.best("text") else {
            return Ok(None);
        };

        let mut recognized = Extraction::empty(ExtractorKind::Image);
        let scaled = builder.clone().scaled(text.confidence);
        for (index, table) in Table::from_lines(&text.value).iter().enumerate() {
            recognized
                .candidates
                .extend(table_candidates(table, index + 1, &scaled));
        }
        recognized
            .candidates
            .extend(label_value_candidates(&text.value, &scaled));
        recognized
            .candidates
            .extend(statistic_candidates(&text.value, &scaled));
        recognized.text = text.value.clone();
        Ok(Some(recognized))
    }

    async fn recognize_chart(
        &self,
        document: &FetchedDocument,
        builder: &CandidateBuilder,
        extraction: &mut Extraction,
        cancel: &CancellationToken,
    ) {
        let chart = InferenceRequest::image(
            InferenceStage::Chart,
            document.content_type.clone(),
            document.body.clone(),
        )
        .with_schema_hint(FIELDS.iter().map(|f| f.name));

        match self
            .retry
            .run_cancellable("chart", cancel, |_| self.client.infer(&chart))
            .await
        {
            Ok(response) => {
                let charts = builder.with_source("model:chart");
                for prediction in &response.fields {
                    let Some(spec) = resolve_field_name(&prediction.field) else {
                        continue;
                    };
                    if let Some(candidate) = charts.candidate(
                        spec.name,
                        &prediction.value,
                        format!("chart series '{}'", prediction.field),
                        prediction.confidence,
                    ) {
                        extraction.candidates.push(candidate);
                    }
                }
            }
            // not every image is a chart
            Err(InferenceError::Malformed(_)) | Err(InferenceError::Model(_)) => extraction
                .diagnostics
                .push(Diagnostic::info("No chart recognized")),
            Err(e) => extraction
                .diagnostics
                .push(Diagnostic::error(format!("Chart recognition failed: {}", e))),
        }
    }
}
