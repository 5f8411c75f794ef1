//! Content routing and extraction
//!
//! A fetched document is routed to one extractor of a closed set
//! (HTML, table, PDF, image) by its sniffed content type. Every extractor is
//! total: malformed input produces an empty candidate list and a diagnostic,
//! never an error that stops the run.

mod html;
mod image;
mod pdf;
mod tables;
mod text;

pub use html::extract_html;
pub use image::ImageExtractor;
pub use pdf::{embedded_jpegs, extract_pdf, text_fidelity, MAX_EMBEDDED_IMAGES, MIN_PDF_TEXT_CHARS};
pub use tables::{table_candidates, Table};
pub use text::{label_value_candidates, main_text, statistic_candidates};

use crate::crawler::RetryPolicy;
use crate::document::{ContentKind, FetchedDocument};
use crate::fusion::InferenceClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Confidence of a value read from a table header/cell pair
pub const TABLE_CONFIDENCE: f64 = 0.8;
/// Confidence of a `<dt>`/`<dd>` pair
pub const DEFINITION_CONFIDENCE: f64 = 0.75;
/// Confidence of a "Label: value" line
pub const LABEL_CONFIDENCE: f64 = 0.6;
/// Confidence of a regex statistic found in free text
pub const STATISTIC_CONFIDENCE: f64 = 0.55;
/// Confidence of a section heading followed by its content
pub const HEADING_CONFIDENCE: f64 = 0.5;

/// Longest value kept for one candidate (characters)
pub const MAX_VALUE_CHARS: usize = 300;

/// Errors raised by extractors
///
/// Never fatal; the router turns them into diagnostics.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Unsupported content type: {0}")]
    Unsupported(String),

    #[error("Document contains no extractable text")]
    Empty,
}

/// The closed set of extractors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Html,
    Table,
    Pdf,
    Image,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Table => "table",
            Self::Pdf => "pdf",
            Self::Image => "image",
        }
    }

    /// Source-authority rank used to break confidence ties: PDF > HTML/table > OCR
    pub fn authority(&self) -> u8 {
        match self {
            Self::Pdf => 3,
            Self::Html | Self::Table => 2,
            Self::Image => 1,
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a candidate came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Producer: an extractor name or an inference stage (`model:question`)
    pub source: String,
    /// Kind of the document the value was read from; decides authority
    pub kind: ExtractorKind,
    /// Content hash of the source document
    pub document: String,
    pub fetched_at: DateTime<Utc>,
}

/// One proposed value for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionCandidate {
    pub field: String,
    pub value: String,
    /// Human-readable position in the source (e.g. "table 1, row 2")
    pub location: String,
    pub confidence: f64,
    pub provenance: Provenance,
}

/// Severity of an extraction diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A note about something an extractor could not do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

impl From<ExtractionError> for Diagnostic {
    fn from(error: ExtractionError) -> Self {
        Diagnostic::error(error.to_string())
    }
}

/// Everything extracted from one document
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub kind: ExtractorKind,
    pub candidates: Vec<ExtractionCandidate>,
    /// Readable text handed to the inference stages
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Text layer too thin to trust; the document should be OCR'd instead
    pub needs_ocr: bool,
}

impl Extraction {
    pub fn empty(kind: ExtractorKind) -> Self {
        Self {
            kind,
            candidates: Vec::new(),
            text: String::new(),
            diagnostics: Vec::new(),
            needs_ocr: false,
        }
    }

    /// An empty extraction carrying the error as a diagnostic
    pub fn failed(kind: ExtractorKind, error: ExtractionError) -> Self {
        let mut extraction = Self::empty(kind);
        extraction.diagnostics.push(error.into());
        extraction
    }

    /// Appends another extraction's candidates, text and diagnostics
    pub fn absorb(&mut self, other: Extraction) {
        self.candidates.extend(other.candidates);
        self.diagnostics.extend(other.diagnostics);
        if !other.text.is_empty() {
            if !self.text.is_empty() {
                self.text.push('\n');
            }
            self.text.push_str(&other.text);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// Builds candidates with a shared provenance
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    source: String,
    kind: ExtractorKind,
    document: String,
    fetched_at: DateTime<Utc>,
    scale: f64,
}

impl CandidateBuilder {
    pub fn new(document: &FetchedDocument, source: &str, kind: ExtractorKind) -> Self {
        Self {
            source: source.to_string(),
            kind,
            document: document.content_hash.clone(),
            fetched_at: document.fetched_at,
            scale: 1.0,
        }
    }

    /// Multiplies every confidence by `scale` (PDF fidelity, OCR quality)
    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale.clamp(0.0, 1.0);
        self
    }

    /// Same provenance under a different producer name
    pub fn with_source(&self, source: &str) -> Self {
        let mut builder = self.clone();
        builder.source = source.to_string();
        builder
    }

    pub fn candidate(
        &self,
        field: &str,
        value: &str,
        location: impl Into<String>,
        confidence: f64,
    ) -> Option<ExtractionCandidate> {
        let value = clean_value(value);
        if value.is_empty() {
            return None;
        }

        Some(ExtractionCandidate {
            field: field.to_string(),
            value,
            location: location.into(),
            confidence: (confidence * self.scale).clamp(0.0, 1.0),
            provenance: Provenance {
                source: self.source.clone(),
                kind: self.kind,
                document: self.document.clone(),
                fetched_at: self.fetched_at,
            },
        })
    }
}

/// Collapses whitespace and caps the length of a value
pub fn clean_value(value: &str) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
    trimmed.chars().take(MAX_VALUE_CHARS).collect()
}

/// Selects the extractor for a document
///
/// # Returns
///
/// * `Some(ExtractorKind)` - HTML documents containing a `<table>` route to
///   the table extractor, other HTML to the HTML extractor
/// * `None` - The content type has no extractor
pub fn route(document: &FetchedDocument) -> Option<ExtractorKind> {
    match document.kind() {
        ContentKind::Html => {
            if document.text_lossy().to_ascii_lowercase().contains("<table") {
                Some(ExtractorKind::Table)
            } else {
                Some(ExtractorKind::Html)
            }
        }
        ContentKind::Pdf => Some(ExtractorKind::Pdf),
        ContentKind::Image => Some(ExtractorKind::Image),
        ContentKind::Other => None,
    }
}

/// Runs the routed extractor for a document
///
/// Holds the inference client used for OCR and chart recognition.
pub struct ContentRouter {
    images: ImageExtractor,
}

impl ContentRouter {
    pub fn new(client: Arc<dyn InferenceClient>, retry: RetryPolicy) -> Self {
        Self {
            images: ImageExtractor::new(client, retry),
        }
    }

    /// Extracts candidates from a document; never fails
    ///
    /// Parsing runs on the blocking pool. Model calls for OCR and charts
    /// stop early once `cancel` fires.
    pub async fn extract(&self, document: &FetchedDocument, cancel: &CancellationToken) -> Extraction {
        let Some(kind) = route(document) else {
            tracing::debug!(url = %document.url, "no extractor for {}", document.content_type);
            return Extraction::failed(
                ExtractorKind::Html,
                ExtractionError::Unsupported(document.content_type.clone()),
            );
        };

        let extraction = match kind {
            ExtractorKind::Html | ExtractorKind::Table => {
                let with_tables = kind == ExtractorKind::Table;
                parse_blocking(document, move |d| extract_html(&d, with_tables))
                    .await
                    .unwrap_or_else(|e| task_failed(kind, e))
            }
            ExtractorKind::Pdf => match parse_blocking(document, parse_pdf).await {
                Ok((extraction, _)) if extraction.needs_ocr => {
                    tracing::debug!(
                        url = %document.url,
                        "PDF has no usable text layer, rerouting to OCR"
                    );
                    let mut ocr = self.images.extract(document, cancel).await;
                    ocr.diagnostics.splice(0..0, extraction.diagnostics);
                    ocr
                }
                Ok((mut extraction, images)) => {
                    let embedded = self.images.extract_embedded(document, images, cancel).await;
                    extraction.absorb(embedded);
                    extraction
                }
                Err(e) => task_failed(kind, e),
            },
            ExtractorKind::Image => self.images.extract(document, cancel).await,
        };

        for diagnostic in &extraction.diagnostics {
            match diagnostic.severity {
                Severity::Error => tracing::warn!(
                    url = %document.url,
                    content_hash = %document.content_hash,
                    "extraction: {}",
                    diagnostic.message
                ),
                _ => tracing::debug!(url = %document.url, "extraction: {}", diagnostic.message),
            }
        }

        extraction
    }
}

/// Text extraction plus the embedded JPEGs of a PDF with a text layer
fn parse_pdf(document: FetchedDocument) -> (Extraction, Vec<Vec<u8>>) {
    let extraction = extract_pdf(&document);
    let images = if extraction.needs_ocr {
        Vec::new()
    } else {
        embedded_jpegs(&document.body)
    };
    (extraction, images)
}

/// Runs a CPU-bound parser over an owned copy of the document on the blocking pool
async fn parse_blocking<T, F>(document: &FetchedDocument, parse: F) -> Result<T, JoinError>
where
    T: Send + 'static,
    F: FnOnce(FetchedDocument) -> T + Send + 'static,
{
    let owned = document.clone();
    tokio::task::spawn_blocking(move || parse(owned)).await
}

fn task_failed(kind: ExtractorKind, error: JoinError) -> Extraction {
    Extraction::failed(
        kind,
        ExtractionError::Malformed(format!("extractor task failed: {}", error)),
    )
}
