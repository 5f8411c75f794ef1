//! PDF extraction
//!
//! Text comes from the PDF text layer via `pdf-extract`. Confidence is scaled
//! by how clean that text is; a PDF with hardly any text (a scan) is flagged
//! for OCR instead. JPEG images embedded in a text PDF are collected with
//! `lopdf` so the router can OCR them separately.

use crate::document::FetchedDocument;
use crate::extract::tables::{table_candidates, Table};
use crate::extract::text::{label_value_candidates, statistic_candidates};
use crate::extract::{CandidateBuilder, Diagnostic, Extraction, ExtractionError, ExtractorKind};
use lopdf::{Dictionary, Object};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, UnwindSafe};
use std::sync::Once;

/// Non-whitespace characters below which a PDF counts as scanned
pub const MIN_PDF_TEXT_CHARS: usize = 50;

/// Embedded images OCR'd per PDF, largest first
pub const MAX_EMBEDDED_IMAGES: usize = 5;

/// Smaller images (logos, icons, bullets) are not worth an OCR call
const MIN_IMAGE_SIDE: i64 = 100;

const COMMON_PUNCTUATION: &str = ".,;:%()-/&'\"+*#@!?[]₹$";

thread_local! {
    static QUIET_PANICS: Cell<bool> = Cell::new(false);
}

/// Runs a parser, turning a panic into its message
///
/// Panics raised inside `parse` skip the process panic hook, so a malformed
/// document is reported through its diagnostic only.
pub(crate) fn catch_quietly<R>(parse: impl FnOnce() -> R + UnwindSafe) -> Result<R, String> {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !QUIET_PANICS.with(Cell::get) {
                previous(info);
            }
        }));
    });

    let was_quiet = QUIET_PANICS.with(|quiet| quiet.replace(true));
    let result = panic::catch_unwind(parse);
    QUIET_PANICS.with(|quiet| quiet.set(was_quiet));

    result.map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Extracts candidates from a PDF document
///
/// Parser failures and parser panics both end up as a `Malformed` diagnostic.
pub fn extract_pdf(document: &FetchedDocument) -> Extraction {
    let body = document.body.as_slice();

    match catch_quietly(|| pdf_extract::extract_text_from_mem(body)) {
        Ok(Ok(text)) => extract_pdf_text(document, &text),
        Ok(Err(e)) => Extraction::failed(
            ExtractorKind::Pdf,
            ExtractionError::Malformed(format!("PDF parse error: {}", e)),
        ),
        Err(message) => Extraction::failed(
            ExtractorKind::Pdf,
            ExtractionError::Malformed(format!("PDF parser panicked: {}", message)),
        ),
    }
}

/// JPEG images embedded in a PDF, largest first
///
/// Only `DCTDecode` streams are taken: their content is a complete JPEG file
/// that the OCR endpoint accepts as is. Unreadable PDFs yield nothing.
pub fn embedded_jpegs(body: &[u8]) -> Vec<Vec<u8>> {
    let Ok(Ok(document)) = catch_quietly(|| lopdf::Document::load_mem(body)) else {
        return Vec::new();
    };

    let mut images: Vec<(i64, &[u8])> = document
        .objects
        .values()
        .filter_map(|object| match object {
            Object::Stream(stream) => {
                image_area(&stream.dict).map(|area| (area, stream.content.as_slice()))
            }
            _ => None,
        })
        .collect();
    images.sort_by(|a, b| b.0.cmp(&a.0));

    images
        .into_iter()
        .take(MAX_EMBEDDED_IMAGES)
        .map(|(_, content)| content.to_vec())
        .collect()
}

/// Pixel area of a JPEG image XObject large enough to OCR
fn image_area(dict: &Dictionary) -> Option<i64> {
    let subtype = dict.get(b"Subtype").and_then(|o| o.as_name()).ok()?;
    if subtype != b"Image".as_slice() || !is_jpeg_filter(dict.get(b"Filter").ok()?) {
        return None;
    }

    let width = dict.get(b"Width").and_then(|o| o.as_i64()).ok()?;
    let height = dict.get(b"Height").and_then(|o| o.as_i64()).ok()?;
    (width >= MIN_IMAGE_SIDE && height >= MIN_IMAGE_SIDE).then_some(width * height)
}

fn is_jpeg_filter(filter: &Object) -> bool {
    match filter {
        Object::Name(name) => name.as_slice() == b"DCTDecode".as_slice(),
        Object::Array(filters) => {
            filters.len() == 1
                && matches!(&filters[0], Object::Name(name) if name.as_slice() == b"DCTDecode".as_slice())
        }
        _ => false,
    }
}

/// Candidates from the text layer of a PDF
pub(crate) fn extract_pdf_text(document: &FetchedDocument, text: &str) -> Extraction {
    let mut extraction = Extraction::empty(ExtractorKind::Pdf);

    let visible = text.chars().filter(|c| !c.is_whitespace()).count();
    if visible < MIN_PDF_TEXT_CHARS {
        extraction.needs_ocr = true;
        extraction.diagnostics.push(Diagnostic::warning(format!(
            "PDF text layer has {} characters, treating as scanned",
            visible
        )));
        return extraction;
    }

    let fidelity = text_fidelity(text);
    let builder = CandidateBuilder::new(document, "pdf", ExtractorKind::Pdf).scaled(fidelity);
    if fidelity < 0.8 {
        extraction.diagnostics.push(Diagnostic::info(format!(
            "Low text fidelity {:.2}",
            fidelity
        )));
    }

    for (index, table) in Table::from_lines(text).iter().enumerate() {
        extraction
            .candidates
            .extend(table_candidates(table, index + 1, &builder));
    }

    let normalized = normalize_lines(text);
    extraction
        .candidates
        .extend(label_value_candidates(&normalized, &builder));
    extraction
        .candidates
        .extend(statistic_candidates(&normalized, &builder));
    extraction.text = normalized;

    extraction
}

/// Share of characters that look like real text
///
/// Letters, digits, whitespace and common punctuation count as clean;
/// replacement characters and stray glyphs do not.
pub fn text_fidelity(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let clean = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || COMMON_PUNCTUATION.contains(*c))
        .count();
    clean as f64 / total as f64
}

fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
