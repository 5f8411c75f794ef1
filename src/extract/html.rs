//! HTML and embedded-table extraction

use crate::document::FetchedDocument;
use crate::extract::tables::{table_candidates, Table};
use crate::extract::text::{label_value_candidates, main_text, statistic_candidates};
use crate::extract::{
    CandidateBuilder, Extraction, ExtractionCandidate, ExtractionError, ExtractorKind,
    DEFINITION_CONFIDENCE, HEADING_CONFIDENCE,
};
use crate::fusion::schema::match_label;
use scraper::{ElementRef, Html, Selector};

/// Extracts candidates from an HTML page
///
/// Structural heuristics run from most to least reliable: tables (when
/// `with_tables` is set), definition lists, headings followed by content,
/// "Label: value" lines and finally free-text statistics.
pub fn extract_html(document: &FetchedDocument, with_tables: bool) -> Extraction {
    let kind = if with_tables {
        ExtractorKind::Table
    } else {
        ExtractorKind::Html
    };

    let raw = document.text_lossy();
    if raw.trim().is_empty() {
        return Extraction::failed(kind, ExtractionError::Empty);
    }

    let html = Html::parse_document(&raw);
    let builder = CandidateBuilder::new(document, "html", kind);
    let mut extraction = Extraction::empty(kind);
    extraction.text = main_text(&html);

    if with_tables {
        if let Ok(selector) = Selector::parse("table") {
            let tables = builder.with_source("table");
            for (index, element) in html.select(&selector).enumerate() {
                let table = Table::from_element(element);
                extraction
                    .candidates
                    .extend(table_candidates(&table, index + 1, &tables));
            }
        }
    }

    extraction
        .candidates
        .extend(definition_candidates(&html, &builder));
    extraction
        .candidates
        .extend(heading_candidates(&html, &builder));
    extraction
        .candidates
        .extend(label_value_candidates(&extraction.text, &builder));
    extraction
        .candidates
        .extend(statistic_candidates(&extraction.text, &builder));

    if extraction.text.is_empty() {
        extraction
            .diagnostics
            .push(ExtractionError::Empty.into());
    }

    extraction
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn next_element_sibling(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.next_siblings().find_map(ElementRef::wrap)
}

/// `<dt>` terms matched against the catalog, valued by the following `<dd>`
fn definition_candidates(html: &Html, builder: &CandidateBuilder) -> Vec<ExtractionCandidate> {
    let Ok(selector) = Selector::parse("dt") else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for (index, term) in html.select(&selector).enumerate() {
        let label = element_text(term);
        let Some(spec) = match_label(&label) else {
            continue;
        };
        let Some(definition) = next_element_sibling(term).filter(|e| e.value().name() == "dd")
        else {
            continue;
        };

        if let Some(candidate) = builder.candidate(
            spec.name,
            &element_text(definition),
            format!("definition {} '{}'", index + 1, label),
            DEFINITION_CONFIDENCE,
        ) {
            candidates.push(candidate);
        }
    }

    candidates
}

/// Section headings matched against the catalog, valued by the next block
fn heading_candidates(html: &Html, builder: &CandidateBuilder) -> Vec<ExtractionCandidate> {
    let Ok(selector) = Selector::parse("h2, h3, h4") else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for heading in html.select(&selector) {
        let label = element_text(heading);
        if label.len() > 80 {
            continue;
        }
        let Some(spec) = match_label(&label) else {
            continue;
        };
        let Some(content) = next_element_sibling(heading)
            .filter(|e| !matches!(e.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6"))
        else {
            continue;
        };

        if let Some(candidate) = builder.candidate(
            spec.name,
            &element_text(content),
            format!("heading '{}'", label),
            HEADING_CONFIDENCE,
        ) {
            candidates.push(candidate);
        }
    }

    candidates
}
