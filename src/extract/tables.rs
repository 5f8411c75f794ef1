//! Tables
//!
//! Tables come from HTML `<table>` elements or from column-aligned lines of
//! PDF text. Two layouts are recognized:
//! - Header tables: the first row names fields, every further row holds values
//! - Key-value tables: the first cell of a row names a field, the next holds its value
//!
//! A header table with a year column and a package column also yields one
//! `placement_history` candidate summarizing every year.

use crate::extract::{CandidateBuilder, ExtractionCandidate, TABLE_CONFIDENCE};
use crate::fusion::schema::{match_label, words, FieldSpec};
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::OnceLock;

/// A grid of cell texts
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Reads the rows of an HTML `<table>` element
    pub fn from_element(table: ElementRef<'_>) -> Self {
        let (Ok(row_selector), Ok(cell_selector)) =
            (Selector::parse("tr"), Selector::parse("th, td"))
        else {
            return Self::default();
        };

        let rows = table
            .select(&row_selector)
            .map(|row| {
                row.select(&cell_selector)
                    .map(|cell| {
                        cell.text()
                            .collect::<Vec<_>>()
                            .join(" ")
                            .split_whitespace()
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|cells: &Vec<String>| cells.iter().any(|c| !c.is_empty()))
            .collect();

        Self { rows }
    }

    /// Groups column-aligned text lines into tables
    ///
    /// A line is table-like when it splits into two or more columns on runs of
    /// two or more spaces, tabs or `|`. Consecutive table-like lines form one
    /// table; a single isolated line still counts (key-value rows).
    pub fn from_lines(text: &str) -> Vec<Self> {
        let mut tables = Vec::new();
        let mut current = Table::default();

        for line in text.lines() {
            match split_columns(line) {
                Some(cells) => current.rows.push(cells),
                None => {
                    if !current.rows.is_empty() {
                        tables.push(std::mem::take(&mut current));
                    }
                }
            }
        }
        if !current.rows.is_empty() {
            tables.push(current);
        }

        tables
    }
}

fn column_separator() -> Option<&'static Regex> {
    static SEPARATOR: OnceLock<Option<Regex>> = OnceLock::new();
    SEPARATOR
        .get_or_init(|| Regex::new(r"\s{2,}|\t|\|").ok())
        .as_ref()
}

fn split_columns(line: &str) -> Option<Vec<String>> {
    let cells: Vec<String> = column_separator()?
        .split(line.trim())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    (cells.len() >= 2).then_some(cells)
}

/// Candidates from one table
///
/// # Arguments
///
/// * `table` - Cell grid
/// * `index` - 1-based position of the table in its document, for locations
/// * `builder` - Provenance and confidence scaling
pub fn table_candidates(
    table: &Table,
    index: usize,
    builder: &CandidateBuilder,
) -> Vec<ExtractionCandidate> {
    let Some(first) = table.rows.first() else {
        return Vec::new();
    };

    let header_fields: Vec<Option<&'static FieldSpec>> =
        first.iter().map(|cell| match_label(cell)).collect();
    let header_matches = header_fields.iter().filter(|f| f.is_some()).count();

    let row_label_matches = table
        .rows
        .iter()
        .skip(1)
        .filter(|row| row.len() >= 2 && row.first().and_then(|c| match_label(c)).is_some())
        .count();

    let mut candidates =
        if header_matches > 0 && header_matches > row_label_matches && table.rows.len() > 1 {
            header_candidates(table, &header_fields, index, builder)
        } else {
            key_value_candidates(table, index, builder)
        };
    candidates.extend(history_candidate(table, index, builder));
    candidates
}

fn header_candidates(
    table: &Table,
    header_fields: &[Option<&'static FieldSpec>],
    index: usize,
    builder: &CandidateBuilder,
) -> Vec<ExtractionCandidate> {
    let mut candidates = Vec::new();

    for (row_index, row) in table.rows.iter().enumerate().skip(1) {
        for (column, spec) in header_fields.iter().enumerate() {
            let (Some(spec), Some(value)) = (spec, row.get(column)) else {
                continue;
            };
            let location = format!(
                "table {}, row {}, column '{}'",
                index,
                row_index + 1,
                table.rows[0][column]
            );
            if let Some(candidate) = builder.candidate(spec.name, value, location, TABLE_CONFIDENCE)
            {
                candidates.push(candidate);
            }
        }
    }

    candidates
}

fn key_value_candidates(
    table: &Table,
    index: usize,
    builder: &CandidateBuilder,
) -> Vec<ExtractionCandidate> {
    let mut candidates = Vec::new();

    for (row_index, row) in table.rows.iter().enumerate() {
        let Some(spec) = row.first().and_then(|label| match_label(label)) else {
            continue;
        };
        let Some(value) = row.iter().skip(1).find(|c| !c.is_empty()) else {
            continue;
        };
        let location = format!("table {}, row {}", index, row_index + 1);
        if let Some(candidate) = builder.candidate(spec.name, value, location, TABLE_CONFIDENCE) {
            candidates.push(candidate);
        }
    }

    candidates
}

const YEAR_HEADERS: &[&str] = &["year", "session", "batch"];
const PACKAGE_HEADERS: &[&str] = &["package", "salary", "ctc"];
/// Package columns in order of preference for the history summary
const PACKAGE_QUALIFIERS: &[&str] = &["average", "avg", "median", "highest"];

fn year_pattern() -> Option<&'static Regex> {
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"\b20\d{2}\b").ok()).as_ref()
}

/// Year-wise summary of a placement table ("2024: 21.8 LPA; 2023: 19.5 LPA")
///
/// Needs a year column, a package column and at least two dated rows. A
/// placement percentage column, when present, is appended to each year.
fn history_candidate(
    table: &Table,
    index: usize,
    builder: &CandidateBuilder,
) -> Option<ExtractionCandidate> {
    let header = table.rows.first()?;
    let header_words: Vec<Vec<String>> = header.iter().map(|cell| words(cell)).collect();
    let year_column = header_words.iter().position(|w| has_word(w, YEAR_HEADERS))?;
    let package_column = PACKAGE_QUALIFIERS
        .iter()
        .find_map(|qualifier| {
            header_words
                .iter()
                .position(|w| has_word(w, &[*qualifier]) && has_word(w, PACKAGE_HEADERS))
        })
        .or_else(|| header_words.iter().position(|w| has_word(w, PACKAGE_HEADERS)))?;
    let percentage_column = header
        .iter()
        .position(|cell| cell.contains('%') || cell.to_lowercase().contains("percentage"));

    let entries: Vec<String> = table
        .rows
        .iter()
        .skip(1)
        .filter_map(|row| {
            let year = year_pattern()?.find(row.get(year_column)?)?.as_str();
            let package = row.get(package_column).filter(|p| !p.is_empty())?;
            let placed = percentage_column
                .and_then(|column| row.get(column))
                .filter(|p| !p.is_empty());
            Some(match placed {
                Some(placed) => format!("{}: {} ({} placed)", year, package, placed),
                None => format!("{}: {}", year, package),
            })
        })
        .collect();

    if entries.len() < 2 {
        return None;
    }
    builder.candidate(
        "placement_history",
        &entries.join("; "),
        format!("table {}, column '{}'", index, header[year_column]),
        TABLE_CONFIDENCE,
    )
}

fn has_word(cell_words: &[String], wanted: &[&str]) -> bool {
    cell_words.iter().any(|w| wanted.contains(&w.as_str()))
}
