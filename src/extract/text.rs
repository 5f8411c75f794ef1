//! Free-text heuristics shared by every extractor
//!
//! - Main-content isolation for HTML
//! - "Label: value" lines matched against the field catalog
//! - Regex statistics (packages, placement counts, seats, internships,
//!   higher studies and startups, recruitment channels)

use crate::extract::{CandidateBuilder, ExtractionCandidate, LABEL_CONFIDENCE, STATISTIC_CONFIDENCE};
use crate::fusion::schema::{match_label, words};
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::sync::OnceLock;

/// Elements that never carry main content
const SKIPPED_ELEMENTS: &[&str] = &[
    "head", "script", "style", "nav", "footer", "header", "noscript", "svg", "iframe", "template",
];

/// Elements that start a new line of text
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "form", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre",
    "section", "table", "tbody", "thead", "tr", "ul",
];

/// Readable text of an HTML document without navigation and page chrome
///
/// Block elements become line breaks and table cells are separated by `|`,
/// so each line holds one paragraph, list item or table row.
pub fn main_text(document: &Html) -> String {
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    raw.lines()
        .map(|line| {
            line.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .trim_matches(|c: char| c == '|' || c.is_whitespace())
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };

                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.push('\n');
                } else if name == "td" || name == "th" {
                    out.push_str(" | ");
                }
                collect_text(child_element, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Candidates from lines shaped like "Label: value"
pub fn label_value_candidates(text: &str, builder: &CandidateBuilder) -> Vec<ExtractionCandidate> {
    let mut candidates = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        if label.len() < 3 || label.len() > 60 || words(label).len() > 8 {
            continue;
        }
        if value.trim_start().starts_with("//") {
            continue;
        }
        let Some(spec) = match_label(label) else {
            continue;
        };

        if let Some(candidate) = builder.candidate(
            spec.name,
            value,
            format!("line {}", index + 1),
            LABEL_CONFIDENCE,
        ) {
            candidates.push(candidate);
        }
    }

    candidates
}

struct StatisticPattern {
    field: &'static str,
    regex: Regex,
    suffix: &'static str,
}

const AMOUNT: &str = r"(?:rs\.?|inr|₹)?\s*(\d+(?:,\d+)*(?:\.\d+)?)\s*(lpa|lakhs?|lacs?|crores?|cr)?";

fn statistic_patterns() -> &'static [StatisticPattern] {
    static PATTERNS: OnceLock<Vec<StatisticPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let package = |qualifier: &str| {
            format!(
                r"(?i)(?:{})\s+(?:package|salary|ctc)(?:\s+(?:is|was|of|offered))?\s*[:\-]?\s*{}",
                qualifier, AMOUNT
            )
        };

        let specs: Vec<(&'static str, String, &'static str)> = vec![
            ("highest_package", package("highest|maximum"), ""),
            ("average_package", package("average|avg\\.?"), ""),
            ("median_package", package("median"), ""),
            (
                "students_placed",
                r"(?i)(\d+)\s+students\s+(?:were\s+|got\s+)?placed".to_string(),
                "",
            ),
            (
                "students_placed",
                r"(?i)number\s+of\s+students\s+placed\s*(?:is|was|:)?\s*(\d+)".to_string(),
                "",
            ),
            (
                "placement_percentage",
                r"(?i)placement\s+(?:percentage|rate)\s*(?:is|was|of|:)?\s*(\d+(?:\.\d+)?)\s*%"
                    .to_string(),
                "%",
            ),
            (
                "placement_percentage",
                r"(?i)(\d+(?:\.\d+)?)\s*%\s+(?:of\s+)?(?:the\s+)?(?:students\s+)?(?:were\s+)?placed"
                    .to_string(),
                "%",
            ),
            (
                "internship_offers",
                r"(?i)(\d+)\s+(?:students\s+)?(?:received|got|were\s+offered)\s+internships?"
                    .to_string(),
                "",
            ),
            (
                "internship_offers",
                r"(?i)(?:offered|provided)\s+(\d+)\s+internships".to_string(),
                "",
            ),
            (
                "internship_stipend",
                r"(?i)stipend\s*(?:of|is|:)?\s*(?:up\s+to\s+)?(?:rs\.?|inr|₹)\s*(\d+(?:,\d+)*)"
                    .to_string(),
                "",
            ),
            (
                "higher_studies",
                r"(?i)(\d+(?:\.\d+)?)\s*%\s+(?:of\s+)?(?:the\s+)?(?:students\s+)?(?:went\s+for|opted\s+for|pursuing|pursued)\s+higher\s+studies"
                    .to_string(),
                "%",
            ),
            (
                "higher_studies",
                r"(?i)higher\s+studies\s*[:\-]?\s*(\d+(?:\.\d+)?)\s*%".to_string(),
                "%",
            ),
            (
                "higher_studies",
                r"(?i)(\d+)\s+students\s+(?:went\s+for|opted\s+for|pursuing|pursued)\s+higher\s+studies"
                    .to_string(),
                " students",
            ),
            (
                "studies_abroad",
                r"(?i)(\d+(?:\.\d+)?)\s*%\s+(?:of\s+)?(?:the\s+)?(?:students\s+)?(?:went|are\s+studying|studying)\s+abroad"
                    .to_string(),
                "%",
            ),
            (
                "studies_abroad",
                r"(?i)(?:study|studies)\s+abroad\s*[:\-]?\s*(\d+(?:\.\d+)?)\s*%".to_string(),
                "%",
            ),
            (
                "studies_abroad",
                r"(?i)(\d+)\s+students\s+(?:went|are\s+studying|studying)\s+abroad".to_string(),
                " students",
            ),
            (
                "startups_founded",
                r"(?i)(\d+(?:\.\d+)?)\s*%\s+(?:of\s+)?(?:the\s+)?(?:students\s+)?founded\s+(?:their\s+own\s+)?(?:startups|companies|ventures)"
                    .to_string(),
                "%",
            ),
            (
                "startups_founded",
                r"(?i)(\d+)\s+students\s+founded\s+(?:their\s+own\s+)?(?:startups|companies|ventures)"
                    .to_string(),
                " students",
            ),
            (
                "startups_founded",
                r"(?i)(\d+)\s+(?:student\s+)?(?:startups|ventures)\s+(?:were\s+)?(?:founded|launched|incubated)"
                    .to_string(),
                " startups",
            ),
            (
                "seats_available",
                r"(?i)total(?:\s+number\s+of)?\s+(?:seats|intake)\s*(?:is|are|:)?\s*(\d+)"
                    .to_string(),
                "",
            ),
        ];

        specs
            .into_iter()
            .filter_map(|(field, pattern, suffix)| match Regex::new(&pattern) {
                Ok(regex) => Some(StatisticPattern {
                    field,
                    regex,
                    suffix,
                }),
                Err(e) => {
                    tracing::error!(field, "invalid statistic pattern: {}", e);
                    None
                }
            })
            .collect()
    })
}

/// Candidates from numeric statements in free text ("average package of 12.5 LPA")
pub fn statistic_candidates(text: &str, builder: &CandidateBuilder) -> Vec<ExtractionCandidate> {
    let mut candidates: Vec<ExtractionCandidate> = Vec::new();

    for pattern in statistic_patterns() {
        for captures in pattern.regex.captures_iter(text) {
            let Some(number) = captures.get(1) else {
                continue;
            };
            let mut value = number.as_str().to_string();
            if let Some(unit) = captures.get(2) {
                value.push(' ');
                value.push_str(&unit.as_str().to_lowercase());
            }
            value.push_str(pattern.suffix);

            let duplicate = candidates
                .iter()
                .any(|c| c.field == pattern.field && c.value == value);
            if duplicate {
                continue;
            }

            if let Some(candidate) = builder.candidate(
                pattern.field,
                &value,
                format!("offset {}", number.start()),
                STATISTIC_CONFIDENCE,
            ) {
                candidates.push(candidate);
            }
        }
    }

    candidates.extend(recruitment_types_candidate(text, builder));
    candidates
}

/// Recruitment channels and the label used for them in values
const CHANNELS: &[(&str, &str)] = &[
    ("on", "on-campus"),
    ("off", "off-campus"),
    ("pool", "pool-campus"),
];

fn channel_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CHANNELS
            .iter()
            .filter_map(|(prefix, label)| {
                let pattern = format!(
                    r"(?i)\b{p}[\s-]campus(?:\s+(?:placements?|recruitment|drives?))?(?:\s+percentage)?\s*(?:is|was|:|-)?\s*(\d+(?:\.\d+)?)\s*%|(\d+(?:\.\d+)?)\s*%\s+(?:of\s+)?(?:the\s+)?(?:students\s+)?(?:were\s+)?(?:placed|recruited)\s+(?:through|via)\s+{p}[\s-]campus",
                    p = prefix
                );
                match Regex::new(&pattern) {
                    Ok(regex) => Some((*label, regex)),
                    Err(e) => {
                        tracing::error!(channel = *label, "invalid recruitment pattern: {}", e);
                        None
                    }
                }
            })
            .collect()
    })
}

/// One candidate naming the share of each recruitment channel found in the
/// text ("on-campus 80%, off-campus 15%")
fn recruitment_types_candidate(text: &str, builder: &CandidateBuilder) -> Option<ExtractionCandidate> {
    let mut first_offset = None;
    let shares: Vec<String> = channel_patterns()
        .iter()
        .filter_map(|(label, regex)| {
            let captures = regex.captures(text)?;
            let share = captures.get(1).or_else(|| captures.get(2))?;
            first_offset = Some(first_offset.map_or(share.start(), |o: usize| o.min(share.start())));
            Some(format!("{} {}%", label, share.as_str()))
        })
        .collect();

    if shares.is_empty() {
        return None;
    }
    builder.candidate(
        "recruitment_types",
        &shares.join(", "),
        format!("offset {}", first_offset.unwrap_or(0)),
        STATISTIC_CONFIDENCE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FetchedDocument;
    use crate::extract::ExtractorKind;
    use chrono::Utc;

    fn builder() -> CandidateBuilder {
        let doc = FetchedDocument::new("vit", "https://vit.ac.in/", None, b"x".to_vec(), Utc::now());
        CandidateBuilder::new(&doc, "html", ExtractorKind::Html)
    }

    #[test]
    fn test_main_text_drops_chrome() {
        let html = Html::parse_document(
            r#"<html><head><title>T</title><style>p{}</style></head><body>
               <header>Site Header</header><nav><a>Home</a></nav>
               <p>Last date: <b>30 June 2024</b></p>
               <script>var x = 1;</script>
               <table><tr><td>Average Package</td><td>12 LPA</td></tr></table>
               <footer>Copyright</footer></body></html>"#,
        );
        let text = main_text(&html);

        assert!(text.contains("Last date: 30 June 2024"));
        assert!(text.contains("Average Package | 12 LPA"));
        assert!(!text.contains("Site Header"));
        assert!(!text.contains("Home"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn test_label_value_lines() {
        let text = "Welcome\nLast date to apply: 30 June 2024\nVisit: https://vit.ac.in\nFee Structure: INR 1,98,000 per year";
        let candidates = label_value_candidates(text, &builder());

        let fields: Vec<_> = candidates.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["application_deadline", "fee_structure"]);
        assert_eq!(candidates[0].value, "30 June 2024");
        assert_eq!(candidates[0].location, "line 2");
        assert!((candidates[0].confidence - LABEL_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_statistics() {
        let text = "The average package was 12.5 LPA while the highest package of INR 1.2 crore \
                    was offered. 450 students were placed this year; placement percentage: 92.5%.";
        let candidates = statistic_candidates(text, &builder());

        let find = |field: &str| {
            candidates
                .iter()
                .find(|c| c.field == field)
                .map(|c| c.value.clone())
        };
        assert_eq!(find("average_package").as_deref(), Some("12.5 lpa"));
        assert_eq!(find("highest_package").as_deref(), Some("1.2 crore"));
        assert_eq!(find("students_placed").as_deref(), Some("450"));
        assert_eq!(find("placement_percentage").as_deref(), Some("92.5%"));
        assert!(candidates
            .iter()
            .all(|c| (c.confidence - STATISTIC_CONFIDENCE).abs() < 1e-9));
    }

    #[test]
    fn test_alternative_paths() {
        let text = "Of the graduating batch, 18% opted for higher studies and 42 students went abroad. \
                    Entrepreneurship remains strong: 7 student startups were incubated this year.";
        let candidates = statistic_candidates(text, &builder());

        let values = |field: &str| -> Vec<String> {
            candidates
                .iter()
                .filter(|c| c.field == field)
                .map(|c| c.value.clone())
                .collect()
        };
        assert_eq!(values("higher_studies"), vec!["18%"]);
        assert_eq!(values("studies_abroad"), vec!["42 students"]);
        assert_eq!(values("startups_founded"), vec!["7 startups"]);
        assert!(values("placement_percentage").is_empty());
    }

    #[test]
    fn test_recruitment_channels() {
        let text = "On-campus placement: 80%. Off campus placements - 15%. \
                    5% of students were recruited through pool campus drives.";
        let candidates = statistic_candidates(text, &builder());

        let channels: Vec<_> = candidates
            .iter()
            .filter(|c| c.field == "recruitment_types")
            .collect();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].value, "on-campus 80%, off-campus 15%, pool-campus 5%");
        assert_eq!(channels[0].location, "offset 21");
    }

    #[test]
    fn test_statistics_ignore_unrelated_numbers() {
        assert!(statistic_candidates("Founded in 1984 with 12 departments.", &builder()).is_empty());
    }
}
