//! Field catalog per record schema
//!
//! Each schema type expects a fixed set of fields. A field carries the label
//! phrases that identify it in page structure (table headers, definition
//! terms, "Label: value" lines) and the question asked of the QA endpoint.

use crate::registry::SchemaType;

/// One expected field of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub schema: SchemaType,
    /// Lowercase phrases matched on word boundaries
    pub labels: &'static [&'static str],
    pub question: &'static str,
}

pub const FIELDS: &[FieldSpec] = &[
    // admission
    FieldSpec {
        name: "application_deadline",
        schema: SchemaType::Admission,
        labels: &[
            "application deadline",
            "last date",
            "last date to apply",
            "registration deadline",
            "admission date",
            "important dates",
            "closing date",
        ],
        question: "What is the last date or deadline to apply for admission?",
    },
    FieldSpec {
        name: "courses_offered",
        schema: SchemaType::Admission,
        labels: &[
            "courses offered",
            "programs offered",
            "programmes offered",
            "available courses",
            "courses",
            "programs",
            "programmes",
            "specializations",
            "branches",
            "disciplines",
        ],
        question: "Which courses or programmes are offered for admission?",
    },
    FieldSpec {
        name: "eligibility",
        schema: SchemaType::Admission,
        labels: &[
            "eligibility",
            "eligibility criteria",
            "minimum marks",
            "qualifying exam",
            "admission criteria",
            "required percentage",
            "cut off",
        ],
        question: "What are the eligibility criteria for admission?",
    },
    FieldSpec {
        name: "fee_structure",
        schema: SchemaType::Admission,
        labels: &[
            "fee structure",
            "tuition fee",
            "tuition fees",
            "course fee",
            "fees",
            "fee",
            "tuition",
        ],
        question: "What is the fee structure or tuition fee?",
    },
    FieldSpec {
        name: "seats_available",
        schema: SchemaType::Admission,
        labels: &[
            "total seats",
            "seats available",
            "available seats",
            "seat matrix",
            "intake",
            "seats",
            "capacity",
        ],
        question: "How many seats are available?",
    },
    FieldSpec {
        name: "hostel_facilities",
        schema: SchemaType::Admission,
        labels: &[
            "hostel facility",
            "hostel facilities",
            "hostel availability",
            "hostel",
            "accommodation",
        ],
        question: "What hostel facilities are available?",
    },
    FieldSpec {
        name: "entrance_exam",
        schema: SchemaType::Admission,
        labels: &[
            "entrance exam",
            "entrance examination",
            "entrance test",
            "admission test",
            "qualifying examination",
        ],
        question: "Which entrance exam is required for admission?",
    },
    // placement
    FieldSpec {
        name: "highest_package",
        schema: SchemaType::Placement,
        labels: &[
            "highest package",
            "highest salary",
            "highest ctc",
            "maximum package",
            "max package",
            "max ctc",
            "highest",
        ],
        question: "What is the highest package offered in placements?",
    },
    FieldSpec {
        name: "average_package",
        schema: SchemaType::Placement,
        labels: &[
            "average package",
            "average salary",
            "average ctc",
            "avg package",
            "avg ctc",
            "average",
        ],
        question: "What is the average package offered in placements?",
    },
    FieldSpec {
        name: "median_package",
        schema: SchemaType::Placement,
        labels: &["median package", "median salary", "median ctc", "median"],
        question: "What is the median package offered in placements?",
    },
    FieldSpec {
        name: "students_placed",
        schema: SchemaType::Placement,
        labels: &[
            "students placed",
            "number of students placed",
            "no of students placed",
            "total placed",
            "placed",
            "selections",
        ],
        question: "How many students were placed?",
    },
    FieldSpec {
        name: "placement_percentage",
        schema: SchemaType::Placement,
        labels: &[
            "placement percentage",
            "placement rate",
            "percentage placed",
            "percentage of students placed",
        ],
        question: "What percentage of students were placed?",
    },
    FieldSpec {
        name: "recruiters",
        schema: SchemaType::Placement,
        labels: &[
            "top recruiters",
            "major recruiters",
            "recruiting companies",
            "companies visited",
            "recruiters",
            "companies",
        ],
        question: "Which companies recruited students?",
    },
    FieldSpec {
        name: "placement_history",
        schema: SchemaType::Placement,
        labels: &[
            "placement history",
            "year wise placement",
            "year wise placements",
            "previous years placement",
            "placement trend",
        ],
        question: "What were the placement statistics in previous years?",
    },
    FieldSpec {
        name: "higher_studies",
        schema: SchemaType::Placement,
        labels: &["higher studies", "higher education", "opted for higher studies"],
        question: "How many students opted for higher studies?",
    },
    FieldSpec {
        name: "studies_abroad",
        schema: SchemaType::Placement,
        labels: &[
            "studies abroad",
            "study abroad",
            "abroad studies",
            "higher studies abroad",
        ],
        question: "How many students went abroad for further studies?",
    },
    FieldSpec {
        name: "startups_founded",
        schema: SchemaType::Placement,
        labels: &["startups founded", "startups", "entrepreneurship", "student ventures"],
        question: "How many students founded startups?",
    },
    FieldSpec {
        name: "recruitment_types",
        schema: SchemaType::Placement,
        labels: &[
            "recruitment type",
            "recruitment types",
            "mode of recruitment",
            "recruitment mode",
        ],
        question: "What share of placements were on-campus, off-campus and pool-campus?",
    },
    // internship
    FieldSpec {
        name: "internship_stipend",
        schema: SchemaType::Internship,
        labels: &["internship stipend", "stipend", "highest stipend", "average stipend"],
        question: "What stipend is offered for internships?",
    },
    FieldSpec {
        name: "internship_companies",
        schema: SchemaType::Internship,
        labels: &[
            "internship companies",
            "internship providers",
            "internship recruiters",
            "companies offering internships",
        ],
        question: "Which companies offered internships?",
    },
    FieldSpec {
        name: "internship_duration",
        schema: SchemaType::Internship,
        labels: &["internship duration", "duration of internship", "duration"],
        question: "How long are the internships?",
    },
    FieldSpec {
        name: "internship_offers",
        schema: SchemaType::Internship,
        labels: &[
            "internship offers",
            "internships offered",
            "number of internships",
            "internship count",
        ],
        question: "How many internship offers were made?",
    },
];

/// Page phrases that indicate a schema, used by the keyword classifier
pub fn content_indicators(schema: SchemaType) -> &'static [&'static str] {
    match schema {
        SchemaType::Admission => &[
            "admission process",
            "how to apply",
            "eligibility criteria",
            "important dates",
            "application form",
            "entrance exam",
            "admission schedule",
            "fee structure",
            "hostel facility",
            "seat matrix",
            "reservation policy",
            "required documents",
            "admission",
        ],
        SchemaType::Placement => &[
            "placement record",
            "placement statistics",
            "recruiting companies",
            "highest package",
            "average package",
            "median salary",
            "placement cell",
            "campus recruitment",
            "placement brochure",
            "placement report",
            "recruiting partners",
            "higher studies",
            "placement",
        ],
        SchemaType::Internship => &[
            "internship opportunities",
            "summer internship",
            "internship offers",
            "internship stipend",
            "industrial training",
            "internship",
        ],
    }
}

/// Fields expected for a schema, in catalog order
pub fn fields_for(schema: SchemaType) -> impl Iterator<Item = &'static FieldSpec> {
    FIELDS.iter().filter(move |f| f.schema == schema)
}

/// Looks up a field by name
pub fn field(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

/// Maps a free-form label to the most specific matching field
///
/// The field whose matching phrase has the most words wins; ties go to the
/// field listed first in the catalog.
pub fn match_label(label: &str) -> Option<&'static FieldSpec> {
    let words = words(label);
    if words.is_empty() || words.len() > 12 {
        return None;
    }

    let mut best: Option<(&'static FieldSpec, usize)> = None;
    for spec in FIELDS {
        for phrase in spec.labels {
            let phrase_words = self::words(phrase);
            if contains_phrase(&words, &phrase_words)
                && best.map_or(true, |(_, len)| phrase_words.len() > len)
            {
                best = Some((spec, phrase_words.len()));
            }
        }
    }
    best.map(|(spec, _)| spec)
}

/// Same as `match_label` restricted to a field name the caller already knows
/// (e.g. a chart series named after a field)
pub fn resolve_field_name(name: &str) -> Option<&'static FieldSpec> {
    field(name).or_else(|| match_label(&name.replace('_', " ")))
}

/// Lowercased alphanumeric words of a string
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// True if `needle` occurs as a contiguous word sequence in `haystack`
pub fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|window| window == needle)
}
