//! Target registry
//!
//! The closed catalog of college sites a run may crawl. Targets come from the
//! `[[target]]` entries of the configuration, or from the built-in catalog
//! when none are configured. The registry is read-only once built.

use crate::config::{Config, TargetEntry};
use crate::url::normalize_url;
use crate::{ConfigError, HarvestError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Record type a document can be structured into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Admission,
    Placement,
    Internship,
}

impl SchemaType {
    pub const ALL: [SchemaType; 3] = [
        SchemaType::Admission,
        SchemaType::Placement,
        SchemaType::Internship,
    ];

    /// Converts the schema type to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::Placement => "placement",
            Self::Internship => "internship",
        }
    }

    /// Parses a schema type from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "admission" => Some(Self::Admission),
            "placement" => Some(Self::Placement),
            "internship" => Some(Self::Internship),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A college website to crawl
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Stable identifier used as the storage key (slug of the name)
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
    /// Registered domain; the crawl stays within it and its subdomains
    pub root_domain: String,
    /// Normalized entry URLs, crawled at depth 0
    pub seeds: Vec<Url>,
    /// Record types this site is expected to publish
    pub schema_hints: Vec<SchemaType>,
}

impl Target {
    fn from_entry(entry: &TargetEntry) -> Result<Self, ConfigError> {
        let seeds = entry
            .seeds
            .iter()
            .map(|seed| {
                normalize_url(seed).map_err(|e| {
                    ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: slugify(&entry.name),
            name: entry.name.clone(),
            aliases: entry.aliases.clone(),
            root_domain: entry.root_domain.trim_start_matches("*.").to_lowercase(),
            seeds,
            schema_hints: entry.schema_hints.clone(),
        })
    }

    /// Returns true if `name` is this target's name, id, or one of its aliases
    pub fn answers_to(&self, name: &str) -> bool {
        let wanted = name.trim().to_lowercase();
        self.name.to_lowercase() == wanted
            || self.id == wanted
            || self.aliases.iter().any(|a| a.to_lowercase() == wanted)
    }
}

/// Read-only catalog of crawl targets
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<Arc<Target>>,
}

impl TargetRegistry {
    /// Builds the registry from configuration, falling back to the built-in catalog
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if config.targets.is_empty() {
            return Self::builtin();
        }
        Self::from_entries(&config.targets)
    }

    /// Builds the registry from explicit entries
    pub fn from_entries(entries: &[TargetEntry]) -> Result<Self, ConfigError> {
        let targets = entries
            .iter()
            .map(|entry| Target::from_entry(entry).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { targets })
    }

    /// The built-in catalog of institutions
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_entries(&builtin_entries())
    }

    pub fn all(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Finds a target by name, id or alias (case-insensitive)
    pub fn find(&self, name: &str) -> Option<Arc<Target>> {
        self.targets.iter().find(|t| t.answers_to(name)).cloned()
    }

    /// Finds a target by its storage id
    pub fn by_id(&self, id: &str) -> Option<Arc<Target>> {
        self.targets.iter().find(|t| t.id == id).cloned()
    }

    /// Selects the targets for a run: one named target, or all of them
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<Arc<Target>>)` - The selected targets
    /// * `Err(HarvestError::UnknownTarget)` - No target answers to `name`
    pub fn select(&self, name: Option<&str>) -> Result<Vec<Arc<Target>>, HarvestError> {
        match name {
            Some(name) => self
                .find(name)
                .map(|t| vec![t])
                .ok_or_else(|| HarvestError::UnknownTarget(name.to_string())),
            None => Ok(self.targets.clone()),
        }
    }
}

/// Lowercase, ASCII-alphanumeric words joined by hyphens
fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn builtin_entries() -> Vec<TargetEntry> {
    fn entry(
        name: &str,
        aliases: &[&str],
        domain: &str,
        base: &str,
        paths: &[&str],
    ) -> TargetEntry {
        let mut seeds = vec![base.to_string()];
        seeds.extend(paths.iter().map(|p| format!("{}{}", base, p)));
        TargetEntry {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            root_domain: domain.to_string(),
            seeds,
            schema_hints: vec![
                SchemaType::Admission,
                SchemaType::Placement,
                SchemaType::Internship,
            ],
        }
    }

    vec![
        entry(
            "Indian Institute of Technology Delhi",
            &["IIT Delhi", "IITD"],
            "iitd.ac.in",
            "https://home.iitd.ac.in/",
            &[
                "admissions",
                "undergraduate-admissions",
                "pg-admissions",
                "career",
                "placement",
                "training-placement",
            ],
        ),
        entry(
            "Indian Institute of Technology Bombay",
            &["IIT Bombay", "IITB"],
            "iitb.ac.in",
            "https://www.iitb.ac.in/",
            &[
                "en/education/admissions",
                "newacadhome/UGAdmission.jsp",
                "newacadhome/PGAdmission.jsp",
                "en/career-and-placement",
                "placement",
            ],
        ),
        entry(
            "University of Delhi",
            &["DU", "Delhi University"],
            "du.ac.in",
            "http://www.du.ac.in/",
            &[
                "admissions",
                "admissions/ug-admissions",
                "admissions/pg-admissions",
                "placement-cell",
                "CIC/index.php",
            ],
        ),
        entry(
            "Vellore Institute of Technology",
            &["VIT"],
            "vit.ac.in",
            "https://vit.ac.in/",
            &["admissions", "ug", "pg", "placement", "campus-placements"],
        ),
        entry(
            "Birla Institute of Technology and Science, Pilani",
            &["BITS Pilani", "BITS"],
            "bits-pilani.ac.in",
            "https://www.bits-pilani.ac.in/",
            &["admissions", "bitsat", "phd-admissions", "placement", "placements"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let registry = TargetRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 5);

        for target in registry.all() {
            assert!(!target.seeds.is_empty());
            for seed in &target.seeds {
                let host = seed.host_str().unwrap();
                assert!(
                    crate::url::in_scope(&target.root_domain, host),
                    "{} seed {} out of scope",
                    target.name,
                    seed
                );
            }
        }
    }

    #[test]
    fn test_find_by_alias_case_insensitive() {
        let registry = TargetRegistry::builtin().unwrap();
        let target = registry.find("iitd").unwrap();
        assert_eq!(target.name, "Indian Institute of Technology Delhi");
        assert!(registry.find("bits pilani").is_some());
        assert!(registry.find("MIT").is_none());
    }

    #[test]
    fn test_select_unknown_target() {
        let registry = TargetRegistry::builtin().unwrap();
        assert!(matches!(
            registry.select(Some("Hogwarts")),
            Err(HarvestError::UnknownTarget(_))
        ));
        assert_eq!(registry.select(None).unwrap().len(), 5);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify("Birla Institute of Technology and Science, Pilani"),
            "birla-institute-of-technology-and-science-pilani"
        );
        assert_eq!(slugify("  VIT  "), "vit");
    }

    #[test]
    fn test_config_targets_override_builtin() {
        let mut config = Config::default();
        config.targets = vec![TargetEntry {
            name: "Test College".to_string(),
            aliases: vec!["TC".to_string()],
            root_domain: "*.test.edu".to_string(),
            seeds: vec!["https://www.TEST.edu/admissions/".to_string()],
            schema_hints: vec![SchemaType::Admission],
        }];

        let registry = TargetRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        let target = registry.by_id("test-college").unwrap();
        assert_eq!(target.root_domain, "test.edu");
        assert_eq!(target.seeds[0].as_str(), "https://www.test.edu/admissions");
    }

    #[test]
    fn test_schema_type_db_roundtrip() {
        for schema in SchemaType::ALL {
            assert_eq!(SchemaType::from_db_string(schema.to_db_string()), Some(schema));
        }
        assert_eq!(SchemaType::from_db_string("general"), None);
    }
}
