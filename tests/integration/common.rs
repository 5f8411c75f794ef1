//! Shared helpers for the integration tests

use college_harvest::config::{parse_config, Config};
use college_harvest::crawler::Orchestrator;
use college_harvest::{Target, TargetRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Slug of the single test target
pub const TARGET_ID: &str = "test-institute-of-technology";

/// Temporary database plus configuration pointing at mock servers
pub struct Harness {
    _dir: TempDir,
    pub db_path: PathBuf,
    pub config: Config,
}

impl Harness {
    /// `inference` is the mock inference base URL; `None` disables inference
    pub fn new(site: &str, inference: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("harvest.db");
        let config = test_config(site, inference, &db_path);
        Self {
            _dir: dir,
            db_path,
            config,
        }
    }

    pub fn targets(&self) -> Vec<Arc<Target>> {
        TargetRegistry::from_config(&self.config)
            .unwrap()
            .all()
            .to_vec()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            "test-config".to_string(),
            self.targets(),
            true,
        )
        .unwrap()
    }
}

pub fn test_config(site: &str, inference: Option<&str>, db_path: &Path) -> Config {
    let toml = format!(
        r#"
[crawler]
max-depth = 2
max-concurrent-fetches = 4
max-concurrent-per-domain = 4
politeness-delay-ms = 0
max-politeness-delay-ms = 1000
follow-patterns = []

[fetcher]
mode = "http"
request-timeout-secs = 5
min-action-delay-ms = 0
max-action-delay-ms = 0

[retry]
max-attempts = 3
base-delay-ms = 10
multiplier = 2.0
max-delay-ms = 100

[inference]
enabled = {enabled}
base-url = "{inference}"

[storage]
database-path = "{db}"

[[target]]
name = "Test Institute of Technology"
aliases = ["TIT"]
root-domain = "127.0.0.1"
seeds = ["{site}/"]
schema-hints = ["placement", "admission"]
"#,
        enabled = inference.is_some(),
        inference = inference.unwrap_or("http://127.0.0.1:9"),
        db = db_path.display(),
        site = site,
    );

    parse_config(&toml).unwrap()
}

/// An HTML page with a two-column placement table
pub fn placement_page(highest_lpa: u32, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">{}</a>"#, href, href))
        .collect();
    format!(
        r#"<html><head><title>Placements</title></head><body>
        <h1>Placement Statistics</h1>
        <table>
          <tr><th>Highest package</th><td>INR {} LPA</td></tr>
          <tr><th>Students placed</th><td>{}</td></tr>
        </table>
        <p>{}</p>
        </body></html>"#,
        highest_lpa,
        300 + highest_lpa,
        anchors
    )
}
