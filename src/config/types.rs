use crate::registry::SchemaType;
use serde::Deserialize;

/// Main configuration structure for College Harvest
///
/// Every section is optional; missing sections and keys take the defaults
/// below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Crawl targets; empty means "use the built-in catalog"
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetEntry>,
}

/// Frontier and scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum link depth from a seed URL
    pub max_depth: u32,

    /// Global task budget for one run, across all targets
    pub max_tasks: u32,

    /// Task budget per target
    pub max_pages_per_target: u32,

    /// Maximum number of fetches in flight across all domains
    pub max_concurrent_fetches: u32,

    /// Maximum number of fetches in flight against one domain
    pub max_concurrent_per_domain: u32,

    /// Minimum time between requests to the same domain (milliseconds)
    pub politeness_delay_ms: u64,

    /// Ceiling for the adaptively increased politeness delay (milliseconds)
    pub max_politeness_delay_ms: u64,

    /// Responses slower than this are treated as a blocking signal (milliseconds)
    pub slow_response_ms: u64,

    /// Whether robots.txt is consulted before a task is handed out
    pub respect_robots: bool,

    /// Agent token used for robots.txt matching
    pub robots_agent: String,

    /// Regexes a discovered link must match to be followed; empty follows every link in scope
    pub follow_patterns: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_tasks: 250,
            max_pages_per_target: 50,
            max_concurrent_fetches: 8,
            max_concurrent_per_domain: 2,
            politeness_delay_ms: 3_000,
            max_politeness_delay_ms: 60_000,
            slow_response_ms: 10_000,
            respect_robots: true,
            robots_agent: "college-harvest".to_string(),
            follow_patterns: [
                r"admission|apply|enrol|courses?",
                r"programs?/[a-z-]+",
                r"undergraduate|postgraduate|graduate|phd|\bug\b|\bpg\b",
                r"fee|hostel|scholarships?",
                r"seat|capacity|selection|eligibility",
                r"placement|career|recruit|jobs?",
                r"training[-_]and[-_]placement|tnp",
                r"internship|companies|packages?",
                r"salary|alumni|\.pdf$",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

/// Fetch mode selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Headless browser: executes page scripts, human-like pacing
    Browser,
    /// Direct HTTP retrieval, no script execution
    Http,
}

/// Fetcher and anti-detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetcherConfig {
    pub mode: FetchMode,

    /// Wall-clock deadline for a lightweight fetch (seconds)
    pub request_timeout_secs: u64,

    /// Wall-clock deadline for a browser fetch, including pacing (seconds)
    pub browser_timeout_secs: u64,

    /// Client identity strings rotated per request
    pub user_agents: Vec<String>,

    /// Optional egress proxies (http:// or https:// URLs)
    pub proxies: Vec<String>,

    /// Number of requests sent through one proxy before switching
    pub rotate_proxy_every: u32,

    /// Lower bound of the randomized pre-request delay (milliseconds)
    pub min_action_delay_ms: u64,

    /// Upper bound of the randomized pre-request delay (milliseconds)
    pub max_action_delay_ms: u64,

    /// Case-insensitive body markers that indicate an anti-bot challenge page
    pub captcha_markers: Vec<String>,

    /// Status codes reported as a block rather than an ordinary HTTP error
    pub block_statuses: Vec<u16>,

    /// Responses larger than this are rejected (bytes)
    pub max_body_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Browser,
            request_timeout_secs: 15,
            browser_timeout_secs: 30,
            user_agents: [
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            proxies: Vec::new(),
            rotate_proxy_every: 10,
            min_action_delay_ms: 3_000,
            max_action_delay_ms: 10_000,
            captcha_markers: [
                "cf-browser-verification",
                "challenge-platform",
                "attention required! | cloudflare",
                "verify you are human",
                "unusual traffic from your computer",
                "captcha-delivery",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            block_statuses: vec![403, 429, 503],
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Retry policy shared by fetch tasks, inference stages and storage commits
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,

    /// Growth factor applied per further retry
    pub multiplier: f64,

    /// Upper bound for any single delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Hosted inference endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InferenceConfig {
    /// When false no endpoint is called and fusion relies on extractor candidates
    pub enabled: bool,

    pub base_url: String,
    pub classify_path: String,
    pub entities_path: String,
    pub question_path: String,
    pub ocr_path: String,
    pub chart_path: String,

    /// Sent as a bearer token when present
    pub api_key: Option<String>,

    /// Per-call deadline (seconds)
    pub timeout_secs: u64,

    /// Candidates below this confidence never resolve a field
    pub min_confidence: f64,

    /// Model classifications below this confidence fall back to keyword scoring
    pub classification_threshold: f64,

    /// Text sent to the classification stage is truncated to this many characters
    pub max_classify_chars: usize,

    /// Context sent to entity and question stages is truncated to this many characters
    pub max_context_chars: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://greninja253-web-crawl.hf.space".to_string(),
            classify_path: "/classify/document".to_string(),
            entities_path: "/extract/entities".to_string(),
            question_path: "/answer/question".to_string(),
            ocr_path: "/extract/ocr".to_string(),
            chart_path: "/analyze/chart".to_string(),
            api_key: None,
            timeout_secs: 30,
            min_confidence: 0.5,
            classification_threshold: 0.6,
            max_classify_chars: 10_000,
            max_context_chars: 15_000,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Commit attempts before storage unavailability becomes fatal for the run
    pub max_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "college_data.db".to_string(),
            max_attempts: 5,
        }
    }
}

/// A crawl target as written in the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetEntry {
    pub name: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    /// Registered domain; subdomains are in scope
    pub root_domain: String,

    pub seeds: Vec<String>,

    #[serde(default = "default_schema_hints")]
    pub schema_hints: Vec<SchemaType>,
}

fn default_schema_hints() -> Vec<SchemaType> {
    vec![SchemaType::Admission, SchemaType::Placement]
}
