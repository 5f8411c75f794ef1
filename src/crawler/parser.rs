//! Link discovery
//!
//! This module handles parsing fetched HTML to find further crawl targets:
//! - Links from `<a href>`, canonical links and `<img src>`
//! - Resolution against the page URL
//! - Filtering to the target's domain, crawlable resource types and the
//!   configured follow patterns

use crate::document::{ContentKind, FetchedDocument};
use crate::url::{in_scope, resolve_url};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// File extensions never worth fetching
const SKIPPED_EXTENSIONS: &[&str] = &[
    "css", "js", "json", "xml", "rss", "ico", "svg", "woff", "woff2", "ttf", "eot", "zip", "rar",
    "gz", "tar", "7z", "exe", "dmg", "apk", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "mp3",
    "mp4", "avi", "mov", "webm",
];

/// Links and metadata found on an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Absolute http(s) links, in document order, without duplicates
    pub links: Vec<Url>,
}

/// Parses HTML content and extracts links and the title
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
/// - `<img src="...">` (charts and infographics)
///
/// **Exclude:**
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs and fragment-only links
/// - Anything that does not resolve to http(s)
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    let mut links: Vec<Url> = Vec::new();
    for (selector, attr) in [
        ("a[href]", "href"),
        ("link[rel='canonical'][href]", "href"),
        ("img[src]", "src"),
    ] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            if let Some(url) = element
                .value()
                .attr(attr)
                .and_then(|href| resolve_link(href, base_url))
            {
                if !links.contains(&url) {
                    links.push(url);
                }
            }
        }
    }

    ParsedPage {
        title: extract_title(&document),
        links,
    }
}

/// Extracts the page title from the HTML document
pub fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();

    if href.is_empty()
        || href.starts_with('#')
        || ["javascript:", "mailto:", "tel:", "data:"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    resolve_url(base_url, href).ok()
}

/// Returns false for stylesheets, scripts, archives, office files and media
pub fn is_crawlable(url: &Url) -> bool {
    let file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("")
        .to_ascii_lowercase();

    match file_name.rsplit_once('.') {
        Some((_, ext)) => !SKIPPED_EXTENSIONS.contains(&ext),
        None => true,
    }
}

/// Decides which discovered links a target follows
#[derive(Debug, Clone)]
pub struct LinkFilter {
    root_domain: String,
    patterns: Vec<Regex>,
}

impl LinkFilter {
    /// Creates a filter for a target domain
    ///
    /// # Arguments
    ///
    /// * `root_domain` - Registrable domain; subdomains are in scope
    /// * `patterns` - Regexes matched against the lowercased URL path; empty
    ///   means every in-scope crawlable link is followed
    pub fn new(root_domain: &str, patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root_domain: root_domain.to_ascii_lowercase(),
            patterns,
        })
    }

    pub fn allows(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        if !in_scope(&self.root_domain, host) || !is_crawlable(url) {
            return false;
        }
        if self.patterns.is_empty() {
            return true;
        }

        let path = url.path().to_ascii_lowercase();
        self.patterns.iter().any(|p| p.is_match(&path))
    }

    /// Links worth following from a fetched document
    ///
    /// Only HTML documents carry links; other kinds yield nothing.
    pub fn discover(&self, document: &FetchedDocument) -> Vec<String> {
        if document.kind() != ContentKind::Html {
            return Vec::new();
        }
        let Ok(base) = Url::parse(&document.url) else {
            return Vec::new();
        };

        parse_html(&document.text_lossy(), &base)
            .links
            .into_iter()
            .filter(|url| self.allows(url))
            .map(String::from)
            .collect()
    }
}
