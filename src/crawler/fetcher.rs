//! Fetchers
//!
//! This module handles retrieving raw documents for crawl tasks:
//! - The `Fetcher` trait shared by the HTTP and headless-browser modes
//! - Error classification into retryable and permanent failures
//! - Detection of blocking responses (block statuses, challenge pages)
//! - Bounded body reads
//! - Deadline and cancellation handling around any fetcher

use crate::config::FetcherConfig;
use crate::crawler::identity::IdentityRotator;
use crate::crawler::retry::Retryable;
use crate::crawler::scheduler::CrawlTask;
use crate::document::{ContentKind, FetchedDocument};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a response was treated as a block
#[derive(Debug, Clone, PartialEq)]
pub enum BlockSignal {
    /// One of the configured block statuses (429, 503, ...)
    Status(u16),
    /// An anti-bot challenge page; carries the marker that matched
    Captcha(String),
}

impl fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSignal::Status(code) => write!(f, "HTTP {}", code),
            BlockSignal::Captcha(marker) => write!(f, "challenge page ({})", marker),
        }
    }
}

/// Errors raised while fetching a document
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Blocked by server: {0}")]
    Blocked(BlockSignal),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Unsupported content type: {0}")]
    Unsupported(String),

    #[error("Response body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_)
            | FetchError::Timeout(_)
            | FetchError::Blocked(_)
            | FetchError::Browser(_) => true,
            FetchError::Status(code) => matches!(code, 408 | 425 | 429 | 500..=599),
            FetchError::Unsupported(_)
            | FetchError::TooLarge(_)
            | FetchError::Cancelled
            | FetchError::Client(_) => false,
        }
    }
}

impl FetchError {
    /// The blocking signal carried by this error, if any
    pub fn block_signal(&self) -> Option<&BlockSignal> {
        match self {
            FetchError::Blocked(signal) => Some(signal),
            _ => None,
        }
    }

    fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            FetchError::Timeout(timeout)
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

/// Retrieves the raw document for a crawl task
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, task: &CrawlTask) -> Result<FetchedDocument, FetchError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Runs a fetch under a hard deadline, aborting promptly on cancellation
///
/// # Arguments
///
/// * `fetcher` - Fetcher to use
/// * `task` - Task to fetch
/// * `deadline` - Upper bound for the whole fetch
/// * `cancel` - Run-wide cancellation token
pub async fn fetch_with_deadline(
    fetcher: &dyn Fetcher,
    task: &CrawlTask,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<FetchedDocument, FetchError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = tokio::time::timeout(deadline, fetcher.fetch(task)) => {
            result.unwrap_or(Err(FetchError::Timeout(deadline)))
        }
    }
}

/// Returns the first configured challenge marker found in an HTML body
pub fn detect_challenge(body: &[u8], markers: &[String]) -> Option<String> {
    if markers.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(body).to_lowercase();
    markers
        .iter()
        .find(|marker| !marker.is_empty() && text.contains(&marker.to_lowercase()))
        .cloned()
}

/// Checks a fetched document for challenge pages and unsupported content
pub(crate) fn screen_document(
    document: FetchedDocument,
    captcha_markers: &[String],
) -> Result<FetchedDocument, FetchError> {
    match document.kind() {
        ContentKind::Other => Err(FetchError::Unsupported(document.content_type)),
        ContentKind::Html => match detect_challenge(&document.body, captcha_markers) {
            Some(marker) => Err(FetchError::Blocked(BlockSignal::Captcha(marker))),
            None => Ok(document),
        },
        ContentKind::Pdf | ContentKind::Image => Ok(document),
    }
}

/// Plain HTTP fetcher with identity rotation
pub struct HttpFetcher {
    identities: IdentityRotator,
    timeout: Duration,
    captcha_markers: Vec<String>,
    block_statuses: Vec<u16>,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let identities = IdentityRotator::new(config, timeout)
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            identities,
            timeout,
            captcha_markers: config.captcha_markers.clone(),
            block_statuses: config.block_statuses.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Client for auxiliary requests such as robots.txt
    pub fn client(&self) -> reqwest::Client {
        self.identities.direct_client()
    }

    /// Reads the body chunk by chunk, refusing anything over the size cap
    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        if let Some(length) = response.content_length() {
            if length as usize > self.max_body_bytes {
                return Err(FetchError::TooLarge(self.max_body_bytes));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(FetchError::TooLarge(self.max_body_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, task: &CrawlTask) -> Result<FetchedDocument, FetchError> {
        let identity = self.identities.next_identity();
        tokio::time::sleep(self.identities.pacing_delay()).await;

        tracing::debug!(
            url = %task.url,
            proxy = ?identity.proxy,
            "HTTP fetch"
        );

        let response = identity
            .client
            .get(task.url.as_str())
            .header(USER_AGENT, identity.user_agent.as_str())
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/pdf,image/*;q=0.9,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        let status = response.status().as_u16();
        if self.block_statuses.contains(&status) {
            return Err(FetchError::Blocked(BlockSignal::Status(status)));
        }
        if !response.status().is_success() {
            return Err(FetchError::Status(status));
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = self.read_body(response).await?;

        let document = FetchedDocument::new(
            task.target_id.clone(),
            task.url.as_str(),
            declared.as_deref(),
            body,
            Utc::now(),
        );

        screen_document(document, &self.captcha_markers)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(FetchError::Blocked(BlockSignal::Status(429)).is_retryable());
        assert!(FetchError::Status(502).is_retryable());
        assert!(FetchError::Status(408).is_retryable());

        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Unsupported("application/zip".into()).is_retryable());
        assert!(!FetchError::TooLarge(10).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_detect_challenge_is_case_insensitive() {
        let markers = vec!["Verify you are human".to_string()];
        let body = b"<html><h1>VERIFY YOU ARE HUMAN</h1></html>";
        assert_eq!(
            detect_challenge(body, &markers),
            Some("Verify you are human".to_string())
        );
        assert_eq!(detect_challenge(b"<html>placements</html>", &markers), None);
    }

    #[test]
    fn test_screen_document() {
        let markers = vec!["challenge-platform".to_string()];

        let zip = FetchedDocument::new(
            "t",
            "https://t.ac.in/a.zip",
            Some("application/zip"),
            b"PK".to_vec(),
            Utc::now(),
        );
        assert!(matches!(
            screen_document(zip, &markers),
            Err(FetchError::Unsupported(_))
        ));

        let challenge = FetchedDocument::new(
            "t",
            "https://t.ac.in/",
            Some("text/html"),
            b"<html><script src='/cdn-cgi/challenge-platform/x.js'></script></html>".to_vec(),
            Utc::now(),
        );
        let err = screen_document(challenge, &markers).unwrap_err();
        assert!(matches!(err.block_signal(), Some(BlockSignal::Captcha(_))));

        let pdf = FetchedDocument::new(
            "t",
            "https://t.ac.in/r.pdf",
            None,
            b"%PDF-1.4".to_vec(),
            Utc::now(),
        );
        assert!(screen_document(pdf, &markers).is_ok());
    }

    struct SlowFetcher;

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, _task: &CrawlTask) -> Result<FetchedDocument, FetchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(FetchError::Network("unreachable".into()))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn task() -> CrawlTask {
        let frontier = crate::crawler::Frontier::new(
            crate::config::CrawlerConfig::default(),
            crate::crawler::RetryPolicy::no_retry(),
        );
        frontier.enqueue("t", "https://t.ac.in/", 0);
        frontier.pending_tasks().remove(0)
    }

    #[tokio::test]
    async fn test_deadline_produces_timeout() {
        let result = fetch_with_deadline(
            &SlowFetcher,
            &task(),
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result =
            fetch_with_deadline(&SlowFetcher, &task(), Duration::from_secs(10), &cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
