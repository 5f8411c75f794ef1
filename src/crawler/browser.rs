//! Headless browser fetcher
//!
//! Renders pages in headless Chrome so script-built content is present in the
//! captured HTML. Each request gets a rotated user agent, a stealth script
//! that hides the usual automation fingerprints, randomized dwell times and a
//! scroll to trigger lazy loading. Binary resources (PDFs, images) are handed
//! to the HTTP fetcher since there is nothing to render.

use crate::config::FetcherConfig;
use crate::crawler::fetcher::{screen_document, FetchError, Fetcher, HttpFetcher};
use crate::crawler::identity::{random_between, IdentityRotator};
use crate::crawler::scheduler::CrawlTask;
use crate::document::FetchedDocument;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

const STEALTH_JS: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = { runtime: {} };
"#;

const BROWSER_ARGS: [&str; 12] = [
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-sandbox",
    "--window-size=1920,1080",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--no-first-run",
];

struct LaunchedBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Fetcher that drives a shared headless Chrome instance
pub struct BrowserFetcher {
    identities: IdentityRotator,
    http: HttpFetcher,
    captcha_markers: Vec<String>,
    timeout: Duration,
    browser: OnceCell<LaunchedBrowser>,
}

impl BrowserFetcher {
    /// Creates the fetcher; Chrome itself is launched on first use
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.browser_timeout_secs);
        let identities = IdentityRotator::new(config, timeout)
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            identities,
            http: HttpFetcher::new(config)?,
            captcha_markers: config.captcha_markers.clone(),
            timeout,
            browser: OnceCell::new(),
        })
    }

    async fn browser(&self) -> Result<&Browser, FetchError> {
        let launched = self
            .browser
            .get_or_try_init(|| async {
                tracing::info!("Launching headless browser");

                let config = BrowserConfig::builder()
                    .viewport(Some(Viewport {
                        width: 1920,
                        height: 1080,
                        device_scale_factor: Some(1.0),
                        ..Default::default()
                    }))
                    .request_timeout(self.timeout)
                    .args(BROWSER_ARGS)
                    .build()
                    .map_err(FetchError::Browser)?;

                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| FetchError::Browser(format!("failed to launch: {}", e)))?;

                let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

                Ok::<_, FetchError>(LaunchedBrowser { browser, handler })
            })
            .await?;

        Ok(&launched.browser)
    }

    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let identity = self.identities.next_identity();
        let browser = self.browser().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Browser(format!("failed to open page: {}", e)))?;

        page.execute(SetUserAgentOverrideParams::new(identity.user_agent))
            .await
            .ok();
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_JS))
            .await
            .ok();

        let result = async {
            tokio::time::sleep(self.identities.pacing_delay()).await;

            page.goto(url)
                .await
                .map_err(|e| FetchError::Browser(format!("navigation failed: {}", e)))?;

            tokio::time::sleep(random_between(
                Duration::from_millis(500),
                Duration::from_millis(1500),
            ))
            .await;
            page.evaluate("window.scrollTo(0, document.body.scrollHeight / 2)")
                .await
                .ok();
            tokio::time::sleep(random_between(
                Duration::from_millis(500),
                Duration::from_millis(1500),
            ))
            .await;

            page.content()
                .await
                .map_err(|e| FetchError::Browser(format!("failed to read content: {}", e)))
        }
        .await;

        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page: {}", e);
        }

        result
    }
}

/// Whether a URL points at a resource that needs no rendering
fn is_binary_resource(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or("").to_ascii_lowercase();
    [".pdf", ".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, task: &CrawlTask) -> Result<FetchedDocument, FetchError> {
        if is_binary_resource(task.url.as_str()) {
            return self.http.fetch(task).await;
        }

        tracing::debug!(url = %task.url, "browser fetch");
        let html = self.render(task.url.as_str()).await?;

        let document = FetchedDocument::new(
            task.target_id.clone(),
            task.url.as_str(),
            Some("text/html"),
            html.into_bytes(),
            Utc::now(),
        );

        screen_document(document, &self.captcha_markers)
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        if let Some(launched) = self.browser.get() {
            launched.handler.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_resources_skip_rendering() {
        assert!(is_binary_resource("https://vit.ac.in/files/report.PDF"));
        assert!(is_binary_resource("https://vit.ac.in/chart.png?v=3"));
        assert!(!is_binary_resource("https://vit.ac.in/placements"));
        assert!(!is_binary_resource("https://vit.ac.in/pdf-archive/"));
    }
}
