use crate::config::CrawlerConfig;
use std::time::{Duration, Instant};

/// Healthy completions needed before a penalized domain is relaxed one step
const RELAX_AFTER_SUCCESSES: u32 = 5;

/// Politeness bounds every domain starts from and returns to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolitenessPolicy {
    /// Minimum spacing between requests to one domain
    pub base_delay: Duration,

    /// Ceiling for the adaptively increased spacing
    pub max_delay: Duration,

    /// Configured maximum of concurrent requests to one domain
    pub base_concurrency: u32,
}

impl From<&CrawlerConfig> for PolitenessPolicy {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.politeness_delay_ms),
            max_delay: Duration::from_millis(config.max_politeness_delay_ms),
            base_concurrency: config.max_concurrent_per_domain.max(1),
        }
    }
}

/// Tracks the state of a domain during crawling
///
/// Blocking signals (429/503, CAPTCHA pages, slow responses) and downstream
/// backpressure widen the spacing and shrink the concurrency cap; a run of
/// healthy completions walks both back toward the policy values.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Number of requests made to this domain in the current run
    pub request_count: u32,

    /// Timestamp of the last request to this domain
    pub last_request_time: Option<Instant>,

    /// Requests currently in flight
    pub in_flight: u32,

    /// Current spacing between requests
    pub delay: Duration,

    /// Current cap on concurrent requests
    pub concurrency_limit: u32,

    /// No request may start before this instant
    pub backoff_until: Option<Instant>,

    /// Blocking signals seen since the last healthy completion
    pub consecutive_blocks: u32,

    healthy_streak: u32,
}

impl DomainState {
    /// Creates a new DomainState at the policy's base values
    pub fn new(policy: &PolitenessPolicy) -> Self {
        Self {
            request_count: 0,
            last_request_time: None,
            in_flight: 0,
            delay: policy.base_delay,
            concurrency_limit: policy.base_concurrency,
            backoff_until: None,
            consecutive_blocks: 0,
            healthy_streak: 0,
        }
    }

    /// Checks if a request can be made to this domain
    ///
    /// This method enforces:
    /// - The concurrency cap
    /// - Any active backoff window
    /// - Minimum time between requests to the same domain
    pub fn can_request(&self, now: Instant) -> bool {
        self.in_flight < self.concurrency_limit && self.time_until_next_request(now).is_none()
    }

    /// Calculates the time until the spacing and backoff constraints allow a request
    ///
    /// Returns None if a request can be made now (concurrency aside).
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let mut ready_at = now;

        if let Some(last) = self.last_request_time {
            ready_at = ready_at.max(last + self.delay);
        }
        if let Some(until) = self.backoff_until {
            ready_at = ready_at.max(until);
        }

        if ready_at > now {
            Some(ready_at - now)
        } else {
            None
        }
    }

    /// Records that a request was started against this domain
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.in_flight += 1;
        self.last_request_time = Some(now);
    }

    /// Records that a request finished, successfully or not
    pub fn record_finished(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Records a healthy completion and relaxes earlier penalties gradually
    pub fn record_success(&mut self, policy: &PolitenessPolicy) {
        self.consecutive_blocks = 0;
        self.healthy_streak += 1;

        if self.healthy_streak >= RELAX_AFTER_SUCCESSES {
            self.healthy_streak = 0;
            self.delay = (self.delay * 3 / 4).max(policy.base_delay);
            self.concurrency_limit = (self.concurrency_limit + 1).min(policy.base_concurrency);
        }
    }

    /// Records an explicit blocking signal (429/503 status or CAPTCHA page)
    ///
    /// Doubles the spacing and opens an exponentially growing backoff window.
    pub fn record_block(&mut self, policy: &PolitenessPolicy, now: Instant) {
        self.consecutive_blocks += 1;
        self.healthy_streak = 0;
        self.delay = (self.delay.max(Duration::from_millis(100)) * 2).min(policy.max_delay);

        let exponent = self.consecutive_blocks.saturating_sub(1).min(6);
        let window = (self.delay * 2u32.pow(exponent)).min(policy.max_delay);
        self.backoff_until = Some(now + window);
    }

    /// Records an abnormally slow response
    pub fn record_slow_response(&mut self, policy: &PolitenessPolicy) {
        self.healthy_streak = 0;
        self.delay = (self.delay * 3 / 2).max(policy.base_delay).min(policy.max_delay);
    }

    /// Records that downstream stages (storage, inference) are saturated
    ///
    /// Halves the concurrency cap (never below one) and doubles the spacing.
    pub fn record_backpressure(&mut self, policy: &PolitenessPolicy) {
        self.healthy_streak = 0;
        self.concurrency_limit = (self.concurrency_limit / 2).max(1);
        self.delay = (self.delay.max(Duration::from_millis(100)) * 2).min(policy.max_delay);
    }

    /// Applies a robots.txt crawl-delay as a floor for the spacing
    pub fn apply_crawl_delay(&mut self, policy: &PolitenessPolicy, seconds: f64) {
        if !seconds.is_finite() || seconds <= 0.0 {
            return;
        }
        let requested = Duration::from_secs_f64(seconds.min(policy.max_delay.as_secs_f64()));
        self.delay = self.delay.max(requested);
    }
}
