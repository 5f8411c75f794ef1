//! Per-origin robots.txt cache
//!
//! Rules are fetched lazily the first time an origin is seen and refreshed
//! after 24 hours.

use crate::robots::RobotsRules;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// robots.txt rules together with the time they were fetched
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub rules: RobotsRules,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(rules: RobotsRules) -> Self {
        Self {
            rules,
            fetched_at: Utc::now(),
        }
    }

    /// True once the entry is older than 24 hours
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

/// Shared cache of robots.txt rules keyed by origin (`scheme://host:port`)
#[derive(Debug)]
pub struct RobotsCache {
    client: reqwest::Client,
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    /// Creates an empty cache that fetches with `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the rules governing `url`, fetching robots.txt when needed
    ///
    /// Missing, unreachable or erroring robots.txt files yield permissive rules.
    pub async fn rules_for(&self, url: &Url) -> RobotsRules {
        let origin = url.origin().ascii_serialization();

        if let Some(cached) = self.cached(&origin) {
            return cached;
        }

        let rules = self.fetch(&origin).await;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(origin, CachedRobots::new(rules.clone()));
        }
        rules
    }

    /// Stores rules for an origin without fetching
    pub fn insert(&self, origin: &str, rules: RobotsRules) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(origin.to_string(), CachedRobots::new(rules));
        }
    }

    fn cached(&self, origin: &str) -> Option<RobotsRules> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(origin)
            .filter(|entry| !entry.is_stale())
            .map(|entry| entry.rules.clone())
    }

    async fn fetch(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{}/robots.txt", origin);

        let response = match self
            .client
            .get(&robots_url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %robots_url, "robots.txt unreachable: {}", e);
                return RobotsRules::permissive();
            }
        };

        let status = response.status();
        if !status.is_success() {
            if status.is_server_error() {
                tracing::warn!(url = %robots_url, %status, "robots.txt returned a server error");
            }
            return RobotsRules::permissive();
        }

        match response.text().await {
            Ok(body) => RobotsRules::parse(&body),
            Err(e) => {
                tracing::debug!(url = %robots_url, "robots.txt body unreadable: {}", e);
                RobotsRules::permissive()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_not_stale() {
        assert!(!CachedRobots::new(RobotsRules::permissive()).is_stale());
    }

    #[test]
    fn test_entry_stale_after_a_day() {
        let mut entry = CachedRobots::new(RobotsRules::permissive());
        entry.fetched_at = Utc::now() - Duration::hours(25);
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn test_inserted_rules_are_served_without_fetch() {
        let cache = RobotsCache::new(reqwest::Client::new());
        cache.insert(
            "https://vit.ac.in",
            RobotsRules::parse("User-agent: *\nDisallow: /private"),
        );

        let url = Url::parse("https://vit.ac.in/private/marks").unwrap();
        let rules = cache.rules_for(&url).await;
        assert!(!rules.allows(url.as_str(), "college-harvest"));
    }
}
