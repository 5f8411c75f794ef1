use crate::config::types::{
    Config, CrawlerConfig, FetcherConfig, InferenceConfig, RetryConfig, StorageConfig,
    TargetEntry,
};
use crate::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_retry_config(&config.retry)?;
    validate_inference_config(&config.inference)?;
    validate_storage_config(&config.storage)?;
    validate_targets(&config.targets)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_fetches must be between 1 and 100, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.max_concurrent_per_domain < 1
        || config.max_concurrent_per_domain > config.max_concurrent_fetches
    {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_per_domain must be between 1 and max_concurrent_fetches ({}), got {}",
            config.max_concurrent_fetches, config.max_concurrent_per_domain
        )));
    }

    if config.max_tasks < 1 || config.max_pages_per_target < 1 {
        return Err(ConfigError::Validation(
            "max_tasks and max_pages_per_target must be >= 1".to_string(),
        ));
    }

    if config.max_politeness_delay_ms < config.politeness_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_politeness_delay_ms ({}) must be >= politeness_delay_ms ({})",
            config.max_politeness_delay_ms, config.politeness_delay_ms
        )));
    }

    if config.robots_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "robots_agent cannot be empty".to_string(),
        ));
    }

    for pattern in &config.follow_patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("follow pattern '{}': {}", pattern, e))
        })?;
    }

    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.user_agents.is_empty() || config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one non-empty entry".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 || config.browser_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch timeouts must be >= 1 second".to_string(),
        ));
    }

    if config.min_action_delay_ms > config.max_action_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_action_delay_ms ({}) must be <= max_action_delay_ms ({})",
            config.min_action_delay_ms, config.max_action_delay_ms
        )));
    }

    if config.rotate_proxy_every == 0 {
        return Err(ConfigError::Validation(
            "rotate_proxy_every must be >= 1".to_string(),
        ));
    }

    for proxy in &config.proxies {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Proxy '{}' must use an http or https scheme",
                proxy
            )));
        }
    }

    if config.max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "max_body_bytes must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "retry max_attempts must be >= 1".to_string(),
        ));
    }

    // backoff must grow strictly between consecutive retries
    if !(config.multiplier > 1.0) || !config.multiplier.is_finite() {
        return Err(ConfigError::Validation(format!(
            "retry multiplier must be > 1.0, got {}",
            config.multiplier
        )));
    }

    if config.base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "retry base_delay_ms must be >= 1".to_string(),
        ));
    }

    if config.max_delay_ms <= config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry max_delay_ms ({}) must be > base_delay_ms ({})",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    Ok(())
}

/// Validates inference endpoint configuration
fn validate_inference_config(config: &InferenceConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid inference base_url: {}", e)))?;
    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "inference base_url '{}' must use http or https",
            config.base_url
        )));
    }

    for (name, path) in [
        ("classify_path", &config.classify_path),
        ("entities_path", &config.entities_path),
        ("question_path", &config.question_path),
        ("ocr_path", &config.ocr_path),
        ("chart_path", &config.chart_path),
    ] {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "inference {} must start with '/', got '{}'",
                name, path
            )));
        }
    }

    for (name, value) in [
        ("min_confidence", config.min_confidence),
        ("classification_threshold", config.classification_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "inference {} must be within [0, 1], got {}",
                name, value
            )));
        }
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "inference timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "storage max_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates target entries
fn validate_targets(targets: &[TargetEntry]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for entry in targets {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "target name cannot be empty".to_string(),
            ));
        }

        if !names.insert(entry.name.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate target name '{}'",
                entry.name
            )));
        }

        validate_domain_pattern(&entry.root_domain)?;

        if entry.seeds.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Target '{}' must have at least one seed URL",
                entry.name
            )));
        }

        for seed in &entry.seeds {
            let url = Url::parse(seed).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
            })?;

            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(ConfigError::Validation(format!(
                    "Seed URL '{}' must use an http or https scheme",
                    seed
                )));
            }
        }

        if entry.schema_hints.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Target '{}' must declare at least one schema hint",
                entry.name
            )));
        }
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    // Check if it's a wildcard pattern
    if let Some(domain) = pattern.strip_prefix("*.") {
        // Validate the base domain part
        validate_domain_string(domain)?;
    } else {
        // Regular domain
        validate_domain_string(pattern)?;
    }

    Ok(())
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    // Check for invalid characters
    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    // Check that it doesn't start or end with a dot or hyphen
    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    // Check for consecutive dots
    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    // Must contain at least one dot (e.g., example.com, not just "example")
    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}
