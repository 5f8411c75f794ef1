//! College Harvest: a polite crawl-extract-fuse pipeline for college websites
//!
//! This crate crawls a closed set of college sites, extracts admission,
//! placement and internship facts from HTML, tables, PDFs and images, fuses
//! extractor and model outputs into versioned structured records, and keeps
//! raw documents so they can be re-processed without fetching again.

pub mod config;
pub mod crawler;
pub mod document;
pub mod extract;
pub mod fusion;
pub mod output;
pub mod registry;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

pub use crawler::FetchError;
pub use extract::ExtractionError;
pub use fusion::InferenceError;
pub use storage::StorageError;

/// Main error type for College Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern in config: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for College Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use document::{ContentKind, FetchedDocument};
pub use registry::{SchemaType, Target, TargetRegistry};
pub use state::{DomainState, TaskState};
pub use url::{extract_domain, normalize_url};
