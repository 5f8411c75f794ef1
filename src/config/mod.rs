//! Configuration module for College Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use college_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, FetchMode, FetcherConfig, InferenceConfig, RetryConfig,
    StorageConfig, TargetEntry,
};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_or_default, parse_config,
};
