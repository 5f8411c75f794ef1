//! Crawler module for fetching and run coordination
//!
//! This module contains the core crawling logic, including:
//! - The frontier: dedup, breadth-first ordering, budgets and politeness
//! - HTTP and headless-browser fetching with identity rotation
//! - Link discovery restricted to a target's domain
//! - The shared retry policy
//! - Run orchestration

mod coordinator;
mod fetcher;
mod identity;
mod parser;
mod retry;
mod scheduler;

#[cfg(feature = "browser")]
mod browser;

#[cfg(feature = "browser")]
pub use browser::BrowserFetcher;
pub use coordinator::{Orchestrator, RunMode};
pub use fetcher::{
    detect_challenge, fetch_with_deadline, BlockSignal, FetchError, Fetcher, HttpFetcher,
};
pub use identity::{Identity, IdentityRotator};
pub use parser::{parse_html, LinkFilter, ParsedPage};
pub use retry::{Cancelled, RetryPolicy, Retryable};
pub use scheduler::{
    ClaimedTask, Completion, CrawlTask, DomainSignal, EnqueueOutcome, Frontier, FrontierStats,
    TaskOutcome,
};
