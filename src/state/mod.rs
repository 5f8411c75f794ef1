//! State module for tracking crawl progress
//!
//! - `TaskState`: lifecycle of a crawl task in the frontier
//! - `DomainState`: per-domain politeness, concurrency and backoff

mod domain_state;
mod task_state;

pub use domain_state::{DomainState, PolitenessPolicy};
pub use task_state::TaskState;
