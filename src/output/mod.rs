//! Output module for run summaries
//!
//! This module handles:
//! - Collecting per-target succeeded/partial/failed counts during a run
//! - Printing run summaries and the target listing

pub mod stats;

pub use stats::{print_summary, print_targets, RunSummary, TargetSummary};
