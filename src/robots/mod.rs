//! robots.txt handling
//!
//! Rules are evaluated with the robotstxt crate and cached per origin.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::RobotsRules;
