//! URL handling
//!
//! Normalization, dedup hashing, host extraction and target scope checks.

mod domain;
mod matcher;
mod normalize;

pub use domain::extract_domain;
pub use matcher::{in_scope, matches_wildcard};
pub use normalize::{normalize_url, resolve_url, url_hash};
