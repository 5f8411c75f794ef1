//! Integration tests for College Harvest
//!
//! These tests use wiremock to stand in for college sites and inference
//! endpoints and run the full pipeline against temporary databases.

mod common;
mod crawl_tests;
mod fusion_tests;
mod process_tests;
