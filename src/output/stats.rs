//! Run statistics
//!
//! This module collects per-target outcome counts during a run and
//! renders them, together with stored totals, for the terminal.

use crate::crawler::RunMode;
use crate::fusion::RecordStatus;
use crate::registry::Target;
use crate::storage::{RunStatus, TargetCounts};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome counts for one target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetSummary {
    /// Documents fused into a complete record
    pub succeeded: u64,
    /// Documents fused with a failed stage or extractor error
    pub partial: u64,
    /// Documents for which no field resolved
    pub failed: u64,
    /// Fetched documents whose content was already stored
    pub unchanged: u64,
    /// Tasks that permanently failed to fetch
    pub fetch_failures: u64,
    /// Tasks skipped without a request (robots.txt)
    pub skipped: u64,
}

impl TargetSummary {
    /// Counts one fused document
    pub fn record(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::Complete => self.succeeded += 1,
            RecordStatus::PartiallyProcessed => self.partial += 1,
            RecordStatus::Unresolved => self.failed += 1,
        }
    }

    /// Documents fused in this run
    pub fn documents(&self) -> u64 {
        self.succeeded + self.partial + self.failed
    }

    fn add(&mut self, other: &TargetSummary) {
        self.succeeded += other.succeeded;
        self.partial += other.partial;
        self.failed += other.failed;
        self.unchanged += other.unchanged;
        self.fetch_failures += other.fetch_failures;
        self.skipped += other.skipped;
    }
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub mode: RunMode,
    pub status: RunStatus,
    pub elapsed: Duration,
    /// Counts keyed by target ID
    pub targets: BTreeMap<String, TargetSummary>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            run_id: 0,
            mode: RunMode::Crawl,
            status: RunStatus::Running,
            elapsed: Duration::ZERO,
            targets: BTreeMap::new(),
        }
    }
}

impl RunSummary {
    /// An empty summary listing every target, so targets without documents still show up
    pub fn for_targets(mode: RunMode, targets: &[Arc<Target>]) -> Self {
        Self {
            mode,
            targets: targets
                .iter()
                .map(|t| (t.id.clone(), TargetSummary::default()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn target_mut(&mut self, target_id: &str) -> &mut TargetSummary {
        self.targets.entry(target_id.to_string()).or_default()
    }

    /// Adds the counts of a worker's partial summary
    pub fn merge(&mut self, other: RunSummary) {
        for (id, counts) in &other.targets {
            self.target_mut(id).add(counts);
        }
    }

    /// Sum over all targets
    pub fn totals(&self) -> TargetSummary {
        let mut totals = TargetSummary::default();
        for counts in self.targets.values() {
            totals.add(counts);
        }
        totals
    }

    /// True when no target lost a document or a fetch
    pub fn is_clean(&self) -> bool {
        let totals = self.totals();
        totals.partial == 0 && totals.failed == 0 && totals.fetch_failures == 0
    }
}

/// Prints a run summary to stdout
///
/// # Arguments
///
/// * `summary` - The summary to display
pub fn print_summary(summary: &RunSummary) {
    println!("=== Run {} ({}) ===\n", summary.run_id, summary.mode);
    println!("Status: {}", summary.status.to_db_string());
    println!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    println!(
        "  {:<40} {:>9} {:>8} {:>7} {:>10} {:>8} {:>8}",
        "Target", "Succeeded", "Partial", "Failed", "Unchanged", "Fetch", "Skipped"
    );
    for (id, counts) in &summary.targets {
        print_row(id, counts);
    }

    let totals = summary.totals();
    println!();
    print_row("TOTAL", &totals);
    println!();

    let documents = totals.documents();
    let success_rate = if documents > 0 {
        (totals.succeeded as f64 / documents as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Success Rate: {:.1}% ({} / {} documents fully processed)",
        success_rate, totals.succeeded, documents
    );
}

fn print_row(label: &str, counts: &TargetSummary) {
    println!(
        "  {:<40} {:>9} {:>8} {:>7} {:>10} {:>8} {:>8}",
        label,
        counts.succeeded,
        counts.partial,
        counts.failed,
        counts.unchanged,
        counts.fetch_failures,
        counts.skipped
    );
}

/// Prints the configured targets with their stored document counts
///
/// # Arguments
///
/// * `targets` - Targets to list
/// * `counts` - Stored counts keyed by target ID; missing targets have none
pub fn print_targets(targets: &[Arc<Target>], counts: &BTreeMap<String, TargetCounts>) {
    println!("=== Targets ({}) ===\n", targets.len());

    for target in targets {
        let stored = counts.get(&target.id).copied().unwrap_or_default();
        println!("{} [{}]", target.name, target.id);
        if !target.aliases.is_empty() {
            println!("  Aliases: {}", target.aliases.join(", "));
        }
        println!("  Domain: {}", target.root_domain);
        println!(
            "  Schemas: {}",
            target
                .schema_hints
                .iter()
                .map(|s| s.to_db_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("  Seeds: {}", target.seeds.len());
        println!(
            "  Stored: {} documents, {} record versions, {} awaiting processing",
            stored.raw_documents, stored.structured_versions, stored.unprocessed
        );
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_by_status() {
        let mut counts = TargetSummary::default();
        counts.record(RecordStatus::Complete);
        counts.record(RecordStatus::Complete);
        counts.record(RecordStatus::PartiallyProcessed);
        counts.record(RecordStatus::Unresolved);

        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.partial, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.documents(), 4);
    }

    #[test]
    fn test_merge_adds_per_target() {
        let mut summary = RunSummary::default();
        summary.target_mut("iit-delhi").record(RecordStatus::Complete);

        let mut worker = RunSummary::default();
        worker.target_mut("iit-delhi").record(RecordStatus::Complete);
        worker.target_mut("vit").fetch_failures += 1;
        summary.merge(worker);

        assert_eq!(summary.targets["iit-delhi"].succeeded, 2);
        assert_eq!(summary.targets["vit"].fetch_failures, 1);
        assert_eq!(summary.totals().documents(), 2);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_empty_summary_is_clean() {
        let summary = RunSummary::default();
        assert!(summary.is_clean());
        assert_eq!(summary.totals(), TargetSummary::default());
    }
}
