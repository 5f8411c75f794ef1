//! Storage traits and error types

use crate::crawler::{CrawlTask, Retryable};
use crate::document::FetchedDocument;
use crate::fusion::StructuredRecord;
use crate::registry::SchemaType;
use crate::state::TaskState;
use crate::storage::{RawId, RecordVersion, RunRecord, RunStatus, TargetCounts, TaskRecord};
use rusqlite::ErrorCode;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Busy(_) | Self::Unavailable(_) | Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Raw documents are content-addressed and never modified except for the
/// stale flag. Structured records are versioned per (target, schema); a new
/// version never touches an older one.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run and returns its ID
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    /// * `mode` - Run mode name ("crawl" or "process-only")
    fn create_run(&mut self, config_hash: &str, mode: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Records the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Raw Documents =====

    /// Stores a fetched document unless its content hash is already present
    ///
    /// Returns the ID of the stored row either way.
    fn store_raw(&mut self, document: &FetchedDocument) -> StorageResult<RawId>;

    /// Gets a raw document by content hash
    fn get_raw(&self, content_hash: &str) -> StorageResult<Option<FetchedDocument>>;

    /// Raw documents with no structured record yet, or marked stale
    ///
    /// # Arguments
    ///
    /// * `target_id` - Restrict to one target; `None` lists all
    fn list_unprocessed(&self, target_id: Option<&str>) -> StorageResult<Vec<FetchedDocument>>;

    /// Requests re-processing of one document
    ///
    /// Returns false if no document has that hash.
    fn mark_stale(&mut self, content_hash: &str) -> StorageResult<bool>;

    /// Requests re-processing of every document of a target
    fn mark_target_stale(&mut self, target_id: &str) -> StorageResult<u64>;

    // ===== Structured Records =====

    /// Stores a record as the next version for its (target, schema)
    ///
    /// Returns the assigned version. Clears the stale flag of the source
    /// document.
    fn store_structured(&mut self, record: &StructuredRecord) -> StorageResult<u32>;

    /// Latest version for a target and schema
    fn get_latest(
        &self,
        target_id: &str,
        schema: SchemaType,
    ) -> StorageResult<Option<StructuredRecord>>;

    /// A specific version for a target and schema
    fn get_version(
        &self,
        target_id: &str,
        schema: SchemaType,
        version: u32,
    ) -> StorageResult<Option<StructuredRecord>>;

    /// Version history for a target and schema, oldest first
    fn list_versions(
        &self,
        target_id: &str,
        schema: SchemaType,
    ) -> StorageResult<Vec<RecordVersion>>;

    // ===== Crawl Tasks =====

    /// Archives the current state of a crawl task
    fn upsert_task(
        &mut self,
        run_id: i64,
        task: &CrawlTask,
        state: TaskState,
        error: Option<&str>,
    ) -> StorageResult<()>;

    /// Tasks left pending, in flight or retryable by earlier runs
    fn load_resumable_tasks(&self, target_id: Option<&str>) -> StorageResult<Vec<TaskRecord>>;

    // ===== Statistics =====

    /// Stored documents and records per target
    fn target_counts(&self) -> StorageResult<BTreeMap<String, TargetCounts>>;
}
