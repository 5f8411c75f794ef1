//! Storage module for persisting harvest data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Content-addressed raw documents
//! - Versioned structured records
//! - Crawl task archive for resumption
//! - Run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::TaskState;
use crate::fusion::RecordStatus;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Opens (or creates) the SQLite database at `path`
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Shared, serialized access to a storage backend
///
/// Workers never touch the backend directly; every operation goes through
/// `with`, which holds the lock only for the duration of one synchronous call.
#[derive(Clone)]
pub struct Persistence {
    inner: Arc<Mutex<Box<dyn Storage + Send>>>,
}

impl Persistence {
    pub fn new(storage: impl Storage + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(storage))),
        }
    }

    /// Runs one storage operation under the lock
    pub fn with<T>(
        &self,
        operation: impl FnOnce(&mut dyn Storage) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))?;
        operation(&mut **guard)
    }
}

/// Result of storing a raw document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawId {
    pub id: i64,
    /// False when the content hash was already stored
    pub inserted: bool,
}

/// Represents a run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub mode: String,
    pub status: RunStatus,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One stored version of a structured record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordVersion {
    pub version: u32,
    pub status: RecordStatus,
    pub source_document: String,
    pub created_at: DateTime<Utc>,
}

/// An archived crawl task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub target_id: String,
    pub url: String,
    pub depth: u32,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Stored data for one target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetCounts {
    pub raw_documents: u64,
    pub structured_versions: u64,
    pub unprocessed: u64,
}
