//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::crawler::CrawlTask;
use crate::document::FetchedDocument;
use crate::fusion::{FieldValue, RecordStatus, StructuredRecord};
use crate::registry::SchemaType;
use crate::state::TaskState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RawId, RecordVersion, RunRecord, RunStatus, TargetCounts, TaskRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// How long a statement waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database file and applies the schema
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", value, e)))
}

/// Columns of a raw document row, converted outside the row closure
type RawRow = (String, String, String, String, Vec<u8>, String);

const RAW_COLUMNS: &str = "content_hash, target_id, url, content_type, body, fetched_at";

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_document(row: RawRow) -> StorageResult<FetchedDocument> {
    let (content_hash, target_id, url, content_type, body, fetched_at) = row;
    Ok(FetchedDocument {
        target_id,
        url,
        content_type,
        body,
        fetched_at: parse_time(&fetched_at)?,
        content_hash,
    })
}

/// Columns of a structured record row
type RecordRow = (String, String, u32, String, String, String);

fn into_record(row: RecordRow) -> StorageResult<StructuredRecord> {
    let (target_id, schema, version, fields, source_document, status) = row;
    let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&fields)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(StructuredRecord {
        target_id,
        schema_type: SchemaType::from_db_string(&schema)
            .ok_or_else(|| StorageError::Serialization(format!("unknown schema '{}'", schema)))?,
        fields,
        version,
        source_document,
        status: RecordStatus::from_db_string(&status)
            .ok_or_else(|| StorageError::Serialization(format!("unknown status '{}'", status)))?,
    })
}

impl SqliteStorage {
    fn query_record(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Option<StructuredRecord>> {
        let row: Option<RecordRow> = self
            .conn
            .query_row(sql, params, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })
            .optional()?;
        row.map(into_record).transpose()
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str, mode: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, mode, status) VALUES (?1, ?2, ?3, ?4)",
            params![now, config_hash, mode, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, mode, status FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        config_hash: row.get(3)?,
                        mode: row.get(4)?,
                        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                            .unwrap_or(RunStatus::Running),
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Raw Documents =====

    fn store_raw(&mut self, document: &FetchedDocument) -> StorageResult<RawId> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO raw_documents
             (content_hash, target_id, url, content_type, body, fetched_at, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                document.content_hash,
                document.target_id,
                document.url,
                document.content_type,
                document.body,
                document.fetched_at.to_rfc3339(),
                now
            ],
        )? > 0;

        let id = self.conn.query_row(
            "SELECT id FROM raw_documents WHERE content_hash = ?1",
            params![document.content_hash],
            |row| row.get(0),
        )?;

        Ok(RawId { id, inserted })
    }

    fn get_raw(&self, content_hash: &str) -> StorageResult<Option<FetchedDocument>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM raw_documents WHERE content_hash = ?1", RAW_COLUMNS),
                params![content_hash],
                raw_row,
            )
            .optional()?;
        row.map(into_document).transpose()
    }

    fn list_unprocessed(&self, target_id: Option<&str>) -> StorageResult<Vec<FetchedDocument>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM raw_documents r
             WHERE (?1 IS NULL OR r.target_id = ?1)
               AND (r.stale = 1 OR NOT EXISTS (
                    SELECT 1 FROM structured_records s WHERE s.source_document = r.content_hash))
             ORDER BY r.id",
            RAW_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![target_id], raw_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_document).collect()
    }

    fn mark_stale(&mut self, content_hash: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE raw_documents SET stale = 1 WHERE content_hash = ?1",
            params![content_hash],
        )?;
        Ok(changed > 0)
    }

    fn mark_target_stale(&mut self, target_id: &str) -> StorageResult<u64> {
        let changed = self.conn.execute(
            "UPDATE raw_documents SET stale = 1 WHERE target_id = ?1",
            params![target_id],
        )?;
        Ok(changed as u64)
    }

    // ===== Structured Records =====

    fn store_structured(&mut self, record: &StructuredRecord) -> StorageResult<u32> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let schema = record.schema_type.to_db_string();
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        let version: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM structured_records
             WHERE target_id = ?1 AND schema_type = ?2",
            params![record.target_id, schema],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO structured_records
             (target_id, schema_type, version, fields, source_document, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.target_id,
                schema,
                version,
                fields,
                record.source_document,
                record.status.as_str(),
                now
            ],
        )?;
        tx.execute(
            "UPDATE raw_documents SET stale = 0 WHERE content_hash = ?1",
            params![record.source_document],
        )?;
        tx.commit()?;

        Ok(version)
    }

    fn get_latest(
        &self,
        target_id: &str,
        schema: SchemaType,
    ) -> StorageResult<Option<StructuredRecord>> {
        self.query_record(
            "SELECT target_id, schema_type, version, fields, source_document, status
             FROM structured_records WHERE target_id = ?1 AND schema_type = ?2
             ORDER BY version DESC LIMIT 1",
            params![target_id, schema.to_db_string()],
        )
    }

    fn get_version(
        &self,
        target_id: &str,
        schema: SchemaType,
        version: u32,
    ) -> StorageResult<Option<StructuredRecord>> {
        self.query_record(
            "SELECT target_id, schema_type, version, fields, source_document, status
             FROM structured_records WHERE target_id = ?1 AND schema_type = ?2 AND version = ?3",
            params![target_id, schema.to_db_string(), version],
        )
    }

    fn list_versions(
        &self,
        target_id: &str,
        schema: SchemaType,
    ) -> StorageResult<Vec<RecordVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT version, status, source_document, created_at FROM structured_records
             WHERE target_id = ?1 AND schema_type = ?2 ORDER BY version",
        )?;
        let rows = stmt
            .query_map(params![target_id, schema.to_db_string()], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version, status, source_document, created_at)| {
                Ok(RecordVersion {
                    version,
                    status: RecordStatus::from_db_string(&status).ok_or_else(|| {
                        StorageError::Serialization(format!("unknown status '{}'", status))
                    })?,
                    source_document,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }

    // ===== Crawl Tasks =====

    fn upsert_task(
        &mut self,
        run_id: i64,
        task: &CrawlTask,
        state: TaskState,
        error: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_tasks
             (target_id, url_hash, url, depth, state, attempts, last_error, run_id, discovered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(target_id, url_hash) DO UPDATE SET
                state = excluded.state,
                attempts = excluded.attempts,
                last_error = excluded.last_error,
                run_id = excluded.run_id,
                updated_at = excluded.updated_at",
            params![
                task.target_id,
                task.url_hash,
                task.url.as_str(),
                task.depth,
                state.to_db_string(),
                task.attempts,
                error,
                run_id,
                task.discovered_at.to_rfc3339(),
                now
            ],
        )?;
        Ok(())
    }

    fn load_resumable_tasks(&self, target_id: Option<&str>) -> StorageResult<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id, url, depth, state, attempts, last_error FROM crawl_tasks
             WHERE state IN ('pending', 'in_flight', 'failed_retryable')
               AND (?1 IS NULL OR target_id = ?1)
             ORDER BY depth, discovered_at",
        )?;

        let tasks = stmt
            .query_map(params![target_id], |row| {
                Ok(TaskRecord {
                    target_id: row.get(0)?,
                    url: row.get(1)?,
                    depth: row.get(2)?,
                    state: TaskState::from_db_string(&row.get::<_, String>(3)?)
                        .unwrap_or(TaskState::Pending),
                    attempts: row.get(4)?,
                    last_error: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tasks)
    }

    // ===== Statistics =====

    fn target_counts(&self) -> StorageResult<BTreeMap<String, TargetCounts>> {
        let mut counts: BTreeMap<String, TargetCounts> = BTreeMap::new();

        let mut stmt = self.conn.prepare(
            "SELECT r.target_id, COUNT(*),
                    SUM(CASE WHEN r.stale = 1 OR NOT EXISTS (
                        SELECT 1 FROM structured_records s WHERE s.source_document = r.content_hash)
                        THEN 1 ELSE 0 END)
             FROM raw_documents r GROUP BY r.target_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (target, raw, unprocessed) in rows {
            let entry = counts.entry(target).or_default();
            entry.raw_documents = raw as u64;
            entry.unprocessed = unprocessed as u64;
        }

        let mut stmt = self
            .conn
            .prepare("SELECT target_id, COUNT(*) FROM structured_records GROUP BY target_id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (target, versions) in rows {
            counts.entry(target).or_default().structured_versions = versions as u64;
        }

        Ok(counts)
    }
}
