//! Raw tenant schema: vendor tables filled by the ingestion tool
//!
//! Each (source, instance, tenant) combination has its own SQLite file. Raw
//! streams live in `_airbyte_raw_<suffix>` tables holding the vendor JSON
//! untouched; the processing ledger (`sync_status`) lives next to them so
//! that selection can join the two.

use super::traits::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const RAW_TABLE_PREFIX: &str = "_airbyte_raw_";

/// One raw vendor record
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Raw row id; doubles as the sync id handed out with the DTO
    pub record_id: String,
    pub data: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

/// Parameters of the "unprocessed" selection
#[derive(Debug, Clone)]
pub struct UnprocessedQuery<'a> {
    pub tenant: &'a str,
    pub entity: &'a str,
    pub table_suffix: &'a str,
    pub run_id: &'a str,
    pub max_attempts: u32,
    pub limit: usize,
}

/// Connection to one tenant raw schema
pub struct RawStore {
    schema: String,
    pub(super) conn: Mutex<Connection>,
}

impl RawStore {
    /// Open or create the schema file at `path`
    pub fn open(path: impl AsRef<Path>, schema: impl Into<String>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(Self {
            schema: schema.into(),
            conn: Mutex::new(conn),
        })
    }

    /// In-memory schema (useful for testing)
    pub fn open_in_memory(schema: impl Into<String>) -> StorageResult<Self> {
        Ok(Self {
            schema: schema.into(),
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub(super) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Table name for a raw stream, rejecting anything that is not a plain identifier
    pub fn raw_table(table_suffix: &str) -> StorageResult<String> {
        let valid = !table_suffix.is_empty()
            && table_suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(StorageError::InvalidTableName(table_suffix.to_string()));
        }
        Ok(format!("{}{}", RAW_TABLE_PREFIX, table_suffix))
    }

    /// Create a raw stream table if missing
    pub fn ensure_raw_table(&self, table_suffix: &str) -> StorageResult<()> {
        let table = Self::raw_table(table_suffix)?;
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                _airbyte_ab_id TEXT PRIMARY KEY,
                _airbyte_data TEXT NOT NULL,
                _airbyte_emitted_at TEXT NOT NULL
            );
            "#
        ))?;
        Ok(())
    }

    pub fn raw_table_exists(&self, table_suffix: &str) -> StorageResult<bool> {
        let table = Self::raw_table(table_suffix)?;
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or replace a raw record
    pub fn insert_raw(
        &self,
        table_suffix: &str,
        record_id: &str,
        data: &serde_json::Value,
        emitted_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.ensure_raw_table(table_suffix)?;
        let table = Self::raw_table(table_suffix)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {table} (_airbyte_ab_id, _airbyte_data, _airbyte_emitted_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(_airbyte_ab_id) DO UPDATE SET
                     _airbyte_data = excluded._airbyte_data,
                     _airbyte_emitted_at = excluded._airbyte_emitted_at"
            ),
            params![record_id, serde_json::to_string(data)?, emitted_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Raw records not yet processed for `entity`
    ///
    /// A record qualifies when it has no ledger row, or when its row is
    /// neither synced nor skipped, has fewer than `max_attempts` attempts and
    /// was not already claimed by `run_id`. Records are returned in emission
    /// order. A stream whose table does not exist yields nothing.
    pub fn fetch_unprocessed(&self, query: &UnprocessedQuery<'_>) -> StorageResult<Vec<RawRecord>> {
        if query.limit == 0 || !self.raw_table_exists(query.table_suffix)? {
            return Ok(Vec::new());
        }
        let table = Self::raw_table(query.table_suffix)?;
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT r._airbyte_ab_id, r._airbyte_data, r._airbyte_emitted_at
            FROM {table} r
            LEFT JOIN sync_status s
                ON s.tenant = ?1 AND s.entity = ?2 AND s.table_suffix = ?3
               AND s.record_id = r._airbyte_ab_id
            WHERE s.record_id IS NULL
               OR (s.synced = 0 AND s.skipped = 0 AND s.attempt < ?4
                   AND (s.run_id IS NULL OR s.run_id <> ?5))
            ORDER BY r._airbyte_emitted_at, r._airbyte_ab_id
            LIMIT ?6
            "#
        ))?;

        let rows = stmt.query_map(
            params![
                query.tenant,
                query.entity,
                query.table_suffix,
                query.max_attempts,
                query.run_id,
                query.limit as i64,
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (record_id, data, emitted_at) = row?;
            records.push(RawRecord {
                record_id,
                data: serde_json::from_str(&data)?,
                emitted_at: DateTime::parse_from_rfc3339(&emitted_at)
                    .map_err(|e| StorageError::DateParse(e.to_string()))?
                    .with_timezone(&Utc),
            });
        }
        Ok(records)
    }
}
