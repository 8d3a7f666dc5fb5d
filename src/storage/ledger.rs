//! Processing ledger: per raw record sync bookkeeping
//!
//! One row per (tenant, entity, table suffix, raw record id). Rows are
//! created on the first attempt, updated on every later one and never
//! deleted. The attempt counter only grows and gates selection.

use super::raw::RawStore;
use super::traits::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

/// Ledger row key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerKey<'a> {
    pub tenant: &'a str,
    pub entity: &'a str,
    pub table_suffix: &'a str,
    pub record_id: &'a str,
}

/// Outcome of one processing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub run_id: String,
    pub external_id: String,
    pub synced: bool,
    pub skipped: bool,
    pub reason: String,
}

impl LedgerUpdate {
    pub fn synced(run_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            external_id: external_id.into(),
            synced: true,
            skipped: false,
            reason: String::new(),
        }
    }

    pub fn skipped(run_id: impl Into<String>, external_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            external_id: external_id.into(),
            synced: false,
            skipped: true,
            reason: reason.into(),
        }
    }

    pub fn failed(run_id: impl Into<String>, external_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            external_id: external_id.into(),
            synced: false,
            skipped: false,
            reason: reason.into(),
        }
    }
}

/// A persisted ledger row
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub tenant: String,
    pub entity: String,
    pub table_suffix: String,
    pub record_id: String,
    pub synced: bool,
    pub skipped: bool,
    pub attempt: u32,
    pub synced_at: Option<DateTime<Utc>>,
    pub run_id: String,
    pub external_id: String,
    pub reason: String,
}

impl LedgerEntry {
    /// True when the record failed and will not be selected again
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        !self.synced && !self.skipped && self.attempt >= max_attempts
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<(LedgerEntry, Option<String>)> {
        Ok((
            LedgerEntry {
                tenant: row.get(0)?,
                entity: row.get(1)?,
                table_suffix: row.get(2)?,
                record_id: row.get(3)?,
                synced: row.get(4)?,
                skipped: row.get(5)?,
                attempt: row.get(6)?,
                synced_at: None,
                run_id: row.get(8)?,
                external_id: row.get(9)?,
                reason: row.get(10)?,
            },
            row.get(7)?,
        ))
    }

    fn with_synced_at(mut self, raw: Option<String>) -> StorageResult<Self> {
        self.synced_at = raw
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StorageError::DateParse(e.to_string()))
            })
            .transpose()?;
        Ok(self)
    }
}

const LEDGER_COLUMNS: &str =
    "tenant, entity, table_suffix, record_id, synced, skipped, attempt, synced_at, run_id, external_id, reason";

impl RawStore {
    /// Create the ledger table (idempotent)
    pub fn init_ledger(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_status (
                tenant TEXT NOT NULL,
                entity TEXT NOT NULL,
                table_suffix TEXT NOT NULL,
                record_id TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                attempt INTEGER NOT NULL DEFAULT 0,
                synced_at TEXT,
                run_id TEXT,
                external_id TEXT NOT NULL DEFAULT '',
                reason TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (tenant, entity, table_suffix, record_id)
            );

            CREATE INDEX IF NOT EXISTS idx_sync_status_pending
                ON sync_status(tenant, entity, table_suffix, synced, skipped, attempt);
            "#,
        )?;
        Ok(())
    }

    /// Load one ledger row
    pub fn ledger_entry(&self, key: &LedgerKey<'_>) -> StorageResult<Option<LedgerEntry>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sync_status
                     WHERE tenant = ?1 AND entity = ?2 AND table_suffix = ?3 AND record_id = ?4",
                    LEDGER_COLUMNS
                ),
                params![key.tenant, key.entity, key.table_suffix, key.record_id],
                LedgerEntry::from_row,
            )
            .optional()?;
        row.map(|(entry, synced_at)| entry.with_synced_at(synced_at)).transpose()
    }

    /// Record the outcome of an attempt: find-or-create, then overwrite the
    /// outcome columns and increment the attempt counter
    pub fn mark_processed(&self, key: &LedgerKey<'_>, update: &LedgerUpdate) -> StorageResult<LedgerEntry> {
        let now = Utc::now();
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;

            let previous: Option<(u32, Option<String>)> = tx
                .query_row(
                    "SELECT attempt, synced_at FROM sync_status
                     WHERE tenant = ?1 AND entity = ?2 AND table_suffix = ?3 AND record_id = ?4",
                    params![key.tenant, key.entity, key.table_suffix, key.record_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let (attempt, synced_at) = match previous {
                Some((attempt, synced_at)) => (attempt.saturating_add(1), synced_at),
                None => (1, None),
            };
            let synced_at = if update.synced {
                Some(now.to_rfc3339())
            } else {
                synced_at
            };

            tx.execute(
                r#"
                INSERT INTO sync_status (tenant, entity, table_suffix, record_id, synced, skipped,
                                         attempt, synced_at, run_id, external_id, reason)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(tenant, entity, table_suffix, record_id) DO UPDATE SET
                    synced = excluded.synced,
                    skipped = excluded.skipped,
                    attempt = excluded.attempt,
                    synced_at = excluded.synced_at,
                    run_id = excluded.run_id,
                    external_id = excluded.external_id,
                    reason = excluded.reason
                "#,
                params![
                    key.tenant,
                    key.entity,
                    key.table_suffix,
                    key.record_id,
                    update.synced,
                    update.skipped,
                    attempt,
                    synced_at,
                    update.run_id,
                    update.external_id,
                    update.reason,
                ],
            )?;
            tx.commit()?;
        }

        self.ledger_entry(key)?.ok_or_else(|| {
            StorageError::Database(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    /// Failed records that reached the attempt ceiling
    pub fn exhausted_records(&self, tenant: &str, max_attempts: u32) -> StorageResult<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_status
             WHERE tenant = ?1 AND synced = 0 AND skipped = 0 AND attempt >= ?2
             ORDER BY entity, table_suffix, record_id",
            LEDGER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![tenant, max_attempts], LedgerEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            let (entry, synced_at) = row?;
            entries.push(entry.with_synced_at(synced_at)?);
        }
        Ok(entries)
    }
}
