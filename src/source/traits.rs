//! SourceDataProvider trait: the contract a data source implements
//!
//! A provider hands out batches of canonical DTOs for one entity type and
//! records the outcome of each one. Records a provider has marked synced or
//! skipped, or that hit the attempt ceiling, are never handed out again.

use super::types::{SyncRecord, SyncedEntityType};
use crate::storage::StorageError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("sync id not handed out by this provider: {0}")]
    UnknownSyncId(String),

    #[error("provider closed")]
    Closed,
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Outcome of one processing attempt, as reported back to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMark<'a> {
    pub sync_id: &'a str,
    pub run_id: &'a str,
    pub synced: bool,
    pub skipped: bool,
    pub reason: &'a str,
}

/// Ledger effect of `mark_processed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkResult {
    pub attempt: u32,
    /// True when this failure was the last allowed attempt
    pub exhausted: bool,
}

#[async_trait]
pub trait SourceDataProvider: Send + Sync {
    /// Identifier of the external system this provider reads from
    fn source_id(&self) -> &str;

    /// Entity types this provider can supply, in stage order
    fn entity_types(&self) -> Vec<SyncedEntityType> {
        SyncedEntityType::ALL.to_vec()
    }

    /// Prepare the ledger. Safe to call repeatedly.
    async fn init(&self) -> SourceResult<()>;

    /// Up to `batch_size` unprocessed records of `entity`
    ///
    /// Records already attempted in `run_id` are excluded so one pass never
    /// retries the same record twice.
    async fn get_data_for_sync(
        &self,
        entity: SyncedEntityType,
        batch_size: usize,
        run_id: &str,
    ) -> SourceResult<Vec<SyncRecord>>;

    /// Record the outcome for a record previously returned by `get_data_for_sync`
    async fn mark_processed(&self, mark: ProcessedMark<'_>) -> SourceResult<MarkResult>;

    /// Release the provider's resources
    async fn close(&self) -> SourceResult<()>;
}
