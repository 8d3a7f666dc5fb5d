//! Sync error types

use super::downstream::DownstreamError;
use crate::graph::TenantError;
use crate::source::SourceError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("downstream error: {0}")]
    Downstream(#[from] DownstreamError),

    #[error("invalid tenant: {0}")]
    InvalidTenant(#[from] TenantError),

    #[error("external system {system} not found for tenant {tenant}")]
    MissingExternalSystem { tenant: String, system: String },

    #[error("record has no external id")]
    MissingExternalId,

    #[error("record flagged to skip: {0}")]
    Skipped(String),

    #[error("log entry {0} not visible after upsert")]
    NotVisible(String),
}

impl SyncError {
    /// Terminal errors will fail the same way on every retry; the record is skipped
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MissingExternalSystem { .. } | Self::MissingExternalId | Self::Skipped(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
