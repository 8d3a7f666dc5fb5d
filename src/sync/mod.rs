//! Synchronization of source records into the canonical graph
//!
//! Records are matched to existing entities, merged under per-field
//! ownership rules, and linked to their neighbours. The orchestrator drives
//! the stages for every enabled (tenant, source) pair.

mod downstream;
mod error;
pub mod linker;
mod matcher;
mod merge;
mod orchestrator;
mod retry;
pub mod rules;
mod run;
mod stages;

pub use downstream::{
    DownstreamError, DownstreamResult, DownstreamWriter, ExternalSystemRef, GraphDownstreamWriter, LogEntryRequest,
    SourceFields,
};
pub use error::{SyncError, SyncResult};
pub use linker::{Direction, LinkOutcome, RelationshipLinker};
pub use matcher::EntityMatcher;
pub use merge::{EntityUpsert, FieldRule, MergeEngine, MergeField, MergeOutcome};
pub use orchestrator::{PooledProviderFactory, ProviderFactory, SyncOrchestrator, DEFAULT_BATCH_SIZE};
pub use retry::{PollOutcome, RetryPolicy};
pub use run::{EntityCounts, SyncRun, TenantSyncSettings};
pub use stages::{check_record, ensure_external_system, EntitySyncer};
