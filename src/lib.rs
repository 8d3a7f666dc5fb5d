//! syncgraph: cross-source CRM sync into a multi-tenant property graph
//!
//! Records pulled from vendor systems (HubSpot, Zendesk, Salesforce, ...)
//! are reconciled into one canonical entity per real-world object within a
//! tenant. Each entity has a source of truth whose updates win; every other
//! system's view of it is kept on an alternate node.
//!
//! # Core Concepts
//!
//! - **Canonical graph**: tenant-scoped nodes and edges in [`storage::SqliteStore`]
//! - **Sources**: raw vendor tables read through a [`SourceDataProvider`]
//! - **Ledger**: per-record sync attempts, bounding retries of bad records
//! - **Orchestrator**: runs entity stages in dependency order for every enabled tenant
//!
//! # Example
//!
//! ```
//! use syncgraph::{OpenStore, SqliteStore, SyncStateStore, TenantSyncSettings};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! store.save_settings(&TenantSyncSettings::new("acme", "hubspot")).unwrap();
//! assert_eq!(store.list_settings(true).unwrap().len(), 1);
//! ```

pub mod config;
pub mod graph;
pub mod source;
pub mod storage;
pub mod sync;

pub use config::{ConfigError, ConfigResult, SyncConfig};
pub use graph::{Edge, Node, NodeId, NodeRef, PropertyValue, TenantError, TenantName};
pub use source::{
    CanonicalJsonMapper, Connector, RawTableProvider, RecordMapper, SourceDataProvider, SourceError, SyncRecord,
    SyncedEntityType,
};
pub use storage::{GraphStore, OpenStore, SchemaPool, SqliteStore, StorageError, StorageResult, SyncStateStore};
pub use sync::{
    DownstreamWriter, EntityCounts, GraphDownstreamWriter, PooledProviderFactory, ProviderFactory, RetryPolicy,
    SyncError, SyncOrchestrator, SyncResult, SyncRun, TenantSyncSettings,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
