//! Storage trait definitions

use crate::graph::{Edge, Node, NodeId, PropertyValue, TenantName};
use crate::sync::{SyncRun, TenantSyncSettings};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for querying nodes
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Filter by label (primary or secondary)
    pub label: Option<String>,
    /// Filter by a single property value
    pub property: Option<(String, PropertyValue)>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.property = Some((key.into(), value.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Trait for canonical graph storage backends
///
/// Every operation is scoped to a tenant; nodes and edges of different
/// tenants never see each other. Implementations must be thread-safe
/// (Send + Sync) since stages share one store.
pub trait GraphStore: Send + Sync {
    // === Node Operations ===

    /// Save a node (insert or replace labels and properties)
    fn save_node(&self, tenant: &TenantName, node: &Node) -> StorageResult<()>;

    /// Load a node by ID
    fn load_node(&self, tenant: &TenantName, id: &NodeId) -> StorageResult<Option<Node>>;

    /// Find nodes matching filter criteria
    fn find_nodes(&self, tenant: &TenantName, filter: &NodeFilter) -> StorageResult<Vec<Node>>;

    /// Count nodes, optionally restricted to a label
    fn count_nodes(&self, tenant: &TenantName, label: Option<&str>) -> StorageResult<usize>;

    // === Edge Operations ===

    /// Save an edge, replacing the properties of an existing one
    fn save_edge(&self, tenant: &TenantName, edge: &Edge) -> StorageResult<()>;

    /// Create an edge only if no edge with the same key exists.
    /// Returns true if the edge was created.
    fn merge_edge(&self, tenant: &TenantName, edge: &Edge) -> StorageResult<bool>;

    /// Load the edge keyed by (source, relationship, target)
    fn load_edge(
        &self,
        tenant: &TenantName,
        source: &NodeId,
        relationship: &str,
        target: &NodeId,
    ) -> StorageResult<Option<Edge>>;

    /// Get edges originating from a node
    fn get_edges_from(
        &self,
        tenant: &TenantName,
        id: &NodeId,
        relationship: Option<&str>,
    ) -> StorageResult<Vec<Edge>>;

    /// Get edges targeting a node
    fn get_edges_to(
        &self,
        tenant: &TenantName,
        id: &NodeId,
        relationship: Option<&str>,
    ) -> StorageResult<Vec<Edge>>;

    /// Count edges, optionally restricted to a relationship type
    fn count_edges(&self, tenant: &TenantName, relationship: Option<&str>) -> StorageResult<usize>;

    // === Identity Lookup ===

    /// Find the node with `label` whose `IS_LINKED_WITH` edge to
    /// `external_system` carries `property == value`
    fn find_linked(
        &self,
        tenant: &TenantName,
        label: &str,
        external_system: &NodeId,
        property: &str,
        value: &str,
    ) -> StorageResult<Option<NodeId>>;
}

/// Persistence for operator settings and run summaries
pub trait SyncStateStore: Send + Sync {
    /// Insert or update a (tenant, source, instance) settings row
    fn save_settings(&self, settings: &TenantSyncSettings) -> StorageResult<()>;

    /// List settings rows; `enabled_only` filters to active ones
    fn list_settings(&self, enabled_only: bool) -> StorageResult<Vec<TenantSyncSettings>>;

    /// Persist a finalized run
    fn save_run(&self, run: &SyncRun) -> StorageResult<()>;

    /// Most recent runs first
    fn list_runs(&self, tenant: Option<&TenantName>, limit: usize) -> StorageResult<Vec<SyncRun>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
