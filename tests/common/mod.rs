//! Shared helpers for the sync integration tests
//!
//! A `Harness` owns a temporary data directory holding the canonical graph
//! and the raw schemas, plus helpers to seed raw vendor rows and build an
//! orchestrator over them. `MemoryProvider` and `ScriptedWriter` stand in
//! for a source and for the downstream write service.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syncgraph::graph::NodeId;
use syncgraph::source::{MarkResult, ProcessedMark, SourceResult};
use syncgraph::storage::NodeFilter;
use syncgraph::sync::{DownstreamError, DownstreamResult, GraphDownstreamWriter, LogEntryRequest};
use syncgraph::{
    DownstreamWriter, GraphStore, Node, OpenStore, PooledProviderFactory, RetryPolicy, SchemaPool, SourceDataProvider,
    SqliteStore, SyncOrchestrator, SyncRecord, SyncStateStore, SyncedEntityType, TenantName, TenantSyncSettings,
};
use tempfile::TempDir;

pub const TENANT: &str = "acme";

pub fn tenant() -> TenantName {
    TenantName::parse(TENANT).unwrap()
}

/// Visibility polling fast enough for tests
pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1))
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub pool: Arc<SchemaPool>,
    emitted: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("graph.db")).unwrap());
        let pool = Arc::new(SchemaPool::new(dir.path().join("raw"), Duration::from_secs(300)));
        Self {
            dir,
            store,
            pool,
            emitted: AtomicUsize::new(0),
        }
    }

    pub fn enable(&self, source: &str) {
        self.store
            .save_settings(&TenantSyncSettings::new(TENANT, source))
            .unwrap();
    }

    /// Append raw rows to `<source>_<tenant>.<table>`, emitted in slice order
    pub fn insert(&self, source: &str, table: &str, rows: &[Value]) {
        let schema = SchemaPool::schema_name(source, "", TENANT);
        let raw = self.pool.get(&schema).unwrap();
        let base = Utc::now() - ChronoDuration::hours(1);
        for row in rows {
            let n = self.emitted.fetch_add(1, Ordering::SeqCst);
            let record_id = format!("{}-{}-{}", table, n, uuid::Uuid::new_v4());
            raw.insert_raw(table, &record_id, row, base + ChronoDuration::milliseconds(n as i64))
                .unwrap();
        }
    }

    pub fn orchestrator(&self, batch_size: usize) -> SyncOrchestrator {
        self.orchestrator_with_writer(batch_size, Arc::new(GraphDownstreamWriter::new(self.store.clone())))
    }

    pub fn orchestrator_with_writer(&self, batch_size: usize, writer: Arc<dyn DownstreamWriter>) -> SyncOrchestrator {
        let providers = Arc::new(PooledProviderFactory::new(Arc::clone(&self.pool), 10));
        SyncOrchestrator::new(self.store.clone(), self.store.clone(), providers, writer)
            .with_batch_size(batch_size)
            .with_visibility_retry(quick_retry(3))
    }

    pub fn nodes(&self, label: &str) -> Vec<Node> {
        self.store
            .find_nodes(&tenant(), &NodeFilter::new().with_label(label))
            .unwrap()
    }

    pub fn count(&self, label: &str) -> usize {
        self.store.count_nodes(&tenant(), Some(label)).unwrap()
    }

    pub fn edges(&self, relationship: &str) -> usize {
        self.store.count_edges(&tenant(), Some(relationship)).unwrap()
    }

    /// Snapshot of every node and edge count, for idempotence checks
    pub fn snapshot(&self) -> (Vec<Node>, usize) {
        let nodes = self.store.find_nodes(&tenant(), &NodeFilter::new()).unwrap();
        let edges = self.store.count_edges(&tenant(), None).unwrap();
        (nodes, edges)
    }

    /// The canonical node linked to `external_id` in `system`
    pub fn linked(&self, label: &str, system: &str, external_id: &str) -> Option<NodeId> {
        self.store
            .find_linked(&tenant(), label, &NodeId::from_string(system), "externalId", external_id)
            .unwrap()
    }
}

/// In-memory source handing out pre-built records
pub struct MemoryProvider {
    source: String,
    queues: Mutex<BTreeMap<SyncedEntityType, VecDeque<SyncRecord>>>,
    /// (entity, batch size returned) per pull
    pub pulls: Mutex<Vec<(SyncedEntityType, usize)>>,
    /// (sync id, synced, skipped) per mark
    pub marks: Mutex<Vec<(String, bool, bool)>>,
    next_id: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            queues: Mutex::new(BTreeMap::new()),
            pulls: Mutex::new(Vec::new()),
            marks: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, mut record: SyncRecord) {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let meta = record.meta_mut();
        meta.sync_id = format!("mem-{}", n);
        if meta.external_system.is_empty() {
            meta.external_system = self.source.clone();
        }
        let entity = record.entity_type();
        self.queues.lock().unwrap().entry(entity).or_default().push_back(record);
    }

    pub fn pulled_entities(&self) -> Vec<SyncedEntityType> {
        let mut seen = Vec::new();
        for (entity, _) in self.pulls.lock().unwrap().iter() {
            if !seen.contains(entity) {
                seen.push(*entity);
            }
        }
        seen
    }
}

#[async_trait]
impl SourceDataProvider for MemoryProvider {
    fn source_id(&self) -> &str {
        &self.source
    }

    async fn init(&self) -> SourceResult<()> {
        Ok(())
    }

    async fn get_data_for_sync(
        &self,
        entity: SyncedEntityType,
        batch_size: usize,
        _run_id: &str,
    ) -> SourceResult<Vec<SyncRecord>> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(entity).or_default();
        let take = batch_size.min(queue.len());
        let batch: Vec<SyncRecord> = queue.drain(..take).collect();
        self.pulls.lock().unwrap().push((entity, batch.len()));
        Ok(batch)
    }

    async fn mark_processed(&self, mark: ProcessedMark<'_>) -> SourceResult<MarkResult> {
        self.marks
            .lock()
            .unwrap()
            .push((mark.sync_id.to_string(), mark.synced, mark.skipped));
        Ok(MarkResult {
            attempt: 1,
            exhausted: false,
        })
    }

    async fn close(&self) -> SourceResult<()> {
        Ok(())
    }
}

/// Downstream service that accepts writes but may never show them
pub struct ScriptedWriter {
    inner: GraphDownstreamWriter,
    visible: bool,
    /// Upserts still to be rejected before the writer accepts
    rejections: AtomicUsize,
    pub upserts: AtomicUsize,
}

impl ScriptedWriter {
    pub fn new(store: Arc<dyn GraphStore>, visible: bool) -> Self {
        Self {
            inner: GraphDownstreamWriter::new(store),
            visible,
            rejections: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(self, count: usize) -> Self {
        self.rejections.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl DownstreamWriter for ScriptedWriter {
    async fn upsert_log_entry(&self, request: LogEntryRequest) -> DownstreamResult<String> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(DownstreamError::Rejected("service unavailable".into()));
        }
        self.inner.upsert_log_entry(request).await
    }

    async fn is_visible(&self, tenant: &TenantName, id: &str) -> DownstreamResult<bool> {
        if !self.visible {
            return Ok(false);
        }
        self.inner.is_visible(tenant, id).await
    }
}
