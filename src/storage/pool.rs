//! Per-tenant-schema connection pool
//!
//! Raw schema handles are opened lazily on first use and cached. A handle
//! idle for longer than the TTL is dropped and reopened on the next request.
//! Creation is serialized by a single mutex with a re-check after acquiring
//! it, so concurrent callers never open the same schema twice.

use super::raw::RawStore;
use super::traits::{StorageError, StorageResult};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct PooledSchema {
    store: Arc<RawStore>,
    last_used: Instant,
}

/// Pool of raw schema handles keyed by schema name
pub struct SchemaPool {
    root: PathBuf,
    ttl: Duration,
    entries: DashMap<String, PooledSchema>,
    create_lock: Mutex<()>,
}

impl SchemaPool {
    /// Pool whose schemas live as `<root>/<schema>.db`
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            entries: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Schema name for a source connection: `<source>[_<instance>]_<tenant>`
    pub fn schema_name(source: &str, instance: &str, tenant: &str) -> String {
        if instance.is_empty() {
            format!("{}_{}", source, tenant)
        } else {
            format!("{}_{}_{}", source, instance, tenant)
        }
    }

    pub fn path_for(&self, schema: &str) -> StorageResult<PathBuf> {
        let valid = !schema.is_empty()
            && schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidTableName(schema.to_string()));
        }
        Ok(self.root.join(format!("{}.db", schema)))
    }

    /// Get a live handle, opening the schema if needed
    pub fn get(&self, schema: &str) -> StorageResult<Arc<RawStore>> {
        if let Some(store) = self.fresh(schema) {
            return Ok(store);
        }

        let _guard = self.create_lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(store) = self.fresh(schema) {
            return Ok(store);
        }

        let store = Arc::new(RawStore::open(self.path_for(schema)?, schema)?);
        store.init_ledger()?;
        self.entries.insert(
            schema.to_string(),
            PooledSchema {
                store: Arc::clone(&store),
                last_used: Instant::now(),
            },
        );
        debug!(schema, "opened raw schema");
        Ok(store)
    }

    /// Cached handle if present and not expired; refreshes its idle clock
    fn fresh(&self, schema: &str) -> Option<Arc<RawStore>> {
        let expired = match self.entries.get_mut(schema) {
            Some(mut entry) if entry.last_used.elapsed() < self.ttl => {
                entry.last_used = Instant::now();
                return Some(Arc::clone(&entry.store));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(schema);
            debug!(schema, "evicted idle raw schema");
        }
        None
    }

    /// Drop every handle idle longer than the TTL. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_used.elapsed() < self.ttl);
        before - self.entries.len()
    }

    /// Drop one handle. In-flight users keep their `Arc` until done.
    pub fn close(&self, schema: &str) -> bool {
        self.entries.remove(schema).is_some()
    }

    pub fn close_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
