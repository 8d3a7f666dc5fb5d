//! Storage backends
//!
//! The canonical graph lives behind the `GraphStore` trait, implemented by
//! `SqliteStore`. Raw vendor data and the processing ledger live in one
//! `RawStore` per tenant schema, handed out by the `SchemaPool`.

mod ledger;
mod pool;
mod raw;
mod sqlite;
mod traits;

pub use ledger::{LedgerEntry, LedgerKey, LedgerUpdate};
pub use pool::SchemaPool;
pub use raw::{RawRecord, RawStore, UnprocessedQuery};
pub use sqlite::SqliteStore;
pub use traits::{GraphStore, NodeFilter, OpenStore, StorageError, StorageResult, SyncStateStore};
