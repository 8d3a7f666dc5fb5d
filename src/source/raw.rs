//! Provider over the raw tables of a tenant schema
//!
//! `RawTableProvider` reads `_airbyte_raw_<suffix>` streams through the
//! schema pool, turns each raw row into a DTO with the injected
//! `RecordMapper` and tracks what it handed out so outcomes land on the
//! exact raw row they came from.

use super::connector::Connector;
use super::traits::{MarkResult, ProcessedMark, SourceDataProvider, SourceError, SourceResult};
use super::types::{SyncRecord, SyncedEntityType};
use crate::graph::TenantName;
use crate::storage::{LedgerEntry, LedgerKey, LedgerUpdate, RawStore, SchemaPool, UnprocessedQuery};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Converts one raw vendor row into a canonical DTO
pub trait RecordMapper: Send + Sync {
    fn map(
        &self,
        entity: SyncedEntityType,
        table_suffix: &str,
        raw: &serde_json::Value,
    ) -> Result<SyncRecord, String>;
}

/// Mapper for streams whose rows are already canonical DTO JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalJsonMapper;

impl RecordMapper for CanonicalJsonMapper {
    fn map(
        &self,
        entity: SyncedEntityType,
        _table_suffix: &str,
        raw: &serde_json::Value,
    ) -> Result<SyncRecord, String> {
        SyncRecord::from_json(entity, raw.clone()).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    entity: SyncedEntityType,
    table_suffix: &'static str,
    record_id: String,
    external_id: String,
}

/// Sync id of a raw row; row ids are only unique within their table
fn sync_id(table_suffix: &str, record_id: &str) -> String {
    format!("{}:{}", table_suffix, record_id)
}

pub struct RawTableProvider {
    connector: Connector,
    tenant: TenantName,
    schema: String,
    pool: Arc<SchemaPool>,
    mapper: Arc<dyn RecordMapper>,
    max_attempts: u32,
    in_flight: DashMap<String, InFlight>,
    closed: AtomicBool,
}

impl RawTableProvider {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

    pub fn new(connector: Connector, tenant: TenantName, instance: &str, pool: Arc<SchemaPool>) -> Self {
        let schema = SchemaPool::schema_name(connector.source_id(), instance, tenant.as_str());
        Self {
            connector,
            tenant,
            schema,
            pool,
            mapper: Arc::new(CanonicalJsonMapper),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            in_flight: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn RecordMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn connector(&self) -> Connector {
        self.connector
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Records handed out but not yet marked
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Failed records of this tenant that reached the attempt ceiling
    pub fn exhausted_records(&self) -> SourceResult<Vec<LedgerEntry>> {
        Ok(self
            .store()?
            .exhausted_records(self.tenant.as_str(), self.max_attempts)?)
    }

    fn store(&self) -> SourceResult<Arc<RawStore>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        Ok(self.pool.get(&self.schema)?)
    }

    /// Map one raw row. Unmappable rows become empty DTOs flagged as skipped.
    fn to_record(&self, entity: SyncedEntityType, table_suffix: &str, raw: &serde_json::Value) -> SyncRecord {
        match self.mapper.map(entity, table_suffix, raw) {
            Ok(record) => record,
            Err(reason) => {
                warn!(schema = %self.schema, %entity, table_suffix, %reason, "raw record could not be mapped");
                let mut record = SyncRecord::empty(entity);
                let meta = record.meta_mut();
                meta.external_id = raw
                    .get("externalId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                meta.skip = true;
                meta.skip_reason = format!("unmappable record: {}", reason);
                record
            }
        }
    }
}

#[async_trait]
impl SourceDataProvider for RawTableProvider {
    fn source_id(&self) -> &str {
        self.connector.source_id()
    }

    async fn init(&self) -> SourceResult<()> {
        self.store()?.init_ledger()?;
        Ok(())
    }

    async fn get_data_for_sync(
        &self,
        entity: SyncedEntityType,
        batch_size: usize,
        run_id: &str,
    ) -> SourceResult<Vec<SyncRecord>> {
        let store = self.store()?;
        let mut records = Vec::new();

        for &table_suffix in self.connector.table_suffixes(entity) {
            let remaining = batch_size.saturating_sub(records.len());
            if remaining == 0 {
                break;
            }

            let raw = store.fetch_unprocessed(&UnprocessedQuery {
                tenant: self.tenant.as_str(),
                entity: entity.as_str(),
                table_suffix,
                run_id,
                max_attempts: self.max_attempts,
                limit: remaining,
            })?;

            for row in raw {
                let mut record = self.to_record(entity, table_suffix, &row.data);
                let meta = record.meta_mut();
                meta.sync_id = sync_id(table_suffix, &row.record_id);
                if meta.external_system.is_empty() {
                    meta.external_system = self.connector.source_id().to_string();
                }
                self.in_flight.insert(
                    meta.sync_id.clone(),
                    InFlight {
                        entity,
                        table_suffix,
                        record_id: row.record_id,
                        external_id: meta.external_id.clone(),
                    },
                );
                records.push(record);
            }
        }

        debug!(schema = %self.schema, %entity, count = records.len(), "pulled raw records");
        Ok(records)
    }

    async fn mark_processed(&self, mark: ProcessedMark<'_>) -> SourceResult<MarkResult> {
        let store = self.store()?;
        let (_, flight) = self
            .in_flight
            .remove(mark.sync_id)
            .ok_or_else(|| SourceError::UnknownSyncId(mark.sync_id.to_string()))?;

        let update = LedgerUpdate {
            run_id: mark.run_id.to_string(),
            external_id: flight.external_id,
            synced: mark.synced,
            skipped: mark.skipped,
            reason: mark.reason.to_string(),
        };
        let key = LedgerKey {
            tenant: self.tenant.as_str(),
            entity: flight.entity.as_str(),
            table_suffix: flight.table_suffix,
            record_id: &flight.record_id,
        };
        let entry = store.mark_processed(&key, &update)?;

        Ok(MarkResult {
            attempt: entry.attempt,
            exhausted: entry.is_exhausted(self.max_attempts),
        })
    }

    fn entity_types(&self) -> Vec<SyncedEntityType> {
        self.connector.entity_types()
    }

    /// Stops handing out records. The schema handle stays pooled until its TTL runs out.
    async fn close(&self) -> SourceResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.in_flight.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn create_test_provider(dir: &std::path::Path) -> (Arc<SchemaPool>, RawTableProvider) {
        let pool = Arc::new(SchemaPool::new(dir, Duration::from_secs(60)));
        let tenant = TenantName::parse("acme").unwrap();
        let provider = RawTableProvider::new(Connector::ZendeskSupport, tenant, "", Arc::clone(&pool));
        (pool, provider)
    }

    fn seed(pool: &SchemaPool, suffix: &str, rows: &[(&str, serde_json::Value)]) {
        let store = pool.get("zendesk_support_acme").unwrap();
        let base = Utc::now();
        for (i, (id, data)) in rows.iter().enumerate() {
            store
                .insert_raw(suffix, id, data, base + chrono::Duration::milliseconds(i as i64))
                .unwrap();
        }
    }

    fn mark<'a>(sync_id: &'a str, run_id: &'a str, synced: bool) -> ProcessedMark<'a> {
        ProcessedMark {
            sync_id,
            run_id,
            synced,
            skipped: false,
            reason: if synced { "" } else { "boom" },
        }
    }

    #[tokio::test]
    async fn reads_every_stream_of_an_entity_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, provider) = create_test_provider(dir.path());
        provider.init().await.unwrap();
        seed(&pool, "organizations", &[("o-1", json!({"externalId": "1", "name": "Acme"}))]);
        seed(&pool, "users", &[("u-1", json!({"externalId": "2", "name": "Globex"}))]);

        let records = provider
            .get_data_for_sync(SyncedEntityType::Organization, 10, "run-1")
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].meta().sync_id, "organizations:o-1");
        assert_eq!(records[1].meta().sync_id, "users:u-1");
        assert_eq!(records[0].meta().external_system, "zendesk_support");
        assert_eq!(provider.in_flight(), 2);
    }

    #[tokio::test]
    async fn batch_size_spans_streams() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, provider) = create_test_provider(dir.path());
        seed(
            &pool,
            "organizations",
            &[("o-1", json!({"externalId": "1"})), ("o-2", json!({"externalId": "2"}))],
        );
        seed(&pool, "users", &[("u-1", json!({"externalId": "3"}))]);

        let records = provider
            .get_data_for_sync(SyncedEntityType::Organization, 2, "run-1")
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.meta().sync_id.starts_with("organizations:")));
    }

    #[tokio::test]
    async fn marked_records_leave_the_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, provider) = create_test_provider(dir.path());
        seed(
            &pool,
            "tickets",
            &[("t-1", json!({"externalId": "1"})), ("t-2", json!({"externalId": "2"}))],
        );

        provider.get_data_for_sync(SyncedEntityType::Issue, 10, "run-1").await.unwrap();
        let synced = provider.mark_processed(mark("tickets:t-1", "run-1", true)).await.unwrap();
        let failed = provider.mark_processed(mark("tickets:t-2", "run-1", false)).await.unwrap();
        assert_eq!(synced.attempt, 1);
        assert!(!failed.exhausted);

        assert!(provider
            .get_data_for_sync(SyncedEntityType::Issue, 10, "run-1")
            .await
            .unwrap()
            .is_empty());
        let retry = provider.get_data_for_sync(SyncedEntityType::Issue, 10, "run-2").await.unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].meta().sync_id, "tickets:t-2");
    }

    #[tokio::test]
    async fn same_row_id_in_two_streams_is_tracked_separately() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, provider) = create_test_provider(dir.path());
        seed(&pool, "organizations", &[("7", json!({"externalId": "org-7"}))]);
        seed(&pool, "users", &[("7", json!({"externalId": "user-7"}))]);

        let records = provider
            .get_data_for_sync(SyncedEntityType::Organization, 10, "run-1")
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(provider.in_flight(), 2);

        provider.mark_processed(mark("organizations:7", "run-1", true)).await.unwrap();
        provider.mark_processed(mark("users:7", "run-1", false)).await.unwrap();

        let retry = provider
            .get_data_for_sync(SyncedEntityType::Organization, 10, "run-2")
            .await
            .unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].meta().sync_id, "users:7");
        assert_eq!(retry[0].meta().external_id, "user-7");
    }

    #[tokio::test]
    async fn unknown_sync_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_pool, provider) = create_test_provider(dir.path());
        let err = provider.mark_processed(mark("nope", "run-1", true)).await.unwrap_err();
        assert!(matches!(err, SourceError::UnknownSyncId(_)));
    }

    #[tokio::test]
    async fn unmappable_rows_come_back_flagged_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, provider) = create_test_provider(dir.path());
        seed(&pool, "tickets", &[("t-1", json!({"externalId": "7", "subject": 12}))]);

        let records = provider.get_data_for_sync(SyncedEntityType::Issue, 10, "run-1").await.unwrap();
        assert_eq!(records.len(), 1);
        let meta = records[0].meta();
        assert!(meta.skip);
        assert_eq!(meta.external_id, "7");
        assert!(meta.skip_reason.starts_with("unmappable record"));
    }

    #[tokio::test]
    async fn failing_record_reports_exhaustion_at_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, provider) = create_test_provider(dir.path());
        let provider = provider.with_max_attempts(2);
        seed(&pool, "tickets", &[("t-1", json!({"externalId": "1"}))]);

        let mut results = Vec::new();
        for run in ["run-1", "run-2", "run-3"] {
            for record in provider.get_data_for_sync(SyncedEntityType::Issue, 10, run).await.unwrap() {
                results.push(provider.mark_processed(mark(&record.meta().sync_id, run, false)).await.unwrap());
            }
        }

        assert_eq!(results.len(), 2);
        assert!(!results[0].exhausted);
        assert!(results[1].exhausted);
        assert_eq!(provider.exhausted_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_entity_yields_nothing_and_close_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let (_pool, provider) = create_test_provider(dir.path());
        assert!(provider
            .get_data_for_sync(SyncedEntityType::Meeting, 10, "run-1")
            .await
            .unwrap()
            .is_empty());

        provider.close().await.unwrap();
        provider.close().await.unwrap();
        assert!(matches!(
            provider.get_data_for_sync(SyncedEntityType::Issue, 10, "run-1").await,
            Err(SourceError::Closed)
        ));
    }
}
