//! Sync orchestrator
//!
//! A pass walks every enabled (tenant, source) pair. For each pair it makes
//! sure the ExternalSystem node exists, then runs one stage per entity type
//! in dependency order, pulling batches until the provider runs dry. Each
//! record is matched, merged, linked and reported back to the provider's
//! ledger; one bad record never stops its stage and one failed pull never
//! stops the pass.

use super::downstream::{DownstreamError, DownstreamWriter, ExternalSystemRef, LogEntryRequest, SourceFields};
use super::error::{SyncError, SyncResult};
use super::linker::RelationshipLinker;
use super::matcher::EntityMatcher;
use super::retry::RetryPolicy;
use super::run::{EntityCounts, SyncRun, TenantSyncSettings};
use super::stages::{check_record, ensure_external_system, EntitySyncer};
use crate::graph::{label, NodeId, TenantName};
use crate::source::{
    CanonicalJsonMapper, Connector, ProcessedMark, RawTableProvider, RecordMapper, SourceDataProvider,
    SyncRecord, SyncedEntityType,
};
use crate::storage::{GraphStore, SchemaPool, SyncStateStore};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Builds the provider for a (tenant, source) pair
pub trait ProviderFactory: Send + Sync {
    /// `None` when the source is not one this deployment can read
    fn provider(&self, settings: &TenantSyncSettings, tenant: &TenantName) -> Option<Arc<dyn SourceDataProvider>>;
}

/// Raw-table providers over a shared schema pool
pub struct PooledProviderFactory {
    pool: Arc<SchemaPool>,
    max_attempts: u32,
    mapper: Arc<dyn RecordMapper>,
}

impl PooledProviderFactory {
    pub fn new(pool: Arc<SchemaPool>, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts,
            mapper: Arc::new(CanonicalJsonMapper),
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn RecordMapper>) -> Self {
        self.mapper = mapper;
        self
    }
}

impl ProviderFactory for PooledProviderFactory {
    fn provider(&self, settings: &TenantSyncSettings, tenant: &TenantName) -> Option<Arc<dyn SourceDataProvider>> {
        let connector = match settings.source.parse::<Connector>() {
            Ok(connector) => connector,
            Err(e) => {
                warn!(tenant = %tenant, source = %settings.source, error = %e, "skipping unknown source");
                return None;
            }
        };
        let evicted = self.pool.evict_expired();
        if evicted > 0 {
            debug!(evicted, "evicted idle raw schemas");
        }
        let provider = RawTableProvider::new(connector, tenant.clone(), &settings.instance, Arc::clone(&self.pool))
            .with_max_attempts(self.max_attempts)
            .with_mapper(Arc::clone(&self.mapper));
        Some(Arc::new(provider))
    }
}

/// Shared state of the log entry tasks of one stage
struct LogEntryJob {
    graph: Arc<dyn GraphStore>,
    writer: Arc<dyn DownstreamWriter>,
    lock: Arc<Mutex<()>>,
    tenant: TenantName,
    source: String,
    sync_date: DateTime<Utc>,
    visibility: RetryPolicy,
}

impl LogEntryJob {
    async fn sync(&self, record: &SyncRecord) -> SyncResult<NodeId> {
        check_record(record)?;
        let SyncRecord::LogEntry(data) = record else {
            return Err(SyncError::Skipped(format!("not a log entry: {}", record.entity_type())));
        };
        let system = NodeId::from_string(self.source.as_str());
        let system_known = data.meta.external_system == self.source
            && self
                .graph
                .load_node(&self.tenant, &system)?
                .is_some_and(|n| n.has_label(label::EXTERNAL_SYSTEM));
        if !system_known {
            return Err(SyncError::MissingExternalSystem {
                tenant: self.tenant.to_string(),
                system: data.meta.external_system.clone(),
            });
        }

        // Identity lookup, write and visibility check run one record at a time
        let _guard = self.lock.lock().await;

        let store = self.graph.as_ref();
        let existing = EntityMatcher::new(store).get_matched_id(
            &self.tenant,
            label::LOG_ENTRY,
            &self.source,
            &data.meta.external_id,
        )?;
        let linker = RelationshipLinker::new(store);
        let author = linker.resolve(&self.tenant, &system, &data.author, &[label::USER])?;
        let organization = linker.resolve(&self.tenant, &system, &data.logged_organization, &[label::ORGANIZATION])?;

        let request = LogEntryRequest {
            id: (!existing.is_empty()).then_some(existing),
            tenant: self.tenant.clone(),
            content: data.content.clone(),
            content_type: data.content_type.clone(),
            started_at: data.started_at,
            author_user_id: author.map(|n| n.id.as_str().to_string()),
            logged_organization_id: organization.map(|n| n.id.as_str().to_string()),
            source_fields: SourceFields {
                source: self.source.clone(),
                app_source: self.source.clone(),
                external_system: ExternalSystemRef {
                    id: self.source.clone(),
                    external_id: data.meta.external_id.clone(),
                    external_url: data.meta.external_url.clone(),
                    sync_date: self.sync_date,
                },
            },
        };
        let writer = self.writer.as_ref();
        let id = self
            .visibility
            .retry(|| writer.upsert_log_entry(request.clone()))
            .await?;

        let tenant = &self.tenant;
        let written = id.as_str();
        let visible = self
            .visibility
            .poll_until(move || writer.is_visible(tenant, written))
            .await?;
        if !visible.satisfied {
            return Err(SyncError::NotVisible(id));
        }
        Ok(NodeId::from_string(id))
    }
}

/// Outcome of one record, ready to be reported to the provider
struct Processed {
    sync_id: String,
    external_id: String,
    result: SyncResult<NodeId>,
}

pub struct SyncOrchestrator {
    graph: Arc<dyn GraphStore>,
    state: Arc<dyn SyncStateStore>,
    providers: Arc<dyn ProviderFactory>,
    writer: Arc<dyn DownstreamWriter>,
    batch_size: usize,
    pass_interval: Duration,
    visibility: RetryPolicy,
}

impl SyncOrchestrator {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        state: Arc<dyn SyncStateStore>,
        providers: Arc<dyn ProviderFactory>,
        writer: Arc<dyn DownstreamWriter>,
    ) -> Self {
        Self {
            graph,
            state,
            providers,
            writer,
            batch_size: DEFAULT_BATCH_SIZE,
            pass_interval: Duration::from_secs(60),
            visibility: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pass_interval(mut self, pass_interval: Duration) -> Self {
        self.pass_interval = pass_interval;
        self
    }

    pub fn with_visibility_retry(mut self, policy: RetryPolicy) -> Self {
        self.visibility = policy;
        self
    }

    /// Repeat passes until `shutdown` resolves. Shutdown is observed between passes.
    pub async fn run_forever<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            match self.run_pass().await {
                Ok(runs) => info!(runs = runs.len(), "sync pass finished"),
                Err(e) => warn!(error = %e, "sync pass failed"),
            }
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping");
                    break;
                }
                _ = tokio::time::sleep(self.pass_interval) => {}
            }
        }
    }

    /// One pass over every enabled (tenant, source) pair, sequentially
    pub async fn run_pass(&self) -> SyncResult<Vec<SyncRun>> {
        let mut runs = Vec::new();
        for settings in self.state.list_settings(true)? {
            if let Some(run) = self.sync_tenant(&settings).await {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    /// Sync one (tenant, source) pair. `None` when the pair was skipped.
    pub async fn sync_tenant(&self, settings: &TenantSyncSettings) -> Option<SyncRun> {
        let tenant = match TenantName::parse(settings.tenant.as_str()) {
            Ok(tenant) => tenant,
            Err(e) => {
                warn!(tenant = %settings.tenant, source = %settings.source, error = %e, "skipping invalid tenant");
                return None;
            }
        };
        let provider = self.providers.provider(settings, &tenant)?;
        Some(self.sync_source(settings, &tenant, provider.as_ref()).await)
    }

    /// Run every stage of `provider` for `tenant` and persist the run summary
    #[tracing::instrument(skip_all, fields(tenant = %tenant, source = %provider.source_id()))]
    pub async fn sync_source(
        &self,
        settings: &TenantSyncSettings,
        tenant: &TenantName,
        provider: &dyn SourceDataProvider,
    ) -> SyncRun {
        let mut run = SyncRun::start(settings);
        let sync_date = Utc::now();
        let mut stages = provider.entity_types();
        stages.sort();
        info!(run_id = %run.run_id, stages = stages.len(), "sync run started");

        let prepared = match provider.init().await {
            Ok(()) => ensure_external_system(self.graph.as_ref(), tenant, provider.source_id()).map(|_| ()),
            Err(e) => Err(e.into()),
        };
        match prepared {
            Ok(()) => {
                let run_id = run.run_id.clone();
                for entity in stages {
                    let counts = self.run_stage(tenant, provider, entity, &run_id, sync_date, &mut run).await;
                    run.record(entity, counts);
                }
            }
            Err(e) => {
                warn!(error = %e, "could not prepare source, skipping all stages");
                for entity in stages {
                    run.abort_stage(entity);
                }
            }
        }

        if let Err(e) = provider.close().await {
            warn!(error = %e, "closing provider failed");
        }
        run.finish();
        if let Err(e) = self.state.save_run(&run) {
            warn!(run_id = %run.run_id, error = %e, "could not persist sync run");
        }
        let totals = run.totals();
        info!(
            run_id = %run.run_id,
            completed = totals.completed,
            failed = totals.failed,
            skipped = totals.skipped,
            "sync run finished"
        );
        run
    }

    /// Pull and process batches of one entity type until the provider runs dry
    #[tracing::instrument(skip_all, fields(entity = %entity))]
    async fn run_stage(
        &self,
        tenant: &TenantName,
        provider: &dyn SourceDataProvider,
        entity: SyncedEntityType,
        run_id: &str,
        sync_date: DateTime<Utc>,
        run: &mut SyncRun,
    ) -> EntityCounts {
        let mut counts = EntityCounts::default();
        loop {
            let batch = match provider.get_data_for_sync(entity, self.batch_size, run_id).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "pull failed, aborting stage");
                    run.abort_stage(entity);
                    break;
                }
            };
            let pulled = batch.len();
            if pulled == 0 {
                break;
            }

            let processed = if entity == SyncedEntityType::LogEntry {
                self.process_log_entries(tenant, provider.source_id(), sync_date, batch).await
            } else {
                let syncer = EntitySyncer::new(self.graph.as_ref(), tenant.clone(), provider.source_id(), sync_date);
                batch
                    .iter()
                    .map(|record| Processed {
                        sync_id: record.meta().sync_id.clone(),
                        external_id: record.meta().external_id.clone(),
                        result: syncer.sync(record),
                    })
                    .collect()
            };

            let marked = self.report(provider, run_id, processed, &mut counts).await;
            if marked == 0 {
                warn!(pulled, "no record of the batch could be marked, aborting stage");
                run.abort_stage(entity);
                break;
            }
            if pulled < self.batch_size {
                break;
            }
        }
        debug!(
            completed = counts.completed,
            failed = counts.failed,
            skipped = counts.skipped,
            "stage finished"
        );
        counts
    }

    /// One task per log entry; the tasks serialize on a shared lock
    async fn process_log_entries(
        &self,
        tenant: &TenantName,
        source: &str,
        sync_date: DateTime<Utc>,
        batch: Vec<SyncRecord>,
    ) -> Vec<Processed> {
        let job = Arc::new(LogEntryJob {
            graph: Arc::clone(&self.graph),
            writer: Arc::clone(&self.writer),
            lock: Arc::new(Mutex::new(())),
            tenant: tenant.clone(),
            source: source.to_string(),
            sync_date,
            visibility: self.visibility.clone(),
        });

        let handles: Vec<_> = batch
            .into_iter()
            .map(|record| {
                let job = Arc::clone(&job);
                let sync_id = record.meta().sync_id.clone();
                let external_id = record.meta().external_id.clone();
                let handle = tokio::spawn(async move { job.sync(&record).await });
                (sync_id, external_id, handle)
            })
            .collect();

        let mut processed = Vec::with_capacity(handles.len());
        for (sync_id, external_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Downstream(DownstreamError::Rejected(format!(
                    "log entry task failed: {}",
                    e
                )))),
            };
            processed.push(Processed {
                sync_id,
                external_id,
                result,
            });
        }
        processed
    }

    /// Report outcomes to the provider and count them. Returns how many were recorded.
    async fn report(
        &self,
        provider: &dyn SourceDataProvider,
        run_id: &str,
        processed: Vec<Processed>,
        counts: &mut EntityCounts,
    ) -> usize {
        let mut marked = 0;
        for item in processed {
            let (synced, skipped, reason) = match &item.result {
                Ok(_) => {
                    counts.completed += 1;
                    (true, false, String::new())
                }
                Err(e) if e.is_terminal() => {
                    counts.skipped += 1;
                    debug!(external_id = %item.external_id, reason = %e, "record skipped");
                    (false, true, e.to_string())
                }
                Err(e) => {
                    counts.failed += 1;
                    warn!(external_id = %item.external_id, sync_id = %item.sync_id, error = %e, "record failed");
                    (false, false, e.to_string())
                }
            };

            let mark = ProcessedMark {
                sync_id: &item.sync_id,
                run_id,
                synced,
                skipped,
                reason: &reason,
            };
            match provider.mark_processed(mark).await {
                Ok(result) => {
                    marked += 1;
                    if result.exhausted {
                        warn!(
                            external_id = %item.external_id,
                            sync_id = %item.sync_id,
                            attempts = result.attempt,
                            "record reached its attempt ceiling and will not be retried"
                        );
                    }
                }
                Err(e) => warn!(sync_id = %item.sync_id, error = %e, "could not record outcome"),
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MarkResult, SourceError, SourceResult, SyncMeta, UserData};
    use crate::storage::{OpenStore, SqliteStore};
    use crate::sync::downstream::GraphDownstreamWriter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoProviders;

    impl ProviderFactory for NoProviders {
        fn provider(&self, _: &TenantSyncSettings, _: &TenantName) -> Option<Arc<dyn SourceDataProvider>> {
            None
        }
    }

    /// Hands out one user per pull; pulls or marks can be made to fail
    struct BrokenProvider {
        fail_pulls: bool,
        pulls: AtomicUsize,
    }

    #[async_trait]
    impl SourceDataProvider for BrokenProvider {
        fn source_id(&self) -> &str {
            "hubspot"
        }

        fn entity_types(&self) -> Vec<SyncedEntityType> {
            vec![SyncedEntityType::Organization, SyncedEntityType::User]
        }

        async fn init(&self) -> SourceResult<()> {
            Ok(())
        }

        async fn get_data_for_sync(
            &self,
            entity: SyncedEntityType,
            _batch_size: usize,
            _run_id: &str,
        ) -> SourceResult<Vec<SyncRecord>> {
            let n = self.pulls.fetch_add(1, Ordering::SeqCst);
            if self.fail_pulls {
                return Err(SourceError::Closed);
            }
            if entity != SyncedEntityType::User {
                return Ok(Vec::new());
            }
            let mut meta = SyncMeta {
                external_id: format!("u-{}", n),
                external_system: "hubspot".into(),
                ..Default::default()
            };
            meta.sync_id = format!("s-{}", n);
            Ok(vec![SyncRecord::User(UserData {
                meta,
                name: "Someone".into(),
                ..Default::default()
            })])
        }

        async fn mark_processed(&self, mark: ProcessedMark<'_>) -> SourceResult<MarkResult> {
            Err(SourceError::UnknownSyncId(mark.sync_id.to_string()))
        }

        async fn close(&self) -> SourceResult<()> {
            Ok(())
        }
    }

    fn create_test_orchestrator() -> (Arc<SqliteStore>, SyncOrchestrator) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let writer = Arc::new(GraphDownstreamWriter::new(store.clone()));
        let orchestrator = SyncOrchestrator::new(store.clone(), store.clone(), Arc::new(NoProviders), writer)
            .with_batch_size(1)
            .with_pass_interval(Duration::from_millis(1));
        (store, orchestrator)
    }

    fn tenant() -> TenantName {
        TenantName::parse("acme").unwrap()
    }

    #[tokio::test]
    async fn failed_pull_aborts_the_stage_but_finishes_the_run() {
        let (store, orchestrator) = create_test_orchestrator();
        let provider = BrokenProvider {
            fail_pulls: true,
            pulls: AtomicUsize::new(0),
        };
        let settings = TenantSyncSettings::new("acme", "hubspot");

        let run = orchestrator.sync_source(&settings, &tenant(), &provider).await;
        assert!(run.is_finished());
        assert_eq!(
            run.aborted_stages,
            vec![SyncedEntityType::User, SyncedEntityType::Organization],
            "stages run in dependency order"
        );
        assert_eq!(provider.pulls.load(Ordering::SeqCst), 2);
        assert_eq!(store.list_runs(None, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unmarkable_batch_stops_the_stage() {
        let (store, orchestrator) = create_test_orchestrator();
        let provider = BrokenProvider {
            fail_pulls: false,
            pulls: AtomicUsize::new(0),
        };
        let settings = TenantSyncSettings::new("acme", "hubspot");

        let run = orchestrator.sync_source(&settings, &tenant(), &provider).await;
        assert_eq!(run.aborted_stages, vec![SyncedEntityType::User]);
        assert_eq!(run.counts[&SyncedEntityType::User].completed, 1);
        assert_eq!(provider.pulls.load(Ordering::SeqCst), 2);
        assert_eq!(store.count_nodes(&tenant(), Some(label::USER)).unwrap(), 1);
    }

    #[tokio::test]
    async fn pass_skips_pairs_without_a_provider() {
        let (store, orchestrator) = create_test_orchestrator();
        store.save_settings(&TenantSyncSettings::new("acme", "hubspot")).unwrap();

        assert!(orchestrator.run_pass().await.unwrap().is_empty());
        assert!(store.list_runs(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_forever_returns_on_shutdown() {
        let (_store, orchestrator) = create_test_orchestrator();
        tokio::time::timeout(Duration::from_secs(5), orchestrator.run_forever(async {}))
            .await
            .unwrap();
    }
}
