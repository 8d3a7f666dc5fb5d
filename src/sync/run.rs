//! Tenant sync settings and per-pass run summaries

use crate::source::SyncedEntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Operator switch for one (tenant, source, instance) connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSyncSettings {
    pub tenant: String,
    pub source: String,
    #[serde(default)]
    pub instance: String,
    pub enabled: bool,
}

impl TenantSyncSettings {
    pub fn new(tenant: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            source: source.into(),
            instance: String::new(),
            enabled: true,
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }
}

/// Outcome counters for one entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl EntityCounts {
    pub fn total(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }

    pub fn add(&mut self, other: EntityCounts) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Summary of one pass over a (tenant, source) pair
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub run_id: String,
    pub tenant: String,
    pub source: String,
    pub instance: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub counts: BTreeMap<SyncedEntityType, EntityCounts>,
    /// Stages whose pull failed and were cut short
    pub aborted_stages: Vec<SyncedEntityType>,
}

impl SyncRun {
    pub fn start(settings: &TenantSyncSettings) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            tenant: settings.tenant.clone(),
            source: settings.source.clone(),
            instance: settings.instance.clone(),
            started_at: Utc::now(),
            ended_at: None,
            counts: BTreeMap::new(),
            aborted_stages: Vec::new(),
        }
    }

    /// Set the counters of a stage
    pub fn record(&mut self, entity: SyncedEntityType, counts: EntityCounts) {
        self.counts.insert(entity, counts);
    }

    pub fn abort_stage(&mut self, entity: SyncedEntityType) {
        if !self.aborted_stages.contains(&entity) {
            self.aborted_stages.push(entity);
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Counters summed over every stage
    pub fn totals(&self) -> EntityCounts {
        let mut totals = EntityCounts::default();
        for counts in self.counts.values() {
            totals.add(*counts);
        }
        totals
    }
}
