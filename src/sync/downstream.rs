//! Downstream write service boundary
//!
//! Log entries are not merged in-process: they are handed to a write
//! service and only counted once the service reports them visible.
//! `GraphDownstreamWriter` is the in-process service backed by the
//! canonical store.

use super::error::SyncError;
use super::merge::MergeEngine;
use super::rules;
use crate::graph::{label, relationship, Edge, NodeId, NodeRef, TenantName};
use crate::source::{LogEntryData, SyncMeta};
use crate::storage::{GraphStore, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("request rejected: {0}")]
    Rejected(String),
}

pub type DownstreamResult<T> = Result<T, DownstreamError>;

/// External system identity of a written entity
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSystemRef {
    pub id: String,
    pub external_id: String,
    pub external_url: String,
    pub sync_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFields {
    pub source: String,
    pub app_source: String,
    pub external_system: ExternalSystemRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntryRequest {
    /// Existing log entry to update; a new one is created when absent
    pub id: Option<String>,
    pub tenant: TenantName,
    pub content: String,
    pub content_type: String,
    pub started_at: Option<DateTime<Utc>>,
    pub author_user_id: Option<String>,
    pub logged_organization_id: Option<String>,
    pub source_fields: SourceFields,
}

#[async_trait]
pub trait DownstreamWriter: Send + Sync {
    /// Create or update a log entry; returns its id
    async fn upsert_log_entry(&self, request: LogEntryRequest) -> DownstreamResult<String>;

    /// Whether the entity can be read back yet
    async fn is_visible(&self, tenant: &TenantName, id: &str) -> DownstreamResult<bool>;
}

pub struct GraphDownstreamWriter {
    store: Arc<dyn GraphStore>,
}

impl GraphDownstreamWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DownstreamWriter for GraphDownstreamWriter {
    async fn upsert_log_entry(&self, request: LogEntryRequest) -> DownstreamResult<String> {
        let store = self.store.as_ref();
        let tenant = &request.tenant;
        let system = &request.source_fields.external_system;
        let id = request.id.as_deref().map(NodeId::from_string).unwrap_or_default();

        let data = LogEntryData {
            meta: SyncMeta {
                external_id: system.external_id.clone(),
                external_system: system.id.clone(),
                external_url: system.external_url.clone(),
                ..Default::default()
            },
            content: request.content.clone(),
            content_type: request.content_type.clone(),
            started_at: request.started_at,
            ..Default::default()
        };
        let outcome = MergeEngine::new(store)
            .upsert(tenant, system.sync_date, &rules::log_entry(id, &data))
            .map_err(|e| match e {
                SyncError::Storage(e) => DownstreamError::Storage(e),
                other => DownstreamError::Rejected(other.to_string()),
            })?;

        let entry = NodeRef::new(outcome.id.clone(), label::LOG_ENTRY);
        if let Some(org) = &request.logged_organization_id {
            let org = NodeRef::new(NodeId::from_string(org.as_str()), label::ORGANIZATION);
            store.merge_edge(tenant, &Edge::new(&org, relationship::LOGGED, &entry))?;
        }
        if let Some(user) = &request.author_user_id {
            let user = NodeRef::new(NodeId::from_string(user.as_str()), label::USER);
            store.merge_edge(tenant, &Edge::new(&entry, relationship::CREATED_BY, &user))?;
        }
        Ok(outcome.id.as_str().to_string())
    }

    async fn is_visible(&self, tenant: &TenantName, id: &str) -> DownstreamResult<bool> {
        let node = self.store.load_node(tenant, &NodeId::from_string(id))?;
        Ok(node.is_some_and(|n| n.has_label(label::LOG_ENTRY)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{property, Node};
    use crate::storage::{OpenStore, SqliteStore};

    fn create_test_store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_node(&tenant(), &Node::new(NodeId::from_string("salesforce"), label::EXTERNAL_SYSTEM))
            .unwrap();
        Arc::new(store)
    }

    fn tenant() -> TenantName {
        TenantName::parse("acme").unwrap()
    }

    fn request(id: Option<String>, content: &str) -> LogEntryRequest {
        LogEntryRequest {
            id,
            tenant: tenant(),
            content: content.into(),
            content_type: "text/plain".into(),
            started_at: None,
            author_user_id: Some("user-1".into()),
            logged_organization_id: Some("org-1".into()),
            source_fields: SourceFields {
                source: "salesforce".into(),
                app_source: "salesforce".into(),
                external_system: ExternalSystemRef {
                    id: "salesforce".into(),
                    external_id: "fi-1".into(),
                    external_url: String::new(),
                    sync_date: Utc::now(),
                },
            },
        }
    }

    #[tokio::test]
    async fn creates_then_updates_the_same_entry() {
        let store = create_test_store();
        let writer = GraphDownstreamWriter::new(store.clone());

        let id = writer.upsert_log_entry(request(None, "called")).await.unwrap();
        assert!(writer.is_visible(&tenant(), &id).await.unwrap());

        let again = writer.upsert_log_entry(request(Some(id.clone()), "called back")).await.unwrap();
        assert_eq!(again, id);

        let node = store.load_node(&tenant(), &NodeId::from_string(id.as_str())).unwrap().unwrap();
        assert_eq!(node.get_str("content"), Some("called back"));
        assert_eq!(node.get_str(property::SOURCE_OF_TRUTH), Some("salesforce"));
        assert_eq!(store.count_edges(&tenant(), Some(relationship::LOGGED)).unwrap(), 1);
        assert_eq!(store.count_edges(&tenant(), Some(relationship::CREATED_BY)).unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_system_is_rejected() {
        let store = create_test_store();
        let writer = GraphDownstreamWriter::new(store);
        let mut req = request(None, "x");
        req.source_fields.external_system.id = "pipedrive".into();

        assert!(matches!(
            writer.upsert_log_entry(req).await,
            Err(DownstreamError::Rejected(_))
        ));
        assert!(!writer.is_visible(&tenant(), "nope").await.unwrap());
    }
}
