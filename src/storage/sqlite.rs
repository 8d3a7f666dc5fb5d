//! SQLite storage backend for the canonical graph

use super::traits::{GraphStore, NodeFilter, OpenStore, StorageError, StorageResult, SyncStateStore};
use crate::graph::{relationship, Edge, Node, NodeId, PropertyValue, TenantName};
use crate::sync::{SyncRun, TenantSyncSettings};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const NODE_COLUMNS: &str = "id, label, labels_json, properties_json";
const EDGE_COLUMNS: &str =
    "source_id, source_label, relationship, target_id, target_label, properties_json";

type NodeRow = (String, String, String, String);
type EdgeRow = (String, String, String, String, String, String);

/// SQLite-backed graph store
///
/// One database file holds every tenant; each row carries its tenant and
/// every query is filtered by it. Thread-safe via internal mutex on the
/// connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Nodes: one row per (tenant, id)
            CREATE TABLE IF NOT EXISTS nodes (
                tenant TEXT NOT NULL,
                id TEXT NOT NULL,
                label TEXT NOT NULL,
                labels_json TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                PRIMARY KEY (tenant, id)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_label
                ON nodes(tenant, label);

            -- Edges: at most one edge of a type between two nodes
            CREATE TABLE IF NOT EXISTS edges (
                tenant TEXT NOT NULL,
                source_id TEXT NOT NULL,
                source_label TEXT NOT NULL,
                relationship TEXT NOT NULL,
                target_id TEXT NOT NULL,
                target_label TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                PRIMARY KEY (tenant, source_id, relationship, target_id)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(tenant, target_id, relationship);

            -- One canonical node per (tenant, external system, label, external id)
            CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_external_id
                ON edges(tenant, target_id, source_label, json_extract(properties_json, '$.externalId'))
                WHERE relationship = 'IS_LINKED_WITH';

            CREATE TABLE IF NOT EXISTS tenant_sync_settings (
                tenant TEXT NOT NULL,
                source TEXT NOT NULL,
                instance TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL,
                PRIMARY KEY (tenant, source, instance)
            );

            CREATE TABLE IF NOT EXISTS sync_runs (
                run_id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                source TEXT NOT NULL,
                instance TEXT NOT NULL DEFAULT '',
                started_at TEXT NOT NULL,
                ended_at TEXT,
                counts_json TEXT NOT NULL,
                aborted_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sync_runs_tenant
                ON sync_runs(tenant, started_at);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn row_to_node(row: NodeRow) -> StorageResult<Node> {
        let (id, label, labels_json, properties_json) = row;
        Ok(Node {
            id: NodeId::from_string(id),
            label,
            labels: serde_json::from_str(&labels_json)?,
            properties: serde_json::from_str(&properties_json)?,
        })
    }

    fn row_to_edge(row: EdgeRow) -> StorageResult<Edge> {
        let (source, source_label, relationship, target, target_label, properties_json) = row;
        Ok(Edge {
            source: NodeId::from_string(source),
            source_label,
            relationship,
            target: NodeId::from_string(target),
            target_label,
            properties: serde_json::from_str(&properties_json)?,
        })
    }

    fn query_nodes(conn: &Connection, sql: &str, values: Vec<Value>) -> StorageResult<Vec<Node>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| -> rusqlite::Result<NodeRow> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(Self::row_to_node(row?)?);
        }
        Ok(nodes)
    }

    fn query_edges(conn: &Connection, sql: &str, values: Vec<Value>) -> StorageResult<Vec<Edge>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| -> rusqlite::Result<EdgeRow> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(Self::row_to_edge(row?)?);
        }
        Ok(edges)
    }

    /// Bind a property value the way `json_extract` returns it
    fn sql_value(value: &PropertyValue) -> StorageResult<Value> {
        Ok(match value {
            PropertyValue::String(s) => Value::Text(s.clone()),
            PropertyValue::Int(i) => Value::Integer(*i),
            PropertyValue::Float(f) => Value::Real(*f),
            PropertyValue::Bool(b) => Value::Integer(i64::from(*b)),
            PropertyValue::Array(_) => Value::Text(serde_json::to_string(value)?),
        })
    }

    fn parse_time(raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(e.to_string()))
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    // === Node Operations ===

    fn save_node(&self, tenant: &TenantName, node: &Node) -> StorageResult<()> {
        let conn = self.lock()?;
        let labels = serde_json::to_string(&node.labels)?;
        let properties = serde_json::to_string(&node.properties)?;

        conn.execute(
            r#"
            INSERT INTO nodes (tenant, id, label, labels_json, properties_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(tenant, id) DO UPDATE SET
                label = excluded.label,
                labels_json = excluded.labels_json,
                properties_json = excluded.properties_json
            "#,
            params![tenant.as_str(), node.id.as_str(), node.label, labels, properties],
        )?;

        Ok(())
    }

    fn load_node(&self, tenant: &TenantName, id: &NodeId) -> StorageResult<Option<Node>> {
        let conn = self.lock()?;

        let row: Option<NodeRow> = conn
            .query_row(
                &format!("SELECT {} FROM nodes WHERE tenant = ?1 AND id = ?2", NODE_COLUMNS),
                params![tenant.as_str(), id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(Self::row_to_node).transpose()
    }

    fn find_nodes(&self, tenant: &TenantName, filter: &NodeFilter) -> StorageResult<Vec<Node>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {} FROM nodes WHERE tenant = ?", NODE_COLUMNS);
        let mut values = vec![Value::Text(tenant.as_str().to_string())];

        if let Some(ref label) = filter.label {
            sql.push_str(" AND EXISTS (SELECT 1 FROM json_each(labels_json) WHERE value = ?)");
            values.push(Value::Text(label.clone()));
        }

        if let Some((ref key, ref value)) = filter.property {
            sql.push_str(" AND json_extract(properties_json, ?) = ?");
            values.push(Value::Text(format!("$.{}", key)));
            values.push(Self::sql_value(value)?);
        }

        sql.push_str(" ORDER BY id");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        Self::query_nodes(&conn, &sql, values)
    }

    fn count_nodes(&self, tenant: &TenantName, label: Option<&str>) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = match label {
            Some(label) => conn.query_row(
                "SELECT COUNT(*) FROM nodes WHERE tenant = ?1
                 AND EXISTS (SELECT 1 FROM json_each(labels_json) WHERE value = ?2)",
                params![tenant.as_str(), label],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM nodes WHERE tenant = ?1",
                params![tenant.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    // === Edge Operations ===

    fn save_edge(&self, tenant: &TenantName, edge: &Edge) -> StorageResult<()> {
        let conn = self.lock()?;
        let properties = serde_json::to_string(&edge.properties)?;

        conn.execute(
            r#"
            INSERT INTO edges (tenant, source_id, source_label, relationship, target_id, target_label, properties_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(tenant, source_id, relationship, target_id) DO UPDATE SET
                source_label = excluded.source_label,
                target_label = excluded.target_label,
                properties_json = excluded.properties_json
            "#,
            params![
                tenant.as_str(),
                edge.source.as_str(),
                edge.source_label,
                edge.relationship,
                edge.target.as_str(),
                edge.target_label,
                properties,
            ],
        )?;

        Ok(())
    }

    fn merge_edge(&self, tenant: &TenantName, edge: &Edge) -> StorageResult<bool> {
        let conn = self.lock()?;
        let properties = serde_json::to_string(&edge.properties)?;

        let inserted = conn.execute(
            r#"
            INSERT INTO edges (tenant, source_id, source_label, relationship, target_id, target_label, properties_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(tenant, source_id, relationship, target_id) DO NOTHING
            "#,
            params![
                tenant.as_str(),
                edge.source.as_str(),
                edge.source_label,
                edge.relationship,
                edge.target.as_str(),
                edge.target_label,
                properties,
            ],
        )?;

        Ok(inserted > 0)
    }

    fn load_edge(
        &self,
        tenant: &TenantName,
        source: &NodeId,
        relationship: &str,
        target: &NodeId,
    ) -> StorageResult<Option<Edge>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM edges WHERE tenant = ? AND source_id = ? AND relationship = ? AND target_id = ?",
            EDGE_COLUMNS
        );
        let values = vec![
            Value::Text(tenant.as_str().to_string()),
            Value::Text(source.as_str().to_string()),
            Value::Text(relationship.to_string()),
            Value::Text(target.as_str().to_string()),
        ];
        Ok(Self::query_edges(&conn, &sql, values)?.into_iter().next())
    }

    fn get_edges_from(
        &self,
        tenant: &TenantName,
        id: &NodeId,
        relationship: Option<&str>,
    ) -> StorageResult<Vec<Edge>> {
        let conn = self.lock()?;
        let mut sql = format!("SELECT {} FROM edges WHERE tenant = ? AND source_id = ?", EDGE_COLUMNS);
        let mut values = vec![
            Value::Text(tenant.as_str().to_string()),
            Value::Text(id.as_str().to_string()),
        ];
        if let Some(rel) = relationship {
            sql.push_str(" AND relationship = ?");
            values.push(Value::Text(rel.to_string()));
        }
        sql.push_str(" ORDER BY relationship, target_id");
        Self::query_edges(&conn, &sql, values)
    }

    fn get_edges_to(
        &self,
        tenant: &TenantName,
        id: &NodeId,
        relationship: Option<&str>,
    ) -> StorageResult<Vec<Edge>> {
        let conn = self.lock()?;
        let mut sql = format!("SELECT {} FROM edges WHERE tenant = ? AND target_id = ?", EDGE_COLUMNS);
        let mut values = vec![
            Value::Text(tenant.as_str().to_string()),
            Value::Text(id.as_str().to_string()),
        ];
        if let Some(rel) = relationship {
            sql.push_str(" AND relationship = ?");
            values.push(Value::Text(rel.to_string()));
        }
        sql.push_str(" ORDER BY relationship, source_id");
        Self::query_edges(&conn, &sql, values)
    }

    fn count_edges(&self, tenant: &TenantName, relationship: Option<&str>) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = match relationship {
            Some(rel) => conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE tenant = ?1 AND relationship = ?2",
                params![tenant.as_str(), rel],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE tenant = ?1",
                params![tenant.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    // === Identity Lookup ===

    fn find_linked(
        &self,
        tenant: &TenantName,
        label: &str,
        external_system: &NodeId,
        property: &str,
        value: &str,
    ) -> StorageResult<Option<NodeId>> {
        let conn = self.lock()?;
        let id: Option<String> = conn
            .query_row(
                r#"
                SELECT source_id FROM edges
                WHERE tenant = ?1 AND relationship = ?2 AND target_id = ?3 AND source_label = ?4
                  AND json_extract(properties_json, ?5) = ?6
                ORDER BY source_id
                LIMIT 1
                "#,
                params![
                    tenant.as_str(),
                    relationship::IS_LINKED_WITH,
                    external_system.as_str(),
                    label,
                    format!("$.{}", property),
                    value,
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(NodeId::from_string))
    }
}

impl SyncStateStore for SqliteStore {
    fn save_settings(&self, settings: &TenantSyncSettings) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO tenant_sync_settings (tenant, source, instance, enabled)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(tenant, source, instance) DO UPDATE SET
                enabled = excluded.enabled
            "#,
            params![settings.tenant, settings.source, settings.instance, settings.enabled],
        )?;
        Ok(())
    }

    fn list_settings(&self, enabled_only: bool) -> StorageResult<Vec<TenantSyncSettings>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tenant, source, instance, enabled FROM tenant_sync_settings
             WHERE ?1 = 0 OR enabled = 1
             ORDER BY tenant, source, instance",
        )?;
        let rows = stmt.query_map(params![enabled_only], |row| {
            Ok(TenantSyncSettings {
                tenant: row.get(0)?,
                source: row.get(1)?,
                instance: row.get(2)?,
                enabled: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn save_run(&self, run: &SyncRun) -> StorageResult<()> {
        let conn = self.lock()?;
        let counts = serde_json::to_string(&run.counts)?;
        let aborted = serde_json::to_string(&run.aborted_stages)?;

        // Finalized runs are an audit trail; a second save is ignored
        conn.execute(
            r#"
            INSERT INTO sync_runs (run_id, tenant, source, instance, started_at, ended_at, counts_json, aborted_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(run_id) DO NOTHING
            "#,
            params![
                run.run_id,
                run.tenant,
                run.source,
                run.instance,
                run.started_at.to_rfc3339(),
                run.ended_at.map(|t| t.to_rfc3339()),
                counts,
                aborted,
            ],
        )?;
        Ok(())
    }

    fn list_runs(&self, tenant: Option<&TenantName>, limit: usize) -> StorageResult<Vec<SyncRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, tenant, source, instance, started_at, ended_at, counts_json, aborted_json
             FROM sync_runs
             WHERE ?1 IS NULL OR tenant = ?1
             ORDER BY started_at DESC, run_id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant.map(|t| t.as_str()), limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, tenant, source, instance, started_at, ended_at, counts, aborted) = row?;
            runs.push(SyncRun {
                run_id,
                tenant,
                source,
                instance,
                started_at: Self::parse_time(&started_at)?,
                ended_at: ended_at.as_deref().map(Self::parse_time).transpose()?,
                counts: serde_json::from_str(&counts)?,
                aborted_stages: serde_json::from_str(&aborted)?,
            });
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{label, NodeRef};
    use crate::source::SyncedEntityType;
    use crate::sync::EntityCounts;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn tenant(name: &str) -> TenantName {
        TenantName::parse(name).unwrap()
    }

    fn create_test_node(id: &str, label: &str) -> Node {
        Node::new(NodeId::from_string(id), label).with_property("name", id)
    }

    fn link(store: &SqliteStore, t: &TenantName, node: &Node, system: &Node, external_id: &str) -> StorageResult<()> {
        let edge = Edge::new(&node.node_ref(), relationship::IS_LINKED_WITH, &system.node_ref())
            .with_property("externalId", external_id);
        store.save_edge(t, &edge)
    }

    #[test]
    fn test_save_and_load_node() {
        let store = create_test_store();
        let t = tenant("acme");
        let node = create_test_node("c1", label::CONTACT)
            .with_label(t.label(label::CONTACT))
            .with_property("employees", 12i64)
            .with_property("isPublic", true);

        store.save_node(&t, &node).unwrap();

        let loaded = store.load_node(&t, &node.id).unwrap().unwrap();
        assert_eq!(loaded, node);
    }

    #[test]
    fn test_nodes_are_tenant_scoped() {
        let store = create_test_store();
        let acme = tenant("acme");
        let globex = tenant("globex");
        let node = create_test_node("c1", label::CONTACT);

        store.save_node(&acme, &node).unwrap();

        assert!(store.load_node(&globex, &node.id).unwrap().is_none());
        assert_eq!(store.count_nodes(&acme, None).unwrap(), 1);
        assert_eq!(store.count_nodes(&globex, None).unwrap(), 0);
    }

    #[test]
    fn test_find_nodes_by_label_and_property() {
        let store = create_test_store();
        let t = tenant("acme");
        store
            .save_node(&t, &create_test_node("m1", label::MEETING).with_property("meetingExternalUrl", "https://x/1"))
            .unwrap();
        store
            .save_node(&t, &create_test_node("m2", label::MEETING).with_property("meetingExternalUrl", "https://x/2"))
            .unwrap();
        store.save_node(&t, &create_test_node("c1", label::CONTACT)).unwrap();

        let meetings = store
            .find_nodes(&t, &NodeFilter::new().with_label(label::MEETING))
            .unwrap();
        assert_eq!(meetings.len(), 2);

        let found = store
            .find_nodes(
                &t,
                &NodeFilter::new()
                    .with_label(label::MEETING)
                    .with_property("meetingExternalUrl", "https://x/2"),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "m2");

        assert_eq!(store.count_nodes(&t, Some(label::CONTACT)).unwrap(), 1);
    }

    #[test]
    fn test_merge_edge_is_create_if_absent() {
        let store = create_test_store();
        let t = tenant("acme");
        let user = NodeRef::new(NodeId::from_string("u1"), label::USER);
        let contact = NodeRef::new(NodeId::from_string("c1"), label::CONTACT);

        let edge = Edge::new(&user, relationship::OWNS, &contact).with_property("since", "first");
        assert!(store.merge_edge(&t, &edge).unwrap());

        let again = Edge::new(&user, relationship::OWNS, &contact).with_property("since", "second");
        assert!(!store.merge_edge(&t, &again).unwrap());

        let loaded = store
            .load_edge(&t, &user.id, relationship::OWNS, &contact.id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.get_str("since"), Some("first"));
        assert_eq!(store.count_edges(&t, Some(relationship::OWNS)).unwrap(), 1);
    }

    #[test]
    fn test_save_edge_replaces_properties() {
        let store = create_test_store();
        let t = tenant("acme");
        let a = NodeRef::new(NodeId::from_string("a"), label::CONTACT);
        let b = NodeRef::new(NodeId::from_string("b"), label::EXTERNAL_SYSTEM);

        store
            .save_edge(&t, &Edge::new(&a, relationship::IS_LINKED_WITH, &b).with_property("syncDate", "1"))
            .unwrap();
        store
            .save_edge(&t, &Edge::new(&a, relationship::IS_LINKED_WITH, &b).with_property("syncDate", "2"))
            .unwrap();

        let edges = store.get_edges_from(&t, &a.id, None).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].get_str("syncDate"), Some("2"));
        assert_eq!(store.get_edges_to(&t, &b.id, Some(relationship::IS_LINKED_WITH)).unwrap().len(), 1);
    }

    #[test]
    fn test_find_linked_by_external_id() {
        let store = create_test_store();
        let t = tenant("acme");
        let hubspot = Node::new(NodeId::from_string("hubspot"), label::EXTERNAL_SYSTEM);
        let zendesk = Node::new(NodeId::from_string("zendesk"), label::EXTERNAL_SYSTEM);
        let contact = create_test_node("c1", label::CONTACT);
        let org = create_test_node("o1", label::ORGANIZATION);

        link(&store, &t, &contact, &hubspot, "42").unwrap();
        link(&store, &t, &org, &hubspot, "42").unwrap();

        let found = store
            .find_linked(&t, label::CONTACT, &hubspot.id, "externalId", "42")
            .unwrap();
        assert_eq!(found, Some(contact.id.clone()));

        let found = store
            .find_linked(&t, label::ORGANIZATION, &hubspot.id, "externalId", "42")
            .unwrap();
        assert_eq!(found, Some(org.id.clone()));

        // Same external id in another system does not match
        assert!(store
            .find_linked(&t, label::CONTACT, &zendesk.id, "externalId", "42")
            .unwrap()
            .is_none());
        // Nor in another tenant
        assert!(store
            .find_linked(&tenant("globex"), label::CONTACT, &hubspot.id, "externalId", "42")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_external_id_is_unique_per_system_and_label() {
        let store = create_test_store();
        let t = tenant("acme");
        let hubspot = Node::new(NodeId::from_string("hubspot"), label::EXTERNAL_SYSTEM);
        let first = create_test_node("c1", label::CONTACT);
        let second = create_test_node("c2", label::CONTACT);

        link(&store, &t, &first, &hubspot, "42").unwrap();
        let err = link(&store, &t, &second, &hubspot, "42").unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));

        // Another tenant may reuse the external id
        link(&store, &tenant("globex"), &second, &hubspot, "42").unwrap();
    }

    #[test]
    fn test_settings_round_trip() {
        let store = create_test_store();
        let enabled = TenantSyncSettings::new("acme", "hubspot");
        let mut disabled = TenantSyncSettings::new("globex", "zendesk_support");
        disabled.enabled = false;

        store.save_settings(&enabled).unwrap();
        store.save_settings(&disabled).unwrap();

        assert_eq!(store.list_settings(false).unwrap().len(), 2);
        let active = store.list_settings(true).unwrap();
        assert_eq!(active, vec![enabled.clone()]);

        disabled.enabled = true;
        store.save_settings(&disabled).unwrap();
        assert_eq!(store.list_settings(true).unwrap().len(), 2);
    }

    #[test]
    fn test_runs_round_trip_and_immutable() {
        let store = create_test_store();
        let settings = TenantSyncSettings::new("acme", "hubspot");
        let mut run = SyncRun::start(&settings);
        run.record(SyncedEntityType::Contact, EntityCounts { completed: 3, failed: 1, skipped: 2 });
        run.finish();

        store.save_run(&run).unwrap();

        let mut tampered = run.clone();
        tampered.record(SyncedEntityType::Contact, EntityCounts { completed: 99, failed: 0, skipped: 0 });
        store.save_run(&tampered).unwrap();

        let runs = store.list_runs(Some(&tenant("acme")), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].counts[&SyncedEntityType::Contact].completed, 3);
        assert!(runs[0].ended_at.is_some());
        assert!(store.list_runs(Some(&tenant("globex")), 10).unwrap().is_empty());
        assert_eq!(store.list_runs(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_wal_mode_enabled_at_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("graph.db");
        let store = SqliteStore::open(&db_path).unwrap();

        let journal_mode: String = store
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();

        assert_eq!(journal_mode, "wal");
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("graph.db");
        let t = tenant("acme");
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.save_node(&t, &create_test_node("c1", label::CONTACT)).unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.count_nodes(&t, Some(label::CONTACT)).unwrap(), 1);
    }
}
