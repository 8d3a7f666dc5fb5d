//! Merge engine: source-of-truth aware upsert of canonical nodes
//!
//! The system that creates a canonical node owns it for good. Later writes
//! from the owner overwrite; writes from other systems only fill fields the
//! rules allow and otherwise land on the system's Alternate shadow node.

use super::error::{SyncError, SyncResult};
use crate::graph::{label, property, relationship, Edge, Node, NodeId, PropertyValue, TenantName};
use crate::source::SyncMeta;
use crate::storage::GraphStore;
use chrono::{DateTime, Utc};
use tracing::debug;

/// When an incoming field value may replace the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Only the owning system writes the field
    OwnerOnly,
    /// The owner writes; anyone may fill the field while it is empty
    OwnerOrEmpty,
    /// Like `OwnerOrEmpty`, but the owner never clears a stored value
    OwnerNonEmptyOrEmpty,
    /// Written when the node is created, never on merge
    CreateOnly,
    /// Last writer wins
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeField {
    pub name: &'static str,
    /// `None` leaves the stored value untouched
    pub value: Option<PropertyValue>,
    pub rule: FieldRule,
}

/// Everything the merge engine needs to write one canonical node
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpsert {
    pub id: NodeId,
    pub label: &'static str,
    pub external_system: String,
    /// Empty for nodes that are not linked to the external system
    pub external_id: String,
    pub external_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fields: Vec<MergeField>,
    /// Extra `IS_LINKED_WITH` properties written when the link is created
    pub link_properties: Vec<(&'static str, PropertyValue)>,
    pub has_alternate: bool,
}

impl EntityUpsert {
    pub fn new(id: NodeId, label: &'static str, meta: &SyncMeta) -> Self {
        Self {
            id,
            label,
            external_system: meta.external_system.clone(),
            external_id: meta.external_id.clone(),
            external_url: meta.external_url.clone(),
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            fields: Vec::new(),
            link_properties: Vec::new(),
            has_alternate: false,
        }
    }

    /// Upsert for a node owned through its parent rather than an external link
    pub fn unlinked(id: NodeId, label: &'static str, external_system: impl Into<String>) -> Self {
        Self {
            id,
            label,
            external_system: external_system.into(),
            external_id: String::new(),
            external_url: String::new(),
            created_at: None,
            updated_at: None,
            fields: Vec::new(),
            link_properties: Vec::new(),
            has_alternate: false,
        }
    }

    pub fn field(mut self, name: &'static str, value: impl Into<PropertyValue>, rule: FieldRule) -> Self {
        self.fields.push(MergeField {
            name,
            value: Some(value.into()),
            rule,
        });
        self
    }

    pub fn optional_field<V: Into<PropertyValue>>(mut self, name: &'static str, value: Option<V>, rule: FieldRule) -> Self {
        self.fields.push(MergeField {
            name,
            value: value.map(Into::into),
            rule,
        });
        self
    }

    pub fn link_property(mut self, name: &'static str, value: impl Into<PropertyValue>) -> Self {
        self.link_properties.push((name, value.into()));
        self
    }

    pub fn with_alternate(mut self) -> Self {
        self.has_alternate = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub id: NodeId,
    pub created: bool,
    /// At least one stored property or link changed
    pub changed: bool,
    pub alternate_written: bool,
}

pub struct MergeEngine<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Create or merge the canonical node described by `upsert`
    pub fn upsert(&self, tenant: &TenantName, sync_date: DateTime<Utc>, upsert: &EntityUpsert) -> SyncResult<MergeOutcome> {
        let system_id = NodeId::from_string(upsert.external_system.as_str());
        let system = self
            .store
            .load_node(tenant, &system_id)?
            .filter(|n| n.has_label(label::EXTERNAL_SYSTEM))
            .ok_or_else(|| SyncError::MissingExternalSystem {
                tenant: tenant.to_string(),
                system: upsert.external_system.clone(),
            })?;

        let (outcome, node) = match self.store.load_node(tenant, &upsert.id)? {
            None => self.create(tenant, sync_date, upsert)?,
            Some(existing) => self.merge(tenant, sync_date, upsert, existing)?,
        };
        if upsert.external_id.is_empty() {
            return Ok(outcome);
        }

        let link_changed = self.link(tenant, sync_date, upsert, &node, &system)?;
        Ok(MergeOutcome {
            changed: outcome.changed || link_changed,
            ..outcome
        })
    }

    fn create(
        &self,
        tenant: &TenantName,
        sync_date: DateTime<Utc>,
        upsert: &EntityUpsert,
    ) -> SyncResult<(MergeOutcome, Node)> {
        let created_at = upsert.created_at.unwrap_or(sync_date);
        let updated_at = upsert.updated_at.unwrap_or(created_at);

        let mut node = Node::new(upsert.id.clone(), upsert.label)
            .with_label(tenant.label(upsert.label))
            .with_property(property::SOURCE, upsert.external_system.as_str())
            .with_property(property::SOURCE_OF_TRUTH, upsert.external_system.as_str())
            .with_property(property::APP_SOURCE, upsert.external_system.as_str())
            .with_property(property::CREATED_AT, created_at)
            .with_property(property::UPDATED_AT, updated_at);
        for field in &upsert.fields {
            node.set(field.name, field.value.clone());
        }
        self.store.save_node(tenant, &node)?;

        debug!(tenant = %tenant, label = upsert.label, id = %upsert.id, source = %upsert.external_system, "created node");
        let outcome = MergeOutcome {
            id: upsert.id.clone(),
            created: true,
            changed: true,
            alternate_written: false,
        };
        Ok((outcome, node))
    }

    fn merge(
        &self,
        tenant: &TenantName,
        sync_date: DateTime<Utc>,
        upsert: &EntityUpsert,
        mut node: Node,
    ) -> SyncResult<(MergeOutcome, Node)> {
        let owner = node.get_str(property::SOURCE_OF_TRUTH) == Some(upsert.external_system.as_str());

        let mut changed = false;
        for field in &upsert.fields {
            let Some(value) = field.value.clone() else {
                continue;
            };
            let empty = node.get(field.name).map_or(true, PropertyValue::is_empty);
            let allowed = match field.rule {
                FieldRule::OwnerOnly => owner,
                FieldRule::OwnerOrEmpty => owner || empty,
                FieldRule::OwnerNonEmptyOrEmpty => (owner && !value.is_empty()) || empty,
                FieldRule::CreateOnly => false,
                FieldRule::Always => true,
            };
            if allowed {
                changed |= node.set(field.name, Some(value));
            }
        }

        if changed {
            node.set(property::UPDATED_AT, Some(PropertyValue::timestamp(sync_date)));
            self.store.save_node(tenant, &node)?;
        }

        let alternate_written = !owner && upsert.has_alternate && self.write_alternate(tenant, sync_date, upsert, &node)?;

        let outcome = MergeOutcome {
            id: upsert.id.clone(),
            created: false,
            changed: changed || alternate_written,
            alternate_written,
        };
        Ok((outcome, node))
    }

    /// Upsert the non-owning system's shadow of `canonical`. Returns true if it changed.
    fn write_alternate(
        &self,
        tenant: &TenantName,
        sync_date: DateTime<Utc>,
        upsert: &EntityUpsert,
        canonical: &Node,
    ) -> SyncResult<bool> {
        let alternate_label = label::alternate(upsert.label);
        let alternate_id = NodeId::derived("Alternate", &[canonical.id.as_str(), upsert.external_system.as_str()]);

        let (mut alternate, mut changed) = match self.store.load_node(tenant, &alternate_id)? {
            Some(existing) => (existing, false),
            None => (
                Node::new(alternate_id.clone(), alternate_label.clone())
                    .with_label(tenant.label(&alternate_label))
                    .with_property(property::ID, canonical.id.as_str())
                    .with_property(property::SOURCE, upsert.external_system.as_str())
                    .with_property(property::APP_SOURCE, upsert.external_system.as_str()),
                true,
            ),
        };
        for field in &upsert.fields {
            if field.value.is_some() {
                changed |= alternate.set(field.name, field.value.clone());
            }
        }
        if !changed {
            return Ok(false);
        }

        alternate.set(property::UPDATED_AT, Some(PropertyValue::timestamp(sync_date)));
        self.store.save_node(tenant, &alternate)?;
        self.store.merge_edge(
            tenant,
            &Edge::new(&canonical.node_ref(), relationship::ALTERNATE, &alternate.node_ref()),
        )?;
        debug!(tenant = %tenant, label = %alternate_label, id = %canonical.id, source = %upsert.external_system, "wrote alternate");
        Ok(true)
    }

    /// Create the external link, or refresh its sync date. Returns true if it changed.
    fn link(
        &self,
        tenant: &TenantName,
        sync_date: DateTime<Utc>,
        upsert: &EntityUpsert,
        node: &Node,
        system: &Node,
    ) -> SyncResult<bool> {
        let sync_date = PropertyValue::timestamp(sync_date);
        match self
            .store
            .load_edge(tenant, &node.id, relationship::IS_LINKED_WITH, &system.id)?
        {
            Some(mut edge) => {
                if edge.properties.get(property::SYNC_DATE) == Some(&sync_date) {
                    return Ok(false);
                }
                edge.properties.insert(property::SYNC_DATE.to_string(), sync_date);
                self.store.save_edge(tenant, &edge)?;
                Ok(true)
            }
            None => {
                let mut edge = Edge::new(&node.node_ref(), relationship::IS_LINKED_WITH, &system.node_ref())
                    .with_property(property::EXTERNAL_ID, upsert.external_id.as_str())
                    .with_property(property::SYNC_DATE, sync_date);
                if !upsert.external_url.is_empty() {
                    edge = edge.with_property(property::EXTERNAL_URL, upsert.external_url.as_str());
                }
                for (name, value) in &upsert.link_properties {
                    if !value.is_empty() {
                        edge = edge.with_property(*name, value.clone());
                    }
                }
                self.store.save_edge(tenant, &edge)?;
                Ok(true)
            }
        }
    }
}
