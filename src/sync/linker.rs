//! Relationship linker
//!
//! Resolves references carried by DTOs to canonical nodes of the same
//! external system and attaches edges with create-if-absent semantics.
//! Contact points (emails, phone numbers, domains) are shared nodes keyed by
//! their normalized value.

use super::error::SyncResult;
use crate::graph::{label, property, relationship, Edge, Node, NodeId, NodeRef, PropertyValue, TenantName};
use crate::source::Reference;
use crate::storage::GraphStore;
use tracing::debug;

/// Result of an attempt to attach one edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Existing,
    /// The reference was empty
    NotAvailable,
    /// The reference named nothing linked to this system
    Unresolved,
}

/// Which end of the edge the referenced node sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// referenced -[rel]-> anchor
    FromReference,
    /// anchor -[rel]-> referenced
    ToReference,
}

pub fn email_node_id(email: &str) -> NodeId {
    NodeId::derived(label::EMAIL, &[email.trim().to_lowercase().as_str()])
}

pub fn phone_node_id(phone: &str) -> NodeId {
    NodeId::derived(label::PHONE_NUMBER, &[phone.trim()])
}

pub fn domain_node_id(domain: &str) -> NodeId {
    NodeId::derived(label::DOMAIN, &[domain.trim().to_lowercase().as_str()])
}

/// Domain part of an email address
pub fn email_domain(email: &str) -> Option<String> {
    email
        .trim()
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
        .filter(|d| !d.is_empty())
}

pub struct RelationshipLinker<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> RelationshipLinker<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Resolve a reference to a node carrying one of `labels`
    ///
    /// Only the first populated key of the reference is used. The node must
    /// be linked to `external_system`.
    pub fn resolve(
        &self,
        tenant: &TenantName,
        external_system: &NodeId,
        reference: &Reference,
        labels: &[&str],
    ) -> SyncResult<Option<NodeRef>> {
        if !reference.id.is_empty() {
            let id = NodeId::from_string(reference.id.as_str());
            let Some(node) = self.store.load_node(tenant, &id)? else {
                return Ok(None);
            };
            let Some(&label) = labels.iter().find(|l| node.has_label(l)) else {
                return Ok(None);
            };
            let linked = self
                .store
                .load_edge(tenant, &id, relationship::IS_LINKED_WITH, external_system)?
                .is_some();
            return Ok(linked.then(|| NodeRef::new(id, label)));
        }

        let (key, value) = if !reference.external_id.is_empty() {
            (property::EXTERNAL_ID, reference.external_id.as_str())
        } else if !reference.external_owner_id.is_empty() {
            (property::EXTERNAL_OWNER_ID, reference.external_owner_id.as_str())
        } else {
            return Ok(None);
        };

        for &label in labels {
            if let Some(id) = self.store.find_linked(tenant, label, external_system, key, value)? {
                return Ok(Some(NodeRef::new(id, label)));
            }
        }
        Ok(None)
    }

    /// Resolve `reference` and connect it to `anchor`
    pub fn link(
        &self,
        tenant: &TenantName,
        external_system: &NodeId,
        reference: &Reference,
        labels: &[&str],
        anchor: &NodeRef,
        relationship: &str,
        direction: Direction,
    ) -> SyncResult<LinkOutcome> {
        if reference.is_empty() {
            return Ok(LinkOutcome::NotAvailable);
        }
        let Some(resolved) = self.resolve(tenant, external_system, reference, labels)? else {
            debug!(
                tenant = %tenant,
                relationship,
                anchor = %anchor.id,
                reference = ?reference,
                "unresolved reference"
            );
            return Ok(LinkOutcome::Unresolved);
        };
        let edge = match direction {
            Direction::FromReference => Edge::new(&resolved, relationship, anchor),
            Direction::ToReference => Edge::new(anchor, relationship, &resolved),
        };
        self.connect(tenant, &edge)
    }

    /// Create `edge` unless it exists
    pub fn connect(&self, tenant: &TenantName, edge: &Edge) -> SyncResult<LinkOutcome> {
        Ok(if self.store.merge_edge(tenant, edge)? {
            LinkOutcome::Created
        } else {
            LinkOutcome::Existing
        })
    }

    /// Create a shared node if absent
    fn ensure_node(&self, tenant: &TenantName, node: Node) -> SyncResult<NodeRef> {
        let node_ref = node.node_ref();
        if self.store.load_node(tenant, &node.id)?.is_none() {
            self.store.save_node(tenant, &node)?;
        }
        Ok(node_ref)
    }

    pub fn email(&self, tenant: &TenantName, email: &str) -> SyncResult<Option<NodeRef>> {
        let normalized = email.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(None);
        }
        let node = Node::new(email_node_id(&normalized), label::EMAIL)
            .with_label(tenant.label(label::EMAIL))
            .with_property("rawEmail", email.trim())
            .with_property("email", normalized);
        self.ensure_node(tenant, node).map(Some)
    }

    /// `owner -HAS-> Email`
    pub fn attach_email(&self, tenant: &TenantName, owner: &NodeRef, email: &str, primary: bool) -> SyncResult<LinkOutcome> {
        let Some(email) = self.email(tenant, email)? else {
            return Ok(LinkOutcome::NotAvailable);
        };
        let edge = Edge::new(owner, relationship::HAS, &email)
            .with_property("primary", primary)
            .with_property("label", if primary { "WORK" } else { "OTHER" });
        self.connect(tenant, &edge)
    }

    /// `owner -HAS-> PhoneNumber`
    pub fn attach_phone(&self, tenant: &TenantName, owner: &NodeRef, phone: &str) -> SyncResult<LinkOutcome> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Ok(LinkOutcome::NotAvailable);
        }
        let node = Node::new(phone_node_id(phone), label::PHONE_NUMBER)
            .with_label(tenant.label(label::PHONE_NUMBER))
            .with_property("rawPhoneNumber", phone);
        let phone = self.ensure_node(tenant, node)?;
        let edge = Edge::new(owner, relationship::HAS, &phone).with_property("primary", true);
        self.connect(tenant, &edge)
    }

    /// `organization -HAS_DOMAIN-> Domain`
    pub fn attach_domain(&self, tenant: &TenantName, organization: &NodeRef, domain: &str) -> SyncResult<LinkOutcome> {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() {
            return Ok(LinkOutcome::NotAvailable);
        }
        let node = Node::new(domain_node_id(&domain), label::DOMAIN)
            .with_label(tenant.label(label::DOMAIN))
            .with_property("domain", domain);
        let domain = self.ensure_node(tenant, node)?;
        self.connect(tenant, &Edge::new(organization, relationship::HAS_DOMAIN, &domain))
    }

    /// Organizations owning the domain of `email`
    pub fn organizations_by_email_domain(&self, tenant: &TenantName, email: &str) -> SyncResult<Vec<NodeRef>> {
        let Some(domain) = email_domain(email) else {
            return Ok(Vec::new());
        };
        Ok(self
            .store
            .get_edges_to(tenant, &domain_node_id(&domain), Some(relationship::HAS_DOMAIN))?
            .into_iter()
            .filter(|e| e.source_label == label::ORGANIZATION)
            .map(|e| e.source_ref())
            .collect())
    }

    /// Edge with one property, used for typed edges such as `SENT_TO {type}`
    pub fn connect_with(
        &self,
        tenant: &TenantName,
        source: &NodeRef,
        relationship: &str,
        target: &NodeRef,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> SyncResult<LinkOutcome> {
        self.connect(tenant, &Edge::new(source, relationship, target).with_property(key, value))
    }
}
