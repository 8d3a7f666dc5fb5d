//! Typed relationships between nodes

use super::node::{NodeId, NodeRef, Properties, PropertyValue};
use serde::{Deserialize, Serialize};

/// A directed, typed edge
///
/// Edges are keyed by (source, relationship, target): there is at most one
/// edge of a given type between two nodes. Endpoint labels are stored
/// alongside so lookups can filter without joining the node table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub source_label: String,
    /// Relationship type (e.g. "IS_LINKED_WITH", "OWNS")
    pub relationship: String,
    pub target: NodeId,
    pub target_label: String,
    /// Additional properties
    pub properties: Properties,
}

impl Edge {
    /// Create a new edge between two node handles
    pub fn new(source: &NodeRef, relationship: impl Into<String>, target: &NodeRef) -> Self {
        Self {
            source: source.id.clone(),
            source_label: source.label.clone(),
            relationship: relationship.into(),
            target: target.id.clone(),
            target_label: target.label.clone(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    pub fn source_ref(&self) -> NodeRef {
        NodeRef::new(self.source.clone(), self.source_label.clone())
    }

    pub fn target_ref(&self) -> NodeRef {
        NodeRef::new(self.target.clone(), self.target_label.clone())
    }
}
