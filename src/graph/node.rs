//! Node representation in the canonical graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace for ids derived from natural keys (alternates, emails, domains, ...)
const DERIVED_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5f0e_2a4b_9c1d_4e7a_8b3f_6d2c_1a9e_7b40);

/// Unique identifier for a node
///
/// Canonical entities get random UUIDs. ExternalSystem nodes use the source id
/// itself (e.g. `hubspot`), and nodes keyed by a natural key use a UUID v5
/// derived from that key so that repeated merges land on the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic id for a node identified by `kind` and a natural key
    pub fn derived(kind: &str, key: &[&str]) -> Self {
        let name = format!("{}:{}", kind, key.join("\u{1f}"));
        Self(Uuid::new_v5(&DERIVED_ID_NAMESPACE, name.as_bytes()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed property values
///
/// Timestamps are stored as RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Null-or-empty check used by the owner-or-empty merge rule
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn timestamp(at: DateTime<Utc>) -> Self {
        Self::String(at.to_rfc3339())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::timestamp(value)
    }
}

/// Properties collection
///
/// Ordered so that the persisted JSON is stable across rewrites.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Lightweight handle to a node: its id plus primary label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub id: NodeId,
    pub label: String,
}

impl NodeRef {
    pub fn new(id: NodeId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// A node in the canonical graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier (unique per tenant)
    pub id: NodeId,
    /// Primary label (e.g. "Contact", "ExternalSystem")
    pub label: String,
    /// All labels, including the primary one and the tenant-scoped label
    pub labels: Vec<String>,
    /// Node properties
    pub properties: Properties,
}

impl Node {
    /// Create a node carrying only its primary label
    pub fn new(id: NodeId, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id,
            labels: vec![label.clone()],
            label,
            properties: Properties::new(),
        }
    }

    /// Add a secondary label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    /// Add a property to the node
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    /// Set or clear a property. Returns true if the stored value changed.
    pub fn set(&mut self, key: &str, value: Option<PropertyValue>) -> bool {
        match value {
            Some(value) => {
                if self.properties.get(key) == Some(&value) {
                    return false;
                }
                self.properties.insert(key.to_string(), value);
                true
            }
            None => self.properties.remove(key).is_some(),
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.id.clone(), self.label.clone())
    }
}
