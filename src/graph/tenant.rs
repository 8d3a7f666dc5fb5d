//! Tenant identifiers
//!
//! Tenant names end up inside node labels (`Contact_acme`) and raw schema
//! names (`hubspot_acme`), so they are validated once here and only the
//! validated form is passed around.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_TENANT_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantError {
    #[error("tenant name is empty")]
    Empty,

    #[error("tenant name longer than 64 characters: {0}")]
    TooLong(String),

    #[error("tenant name contains invalid character {ch:?}: {name}")]
    InvalidCharacter { name: String, ch: char },
}

/// A validated tenant name: `[A-Za-z0-9_-]{1,64}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantName(String);

impl TenantName {
    pub fn parse(name: impl Into<String>) -> Result<Self, TenantError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TenantError::Empty);
        }
        if name.len() > MAX_TENANT_LEN {
            return Err(TenantError::TooLong(name));
        }
        if let Some(ch) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(TenantError::InvalidCharacter { name, ch });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tenant-scoped label, e.g. `Contact_acme`
    pub fn label(&self, base: &str) -> String {
        format!("{}_{}", base, self.0)
    }
}

impl TryFrom<String> for TenantName {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantName> for String {
    fn from(value: TenantName) -> Self {
        value.0
    }
}

impl std::str::FromStr for TenantName {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TenantName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["acme", "Acme_Corp", "tenant-42", "a"] {
            assert!(TenantName::parse(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn rejects_label_injection() {
        let err = TenantName::parse("acme`) DETACH DELETE n //").unwrap_err();
        assert!(matches!(err, TenantError::InvalidCharacter { ch: '`', .. }));

        assert_eq!(TenantName::parse("").unwrap_err(), TenantError::Empty);
        assert!(matches!(
            TenantName::parse("x".repeat(65)).unwrap_err(),
            TenantError::TooLong(_)
        ));
        assert!(TenantName::parse("acme corp").is_err());
        assert!(TenantName::parse("acmé").is_err());
    }

    #[test]
    fn builds_scoped_labels() {
        let tenant = TenantName::parse("acme").unwrap();
        assert_eq!(tenant.label("Contact"), "Contact_acme");
    }

    #[test]
    fn deserialization_validates() {
        let ok: TenantName = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(ok.as_str(), "acme");
        assert!(serde_json::from_str::<TenantName>("\"a;b\"").is_err());
    }
}
