//! Registry of known source connectors
//!
//! Each connector names the raw streams that hold its data for every entity
//! type it supports. A stream may feed several entity types (zendesk users
//! also describe organizations) and an entity type may be spread over
//! several streams.

use super::types::SyncedEntityType;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    Hubspot,
    ZendeskSupport,
    Pipedrive,
    Intercom,
    Salesforce,
    Slack,
}

impl Connector {
    pub const ALL: [Connector; 6] = [
        Self::Hubspot,
        Self::ZendeskSupport,
        Self::Pipedrive,
        Self::Intercom,
        Self::Salesforce,
        Self::Slack,
    ];

    /// Source id, also used as the ExternalSystem node id
    pub fn source_id(&self) -> &'static str {
        match self {
            Self::Hubspot => "hubspot",
            Self::ZendeskSupport => "zendesk_support",
            Self::Pipedrive => "pipedrive",
            Self::Intercom => "intercom",
            Self::Salesforce => "salesforce",
            Self::Slack => "slack",
        }
    }

    /// Raw table suffixes holding `entity` records, in read order.
    /// Empty when the connector does not provide the entity type.
    pub fn table_suffixes(&self, entity: SyncedEntityType) -> &'static [&'static str] {
        use SyncedEntityType as E;
        match (self, entity) {
            (Self::Hubspot, E::User) => &["owners"],
            (Self::Hubspot, E::Organization) => &["companies"],
            (Self::Hubspot, E::Contact) => &["contacts"],
            (Self::Hubspot, E::Note) => &["engagements_notes"],
            (Self::Hubspot, E::Meeting) => &["engagements_meetings"],
            (Self::Hubspot, E::EmailMessage) => &["engagements_emails"],

            (Self::ZendeskSupport, E::User) => &["users"],
            (Self::ZendeskSupport, E::Organization) => &["organizations", "users"],
            (Self::ZendeskSupport, E::Issue) => &["tickets"],
            (Self::ZendeskSupport, E::Note) => &["ticket_comments"],
            (Self::ZendeskSupport, E::InteractionEvent) => &["ticket_comments"],

            (Self::Pipedrive, E::User) => &["users"],
            (Self::Pipedrive, E::Organization) => &["organizations"],
            (Self::Pipedrive, E::Contact) => &["persons"],
            (Self::Pipedrive, E::Note) => &["notes"],

            (Self::Intercom, E::User) => &["admins"],
            (Self::Intercom, E::Organization) => &["companies"],
            (Self::Intercom, E::Contact) => &["contacts"],
            (Self::Intercom, E::Ticket) => &["tickets"],
            (Self::Intercom, E::InteractionEvent) => &["conversation_parts"],

            (Self::Salesforce, E::User) => &["user"],
            (Self::Salesforce, E::Organization) => &["account", "lead", "opportunity"],
            (Self::Salesforce, E::Contact) => &["contact", "lead"],
            (Self::Salesforce, E::LogEntry) => &["feeditem", "contentnote"],

            (Self::Slack, E::User) => &["users"],
            (Self::Slack, E::Contact) => &["users"],
            (Self::Slack, E::InteractionEvent) => &["channel_messages"],

            _ => &[],
        }
    }

    pub fn supports(&self, entity: SyncedEntityType) -> bool {
        !self.table_suffixes(entity).is_empty()
    }

    /// Entity types this connector provides, in stage order
    pub fn entity_types(&self) -> Vec<SyncedEntityType> {
        SyncedEntityType::ALL
            .into_iter()
            .filter(|e| self.supports(*e))
            .collect()
    }
}

impl std::fmt::Display for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.source_id())
    }
}

impl FromStr for Connector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.source_id() == s)
            .ok_or_else(|| format!("unknown source: {}", s))
    }
}
