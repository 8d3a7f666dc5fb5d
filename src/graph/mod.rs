//! Core graph data structures and the persisted naming contract
//!
//! Label, relationship and property names below are shared with existing
//! data and must not change.

mod edge;
mod node;
mod tenant;

pub use edge::Edge;
pub use node::{Node, NodeId, NodeRef, Properties, PropertyValue};
pub use tenant::{TenantError, TenantName};

/// Node labels
pub mod label {
    pub const EXTERNAL_SYSTEM: &str = "ExternalSystem";
    pub const USER: &str = "User";
    pub const ORGANIZATION: &str = "Organization";
    pub const CONTACT: &str = "Contact";
    pub const ISSUE: &str = "Issue";
    pub const TICKET: &str = "Ticket";
    pub const NOTE: &str = "Note";
    pub const MEETING: &str = "Meeting";
    pub const INTERACTION_EVENT: &str = "InteractionEvent";
    pub const INTERACTION_SESSION: &str = "InteractionSession";
    pub const LOG_ENTRY: &str = "LogEntry";
    pub const EMAIL: &str = "Email";
    pub const PHONE_NUMBER: &str = "PhoneNumber";
    pub const DOMAIN: &str = "Domain";
    pub const LOCATION: &str = "Location";
    pub const JOB_ROLE: &str = "JobRole";

    /// Shadow label for a non-owning system's version of `base`
    pub fn alternate(base: &str) -> String {
        format!("Alternate{}", base)
    }
}

/// Edge types
pub mod relationship {
    pub const IS_LINKED_WITH: &str = "IS_LINKED_WITH";
    pub const ALTERNATE: &str = "ALTERNATE";
    pub const OWNS: &str = "OWNS";
    pub const HAS: &str = "HAS";
    pub const HAS_DOMAIN: &str = "HAS_DOMAIN";
    pub const ASSOCIATED_WITH: &str = "ASSOCIATED_WITH";
    pub const SUBSIDIARY_OF: &str = "SUBSIDIARY_OF";
    pub const WORKS_AS: &str = "WORKS_AS";
    pub const ROLE_IN: &str = "ROLE_IN";
    pub const REPORTED_BY: &str = "REPORTED_BY";
    pub const IS_ASSIGNED_TO: &str = "IS_ASSIGNED_TO";
    pub const FOLLOWS: &str = "FOLLOWS";
    pub const SUBMITTED: &str = "SUBMITTED";
    pub const REQUESTED: &str = "REQUESTED";
    pub const CREATED: &str = "CREATED";
    pub const NOTED: &str = "NOTED";
    pub const CREATED_BY: &str = "CREATED_BY";
    pub const ATTENDED_BY: &str = "ATTENDED_BY";
    pub const PART_OF: &str = "PART_OF";
    pub const SENT_BY: &str = "SENT_BY";
    pub const SENT_TO: &str = "SENT_TO";
    pub const LOGGED: &str = "LOGGED";
}

/// Property names with meaning to the sync engine
pub mod property {
    pub const ID: &str = "id";
    pub const SOURCE: &str = "source";
    pub const SOURCE_OF_TRUTH: &str = "sourceOfTruth";
    pub const APP_SOURCE: &str = "appSource";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const EXTERNAL_ID: &str = "externalId";
    pub const EXTERNAL_OWNER_ID: &str = "externalOwnerId";
    pub const EXTERNAL_URL: &str = "externalUrl";
    pub const SYNC_DATE: &str = "syncDate";
}
