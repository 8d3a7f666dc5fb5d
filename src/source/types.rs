//! Canonical transfer objects produced by source providers
//!
//! Every DTO flattens a `SyncMeta` header carrying identity and bookkeeping,
//! followed by its domain fields. Absent strings are empty, never null.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Entity types pulled from sources, in stage order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncedEntityType {
    User,
    Organization,
    Contact,
    Issue,
    Ticket,
    Note,
    EmailMessage,
    Meeting,
    InteractionEvent,
    LogEntry,
}

impl SyncedEntityType {
    /// All entity types in dependency order
    pub const ALL: [SyncedEntityType; 10] = [
        Self::User,
        Self::Organization,
        Self::Contact,
        Self::Issue,
        Self::Ticket,
        Self::Note,
        Self::EmailMessage,
        Self::Meeting,
        Self::InteractionEvent,
        Self::LogEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Organization => "organization",
            Self::Contact => "contact",
            Self::Issue => "issue",
            Self::Ticket => "ticket",
            Self::Note => "note",
            Self::EmailMessage => "email_message",
            Self::Meeting => "meeting",
            Self::InteractionEvent => "interaction_event",
            Self::LogEntry => "log_entry",
        }
    }
}

impl std::fmt::Display for SyncedEntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncedEntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown entity type: {}", s))
    }
}

/// Identity and bookkeeping shared by every DTO
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncMeta {
    /// Internal id, when the source already knows the canonical node
    pub id: String,
    pub external_id: String,
    pub external_system: String,
    pub external_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set by the mapping stage for records that must not be synced
    pub skip: bool,
    pub skip_reason: String,
    /// Provider-internal raw row id, never serialized
    #[serde(skip)]
    pub sync_id: String,
}

/// Reference to another canonical entity
///
/// Resolution uses the first populated key, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reference {
    pub id: String,
    pub external_id: String,
    pub external_owner_id: String,
}

impl Reference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn by_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn by_external_owner_id(external_owner_id: impl Into<String>) -> Self {
        Self {
            external_owner_id: external_owner_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.external_id.is_empty() && self.external_owner_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationData {
    pub name: String,
    pub country: String,
    pub region: String,
    pub locality: String,
    pub street: String,
    pub address: String,
    pub zip: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub profile_photo_url: String,
    /// Secondary vendor id other records use to point at their owner
    pub external_owner_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParentOrganization {
    pub organization: Reference,
    #[serde(rename = "type")]
    pub relation_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizationData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub name: String,
    pub description: String,
    pub website: String,
    pub industry: String,
    pub sub_industry: String,
    pub industry_group: String,
    pub target_audience: String,
    pub value_proposition: String,
    pub last_funding_round: String,
    pub last_funding_amount: String,
    pub market: String,
    pub is_public: Option<bool>,
    pub employees: Option<i64>,
    pub domains: Vec<String>,
    pub email: String,
    pub phone_number: String,
    pub location: Option<LocationData>,
    pub owner: Reference,
    pub parent: Option<ParentOrganization>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub job_title: String,
    pub timezone: String,
    pub profile_photo_url: String,
    pub email: String,
    pub additional_emails: Vec<String>,
    pub phone_number: String,
    pub owner: Reference,
    pub organizations: Vec<Reference>,
    pub location: Option<LocationData>,
}

impl ContactData {
    /// Primary email first, then additional ones, lowercased and deduplicated
    pub fn emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();
        for email in std::iter::once(&self.email).chain(self.additional_emails.iter()) {
            let email = email.trim().to_lowercase();
            if !email.is_empty() && !emails.contains(&email) {
                emails.push(email);
            }
        }
        emails
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IssueData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub subject: String,
    pub status: String,
    pub priority: String,
    pub description: String,
    /// Organization or contact that reported the issue
    pub reporter: Reference,
    pub assignee: Reference,
    pub followers: Vec<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TicketData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub subject: String,
    pub status: String,
    pub priority: String,
    pub description: String,
    pub submitter: Reference,
    pub requester: Reference,
    pub assignee: Reference,
    pub followers: Vec<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoteData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub html: String,
    pub text: String,
    pub content_type: String,
    /// User or contact that wrote the note
    pub creator: Reference,
    pub noted_contacts: Vec<Reference>,
    pub noted_organizations: Vec<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailMessageData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Vendor thread id; identifies the interaction session
    pub thread_id: String,
    pub direction: String,
    pub from_email: String,
    pub to_emails: Vec<String>,
    pub cc_emails: Vec<String>,
    pub bcc_emails: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeetingData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub name: String,
    pub agenda: String,
    pub agenda_content_type: String,
    pub conference_url: String,
    pub meeting_external_url: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub creator: Reference,
    pub attendee_users: Vec<Reference>,
    pub attendee_contacts: Vec<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractionEventData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub content: String,
    pub content_type: String,
    pub event_type: String,
    pub channel: String,
    pub part_of_issue: Reference,
    /// User, contact or organization
    pub sent_by: Reference,
    pub sent_to: Vec<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogEntryData {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub content: String,
    pub content_type: String,
    pub started_at: Option<DateTime<Utc>>,
    pub author: Reference,
    pub logged_organization: Reference,
}

/// One DTO of any entity type
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRecord {
    User(UserData),
    Organization(OrganizationData),
    Contact(ContactData),
    Issue(IssueData),
    Ticket(TicketData),
    Note(NoteData),
    EmailMessage(EmailMessageData),
    Meeting(MeetingData),
    InteractionEvent(InteractionEventData),
    LogEntry(LogEntryData),
}

impl SyncRecord {
    /// Decode a canonical JSON object as a DTO of `entity`
    pub fn from_json(entity: SyncedEntityType, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match entity {
            SyncedEntityType::User => Self::User(serde_json::from_value(value)?),
            SyncedEntityType::Organization => Self::Organization(serde_json::from_value(value)?),
            SyncedEntityType::Contact => Self::Contact(serde_json::from_value(value)?),
            SyncedEntityType::Issue => Self::Issue(serde_json::from_value(value)?),
            SyncedEntityType::Ticket => Self::Ticket(serde_json::from_value(value)?),
            SyncedEntityType::Note => Self::Note(serde_json::from_value(value)?),
            SyncedEntityType::EmailMessage => Self::EmailMessage(serde_json::from_value(value)?),
            SyncedEntityType::Meeting => Self::Meeting(serde_json::from_value(value)?),
            SyncedEntityType::InteractionEvent => Self::InteractionEvent(serde_json::from_value(value)?),
            SyncedEntityType::LogEntry => Self::LogEntry(serde_json::from_value(value)?),
        })
    }

    /// A DTO of `entity` with every field empty
    pub fn empty(entity: SyncedEntityType) -> Self {
        match entity {
            SyncedEntityType::User => Self::User(UserData::default()),
            SyncedEntityType::Organization => Self::Organization(OrganizationData::default()),
            SyncedEntityType::Contact => Self::Contact(ContactData::default()),
            SyncedEntityType::Issue => Self::Issue(IssueData::default()),
            SyncedEntityType::Ticket => Self::Ticket(TicketData::default()),
            SyncedEntityType::Note => Self::Note(NoteData::default()),
            SyncedEntityType::EmailMessage => Self::EmailMessage(EmailMessageData::default()),
            SyncedEntityType::Meeting => Self::Meeting(MeetingData::default()),
            SyncedEntityType::InteractionEvent => Self::InteractionEvent(InteractionEventData::default()),
            SyncedEntityType::LogEntry => Self::LogEntry(LogEntryData::default()),
        }
    }

    pub fn entity_type(&self) -> SyncedEntityType {
        match self {
            Self::User(_) => SyncedEntityType::User,
            Self::Organization(_) => SyncedEntityType::Organization,
            Self::Contact(_) => SyncedEntityType::Contact,
            Self::Issue(_) => SyncedEntityType::Issue,
            Self::Ticket(_) => SyncedEntityType::Ticket,
            Self::Note(_) => SyncedEntityType::Note,
            Self::EmailMessage(_) => SyncedEntityType::EmailMessage,
            Self::Meeting(_) => SyncedEntityType::Meeting,
            Self::InteractionEvent(_) => SyncedEntityType::InteractionEvent,
            Self::LogEntry(_) => SyncedEntityType::LogEntry,
        }
    }

    pub fn meta(&self) -> &SyncMeta {
        match self {
            Self::User(d) => &d.meta,
            Self::Organization(d) => &d.meta,
            Self::Contact(d) => &d.meta,
            Self::Issue(d) => &d.meta,
            Self::Ticket(d) => &d.meta,
            Self::Note(d) => &d.meta,
            Self::EmailMessage(d) => &d.meta,
            Self::Meeting(d) => &d.meta,
            Self::InteractionEvent(d) => &d.meta,
            Self::LogEntry(d) => &d.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut SyncMeta {
        match self {
            Self::User(d) => &mut d.meta,
            Self::Organization(d) => &mut d.meta,
            Self::Contact(d) => &mut d.meta,
            Self::Issue(d) => &mut d.meta,
            Self::Ticket(d) => &mut d.meta,
            Self::Note(d) => &mut d.meta,
            Self::EmailMessage(d) => &mut d.meta,
            Self::Meeting(d) => &mut d.meta,
            Self::InteractionEvent(d) => &mut d.meta,
            Self::LogEntry(d) => &mut d.meta,
        }
    }
}
