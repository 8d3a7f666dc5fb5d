//! Per-entity merge rules
//!
//! Each builder turns a DTO into the field list the merge engine applies,
//! with the rule that governs every field and whether the entity keeps an
//! Alternate shadow for non-owning systems.

use super::merge::{EntityUpsert, FieldRule};
use crate::graph::{label, property, NodeId, PropertyValue};
use crate::source::{
    ContactData, EmailMessageData, InteractionEventData, IssueData, LocationData, LogEntryData,
    MeetingData, NoteData, OrganizationData, SyncedEntityType, TicketData, UserData,
};
use FieldRule::{Always, CreateOnly, OwnerNonEmptyOrEmpty, OwnerOnly, OwnerOrEmpty};

pub const CHANNEL_EMAIL: &str = "EMAIL";
pub const CONTENT_TYPE_HTML: &str = "text/html";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Label of the canonical node an entity type is stored as
pub fn canonical_label(entity: SyncedEntityType) -> &'static str {
    match entity {
        SyncedEntityType::User => label::USER,
        SyncedEntityType::Organization => label::ORGANIZATION,
        SyncedEntityType::Contact => label::CONTACT,
        SyncedEntityType::Issue => label::ISSUE,
        SyncedEntityType::Ticket => label::TICKET,
        SyncedEntityType::Note => label::NOTE,
        SyncedEntityType::EmailMessage => label::INTERACTION_EVENT,
        SyncedEntityType::Meeting => label::MEETING,
        SyncedEntityType::InteractionEvent => label::INTERACTION_EVENT,
        SyncedEntityType::LogEntry => label::LOG_ENTRY,
    }
}

/// Html wins over plain text; an explicit content type wins over both
fn content_of(html: &str, text: &str, content_type: &str) -> (String, String) {
    let (content, derived) = if !html.is_empty() {
        (html, CONTENT_TYPE_HTML)
    } else {
        (text, CONTENT_TYPE_TEXT)
    };
    let content_type = if content_type.is_empty() { derived } else { content_type };
    (content.to_string(), content_type.to_string())
}

pub fn user(id: NodeId, data: &UserData) -> EntityUpsert {
    EntityUpsert::new(id, label::USER, &data.meta)
        .field("name", data.name.as_str(), OwnerOrEmpty)
        .field("firstName", data.first_name.as_str(), OwnerOrEmpty)
        .field("lastName", data.last_name.as_str(), OwnerOrEmpty)
        .field("profilePhotoUrl", data.profile_photo_url.as_str(), OwnerOrEmpty)
        .link_property(property::EXTERNAL_OWNER_ID, data.external_owner_id.as_str())
        .with_alternate()
}

pub fn organization(id: NodeId, data: &OrganizationData) -> EntityUpsert {
    EntityUpsert::new(id, label::ORGANIZATION, &data.meta)
        .field("name", data.name.as_str(), OwnerOrEmpty)
        .field("description", data.description.as_str(), OwnerOrEmpty)
        .field("website", data.website.as_str(), OwnerOrEmpty)
        .field("industry", data.industry.as_str(), OwnerOrEmpty)
        .field("subIndustry", data.sub_industry.as_str(), OwnerOrEmpty)
        .field("industryGroup", data.industry_group.as_str(), OwnerOrEmpty)
        .field("targetAudience", data.target_audience.as_str(), OwnerOrEmpty)
        .field("valueProposition", data.value_proposition.as_str(), OwnerOrEmpty)
        .field("lastFundingRound", data.last_funding_round.as_str(), OwnerOrEmpty)
        .field("lastFundingAmount", data.last_funding_amount.as_str(), OwnerOrEmpty)
        .field("market", data.market.as_str(), OwnerOrEmpty)
        .optional_field("isPublic", data.is_public, OwnerOnly)
        .optional_field("employees", data.employees, OwnerOnly)
        .with_alternate()
}

pub fn contact(id: NodeId, data: &ContactData) -> EntityUpsert {
    EntityUpsert::new(id, label::CONTACT, &data.meta)
        .field("firstName", data.first_name.as_str(), OwnerOrEmpty)
        .field("lastName", data.last_name.as_str(), OwnerOrEmpty)
        .field("name", data.name.as_str(), OwnerOrEmpty)
        .field("jobTitle", data.job_title.as_str(), OwnerOrEmpty)
        .field("timezone", data.timezone.as_str(), OwnerOrEmpty)
        .field("profilePhotoUrl", data.profile_photo_url.as_str(), OwnerOrEmpty)
        .with_alternate()
}

pub fn issue(id: NodeId, data: &IssueData) -> EntityUpsert {
    EntityUpsert::new(id, label::ISSUE, &data.meta)
        .field("subject", data.subject.as_str(), OwnerOrEmpty)
        .field("description", data.description.as_str(), OwnerOrEmpty)
        .field("status", data.status.as_str(), OwnerOrEmpty)
        .field("priority", data.priority.as_str(), OwnerOrEmpty)
        .with_alternate()
}

pub fn ticket(id: NodeId, data: &TicketData) -> EntityUpsert {
    EntityUpsert::new(id, label::TICKET, &data.meta)
        .field("subject", data.subject.as_str(), OwnerOrEmpty)
        .field("description", data.description.as_str(), OwnerOrEmpty)
        .field("status", data.status.as_str(), OwnerOrEmpty)
        .field("priority", data.priority.as_str(), OwnerOrEmpty)
        .with_alternate()
}

pub fn note(id: NodeId, data: &NoteData) -> EntityUpsert {
    let (content, content_type) = content_of(&data.html, &data.text, &data.content_type);
    EntityUpsert::new(id, label::NOTE, &data.meta)
        .field("html", data.html.as_str(), OwnerOrEmpty)
        .field("content", content, OwnerOrEmpty)
        .field("contentType", content_type, OwnerOrEmpty)
        .field("text", data.text.as_str(), OwnerOrEmpty)
        .with_alternate()
}

pub fn meeting(id: NodeId, data: &MeetingData) -> EntityUpsert {
    EntityUpsert::new(id, label::MEETING, &data.meta)
        .field("name", data.name.as_str(), OwnerOrEmpty)
        .field("agenda", data.agenda.as_str(), OwnerOrEmpty)
        .field("agendaContentType", data.agenda_content_type.as_str(), OwnerOrEmpty)
        .field("conferenceUrl", data.conference_url.as_str(), OwnerOrEmpty)
        .field("meetingExternalUrl", data.meeting_external_url.as_str(), OwnerOrEmpty)
        .optional_field("startedAt", data.started_at, CreateOnly)
        .optional_field("endedAt", data.ended_at, CreateOnly)
}

pub fn interaction_event(id: NodeId, data: &InteractionEventData) -> EntityUpsert {
    EntityUpsert::new(id, label::INTERACTION_EVENT, &data.meta)
        .field("content", data.content.as_str(), Always)
        .field("contentType", data.content_type.as_str(), Always)
        .field("channel", data.channel.as_str(), CreateOnly)
        .field("eventType", data.event_type.as_str(), CreateOnly)
}

/// An email becomes an interaction event on the email channel
pub fn email_event(id: NodeId, data: &EmailMessageData) -> EntityUpsert {
    let (content, content_type) = content_of(&data.html, &data.text, "");
    EntityUpsert::new(id, label::INTERACTION_EVENT, &data.meta)
        .field("content", content, Always)
        .field("contentType", content_type, Always)
        .field("channel", CHANNEL_EMAIL, CreateOnly)
        .field("eventType", data.direction.as_str(), CreateOnly)
}

/// Session grouping the emails of one thread
pub fn email_session(external_system: &str, data: &EmailMessageData) -> EntityUpsert {
    let thread = thread_key(data);
    EntityUpsert::unlinked(
        NodeId::derived(label::INTERACTION_SESSION, &[external_system, thread]),
        label::INTERACTION_SESSION,
        external_system,
    )
    .field("name", data.subject.as_str(), OwnerOrEmpty)
    .field("channel", CHANNEL_EMAIL, OwnerOrEmpty)
    .field("status", "ACTIVE", OwnerOrEmpty)
    .field("type", "THREAD", OwnerOrEmpty)
    .field("identifier", thread, OwnerOrEmpty)
}

/// Thread id, or the message itself when it starts no thread
fn thread_key(data: &EmailMessageData) -> &str {
    if data.thread_id.is_empty() {
        &data.meta.external_id
    } else {
        &data.thread_id
    }
}

/// Location of `owner`, one per owner entity
pub fn location(owner: &NodeId, external_system: &str, data: &LocationData) -> EntityUpsert {
    EntityUpsert::unlinked(
        NodeId::derived(label::LOCATION, &[owner.as_str()]),
        label::LOCATION,
        external_system,
    )
    .field("name", data.name.as_str(), OwnerOnly)
    .field("country", data.country.as_str(), OwnerOnly)
    .field("region", data.region.as_str(), OwnerOnly)
    .field("locality", data.locality.as_str(), OwnerOnly)
    .field("street", data.street.as_str(), OwnerOnly)
    .field("address", data.address.as_str(), OwnerOnly)
    .field("zip", data.zip.as_str(), OwnerOnly)
    .field("postalCode", data.postal_code.as_str(), OwnerOnly)
    .with_alternate()
}

/// Role of a contact in one organization
pub fn job_role(contact: &NodeId, organization: &NodeId, external_system: &str, job_title: &str) -> EntityUpsert {
    EntityUpsert::unlinked(
        NodeId::derived(label::JOB_ROLE, &[contact.as_str(), organization.as_str()]),
        label::JOB_ROLE,
        external_system,
    )
    .field("jobTitle", job_title, OwnerNonEmptyOrEmpty)
}

pub fn log_entry(id: NodeId, data: &LogEntryData) -> EntityUpsert {
    EntityUpsert::new(id, label::LOG_ENTRY, &data.meta)
        .field("content", data.content.as_str(), OwnerOrEmpty)
        .field("contentType", data.content_type.as_str(), OwnerOrEmpty)
        .optional_field("startedAt", data.started_at.map(PropertyValue::timestamp), OwnerOrEmpty)
}
