//! Per-entity sync stages
//!
//! `EntitySyncer` takes one DTO through match, merge and link for a fixed
//! (tenant, external system, sync date). Log entries are excluded: they go
//! through the downstream writer instead.

use super::error::{SyncError, SyncResult};
use super::linker::{Direction, RelationshipLinker};
use super::matcher::EntityMatcher;
use super::merge::{EntityUpsert, MergeEngine, MergeOutcome};
use super::rules;
use crate::graph::{label, relationship, Edge, Node, NodeId, NodeRef, TenantName};
use crate::source::{
    ContactData, EmailMessageData, InteractionEventData, IssueData, LocationData, MeetingData,
    NoteData, OrganizationData, Reference, SyncRecord, TicketData, UserData,
};
use crate::storage::GraphStore;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Create the tenant's ExternalSystem node for `source` if missing
pub fn ensure_external_system(store: &dyn GraphStore, tenant: &TenantName, source: &str) -> SyncResult<NodeRef> {
    let id = NodeId::from_string(source);
    if let Some(existing) = store.load_node(tenant, &id)? {
        return Ok(existing.node_ref());
    }
    let node = Node::new(id, label::EXTERNAL_SYSTEM)
        .with_label(tenant.label(label::EXTERNAL_SYSTEM))
        .with_property("name", source);
    store.save_node(tenant, &node)?;
    debug!(tenant = %tenant, source, "created external system");
    Ok(node.node_ref())
}

/// Reject records that can never be synced
pub fn check_record(record: &SyncRecord) -> SyncResult<()> {
    let meta = record.meta();
    if meta.skip {
        return Err(SyncError::Skipped(meta.skip_reason.clone()));
    }
    if meta.external_id.is_empty() {
        return Err(SyncError::MissingExternalId);
    }
    Ok(())
}

pub struct EntitySyncer<'a> {
    store: &'a dyn GraphStore,
    tenant: TenantName,
    system: NodeId,
    sync_date: DateTime<Utc>,
}

impl<'a> EntitySyncer<'a> {
    pub fn new(store: &'a dyn GraphStore, tenant: TenantName, source: &str, sync_date: DateTime<Utc>) -> Self {
        Self {
            store,
            tenant,
            system: NodeId::from_string(source),
            sync_date,
        }
    }

    fn linker(&self) -> RelationshipLinker<'a> {
        RelationshipLinker::new(self.store)
    }

    fn upsert(&self, upsert: &EntityUpsert) -> SyncResult<MergeOutcome> {
        MergeEngine::new(self.store).upsert(&self.tenant, self.sync_date, upsert)
    }

    /// Matched canonical id, or a fresh one
    fn resolve_id(&self, record: &SyncRecord) -> SyncResult<NodeId> {
        Ok(EntityMatcher::new(self.store)
            .match_record(&self.tenant, record)?
            .unwrap_or_default())
    }

    /// Sync one record; returns the canonical node id
    pub fn sync(&self, record: &SyncRecord) -> SyncResult<NodeId> {
        check_record(record)?;
        if record.meta().external_system != self.system.as_str() {
            return Err(SyncError::MissingExternalSystem {
                tenant: self.tenant.to_string(),
                system: record.meta().external_system.clone(),
            });
        }
        let id = self.resolve_id(record)?;
        match record {
            SyncRecord::User(data) => self.user(id, data),
            SyncRecord::Organization(data) => self.organization(id, data),
            SyncRecord::Contact(data) => self.contact(id, data),
            SyncRecord::Issue(data) => self.issue(id, data),
            SyncRecord::Ticket(data) => self.ticket(id, data),
            SyncRecord::Note(data) => self.note(id, data),
            SyncRecord::EmailMessage(data) => self.email_message(id, data),
            SyncRecord::Meeting(data) => self.meeting(id, data),
            SyncRecord::InteractionEvent(data) => self.interaction_event(id, data),
            SyncRecord::LogEntry(_) => Err(SyncError::Skipped(
                "log entries are written through the downstream service".to_string(),
            )),
        }
    }

    fn link(&self, reference: &Reference, labels: &[&str], anchor: &NodeRef, rel: &str, direction: Direction) -> SyncResult<()> {
        self.linker()
            .link(&self.tenant, &self.system, reference, labels, anchor, rel, direction)?;
        Ok(())
    }

    fn location(&self, owner: &NodeRef, data: Option<&LocationData>) -> SyncResult<()> {
        let Some(data) = data else {
            return Ok(());
        };
        let outcome = self.upsert(&rules::location(&owner.id, self.system.as_str(), data))?;
        self.linker().connect(
            &self.tenant,
            &Edge::new(owner, relationship::ASSOCIATED_WITH, &NodeRef::new(outcome.id, label::LOCATION)),
        )?;
        Ok(())
    }

    fn user(&self, id: NodeId, data: &UserData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::user(id, data))?;
        let user = NodeRef::new(outcome.id, label::USER);
        let linker = self.linker();
        linker.attach_email(&self.tenant, &user, &data.email, true)?;
        linker.attach_phone(&self.tenant, &user, &data.phone_number)?;
        Ok(user.id)
    }

    fn organization(&self, id: NodeId, data: &OrganizationData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::organization(id, data))?;
        let org = NodeRef::new(outcome.id, label::ORGANIZATION);
        let linker = self.linker();

        self.link(&data.owner, &[label::USER], &org, relationship::OWNS, Direction::FromReference)?;
        if let Some(parent) = &data.parent {
            if let Some(parent_ref) = linker.resolve(&self.tenant, &self.system, &parent.organization, &[label::ORGANIZATION])? {
                linker.connect_with(
                    &self.tenant,
                    &org,
                    relationship::SUBSIDIARY_OF,
                    &parent_ref,
                    "type",
                    parent.relation_type.as_str(),
                )?;
            }
        }
        for domain in &data.domains {
            linker.attach_domain(&self.tenant, &org, domain)?;
        }
        linker.attach_email(&self.tenant, &org, &data.email, true)?;
        linker.attach_phone(&self.tenant, &org, &data.phone_number)?;
        self.location(&org, data.location.as_ref())?;
        Ok(org.id)
    }

    fn contact(&self, id: NodeId, data: &ContactData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::contact(id, data))?;
        let contact = NodeRef::new(outcome.id, label::CONTACT);
        let linker = self.linker();

        self.link(&data.owner, &[label::USER], &contact, relationship::OWNS, Direction::FromReference)?;

        let emails = data.emails();
        for (i, email) in emails.iter().enumerate() {
            linker.attach_email(&self.tenant, &contact, email, i == 0)?;
        }
        linker.attach_phone(&self.tenant, &contact, &data.phone_number)?;

        let mut organizations = Vec::new();
        for reference in &data.organizations {
            if let Some(org) = linker.resolve(&self.tenant, &self.system, reference, &[label::ORGANIZATION])? {
                organizations.push(org);
            }
        }
        if organizations.is_empty() {
            for email in &emails {
                for org in linker.organizations_by_email_domain(&self.tenant, email)? {
                    if !organizations.contains(&org) {
                        organizations.push(org);
                    }
                }
            }
        }
        for org in &organizations {
            let role = self.upsert(&rules::job_role(&contact.id, &org.id, self.system.as_str(), &data.job_title))?;
            let role = NodeRef::new(role.id, label::JOB_ROLE);
            linker.connect(&self.tenant, &Edge::new(&contact, relationship::WORKS_AS, &role))?;
            linker.connect(&self.tenant, &Edge::new(&role, relationship::ROLE_IN, org))?;
        }

        self.location(&contact, data.location.as_ref())?;
        Ok(contact.id)
    }

    fn issue(&self, id: NodeId, data: &IssueData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::issue(id, data))?;
        let issue = NodeRef::new(outcome.id, label::ISSUE);

        self.link(
            &data.reporter,
            &[label::ORGANIZATION, label::CONTACT],
            &issue,
            relationship::REPORTED_BY,
            Direction::ToReference,
        )?;
        self.link(&data.assignee, &[label::USER], &issue, relationship::IS_ASSIGNED_TO, Direction::FromReference)?;
        for follower in &data.followers {
            self.link(follower, &[label::USER], &issue, relationship::FOLLOWS, Direction::FromReference)?;
        }
        Ok(issue.id)
    }

    fn ticket(&self, id: NodeId, data: &TicketData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::ticket(id, data))?;
        let ticket = NodeRef::new(outcome.id, label::TICKET);
        let people = [label::USER, label::CONTACT];

        self.link(&data.submitter, &people, &ticket, relationship::SUBMITTED, Direction::FromReference)?;
        self.link(&data.requester, &people, &ticket, relationship::REQUESTED, Direction::FromReference)?;
        self.link(&data.assignee, &[label::USER], &ticket, relationship::IS_ASSIGNED_TO, Direction::FromReference)?;
        for follower in &data.followers {
            self.link(follower, &[label::USER], &ticket, relationship::FOLLOWS, Direction::FromReference)?;
        }
        Ok(ticket.id)
    }

    fn note(&self, id: NodeId, data: &NoteData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::note(id, data))?;
        let note = NodeRef::new(outcome.id, label::NOTE);

        self.link(
            &data.creator,
            &[label::USER, label::CONTACT],
            &note,
            relationship::CREATED,
            Direction::FromReference,
        )?;
        for contact in &data.noted_contacts {
            self.link(contact, &[label::CONTACT], &note, relationship::NOTED, Direction::FromReference)?;
        }
        for org in &data.noted_organizations {
            self.link(org, &[label::ORGANIZATION], &note, relationship::NOTED, Direction::FromReference)?;
        }
        Ok(note.id)
    }

    fn email_message(&self, id: NodeId, data: &EmailMessageData) -> SyncResult<NodeId> {
        let session = self.upsert(&rules::email_session(self.system.as_str(), data))?;
        let session = NodeRef::new(session.id, label::INTERACTION_SESSION);
        let outcome = self.upsert(&rules::email_event(id, data))?;
        let event = NodeRef::new(outcome.id, label::INTERACTION_EVENT);
        let linker = self.linker();

        linker.connect(&self.tenant, &Edge::new(&event, relationship::PART_OF, &session))?;
        if let Some(sender) = linker.email(&self.tenant, &data.from_email)? {
            linker.connect(&self.tenant, &Edge::new(&event, relationship::SENT_BY, &sender))?;
        }
        let recipients = [("to", &data.to_emails), ("cc", &data.cc_emails), ("bcc", &data.bcc_emails)];
        for (kind, emails) in recipients {
            for email in emails.iter() {
                if let Some(recipient) = linker.email(&self.tenant, email)? {
                    linker.connect_with(&self.tenant, &event, relationship::SENT_TO, &recipient, "type", kind)?;
                }
            }
        }
        Ok(event.id)
    }

    fn meeting(&self, id: NodeId, data: &MeetingData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::meeting(id, data))?;
        let meeting = NodeRef::new(outcome.id, label::MEETING);

        self.link(&data.creator, &[label::USER], &meeting, relationship::CREATED_BY, Direction::ToReference)?;
        for user in &data.attendee_users {
            self.link(user, &[label::USER], &meeting, relationship::ATTENDED_BY, Direction::ToReference)?;
        }
        for contact in &data.attendee_contacts {
            self.link(contact, &[label::CONTACT], &meeting, relationship::ATTENDED_BY, Direction::ToReference)?;
        }
        Ok(meeting.id)
    }

    fn interaction_event(&self, id: NodeId, data: &InteractionEventData) -> SyncResult<NodeId> {
        let outcome = self.upsert(&rules::interaction_event(id, data))?;
        let event = NodeRef::new(outcome.id, label::INTERACTION_EVENT);
        let parties = [label::USER, label::CONTACT, label::ORGANIZATION];

        self.link(&data.part_of_issue, &[label::ISSUE], &event, relationship::PART_OF, Direction::ToReference)?;
        self.link(&data.sent_by, &parties, &event, relationship::SENT_BY, Direction::ToReference)?;
        for recipient in &data.sent_to {
            self.link(recipient, &parties, &event, relationship::SENT_TO, Direction::ToReference)?;
        }
        Ok(event.id)
    }
}
