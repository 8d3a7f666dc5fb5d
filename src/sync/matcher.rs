//! Entity matcher: external identity to canonical node id
//!
//! The primary key of an external record is the `externalId` carried by the
//! single `IS_LINKED_WITH` edge between a canonical node and the tenant's
//! ExternalSystem node. When that finds nothing, a few secondary keys are
//! tried (explicit internal id, email, domain, meeting url). Matching never
//! writes.

use super::error::SyncResult;
use super::linker::{domain_node_id, email_node_id};
use super::rules::canonical_label;
use crate::graph::{label, property, relationship, NodeId, TenantName};
use crate::source::SyncRecord;
use crate::storage::{GraphStore, NodeFilter};
use tracing::debug;

pub struct EntityMatcher<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> EntityMatcher<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Internal id of the `label` node linked to `external_system` under
    /// `external_id`, or an empty string
    pub fn get_matched_id(
        &self,
        tenant: &TenantName,
        label: &str,
        external_system: &str,
        external_id: &str,
    ) -> SyncResult<String> {
        if external_id.is_empty() {
            return Ok(String::new());
        }
        let found = self.store.find_linked(
            tenant,
            label,
            &NodeId::from_string(external_system),
            property::EXTERNAL_ID,
            external_id,
        )?;
        Ok(found.map(|id| id.as_str().to_string()).unwrap_or_default())
    }

    /// Canonical node for a record: external id first, then secondary keys
    pub fn match_record(&self, tenant: &TenantName, record: &SyncRecord) -> SyncResult<Option<NodeId>> {
        let meta = record.meta();
        let label = canonical_label(record.entity_type());

        let matched = self.get_matched_id(tenant, label, &meta.external_system, &meta.external_id)?;
        if !matched.is_empty() {
            return Ok(Some(NodeId::from_string(matched)));
        }

        if !meta.id.is_empty() {
            let id = NodeId::from_string(meta.id.as_str());
            if let Some(node) = self.store.load_node(tenant, &id)? {
                if node.has_label(label) {
                    return Ok(Some(id));
                }
            }
        }

        let system = NodeId::from_string(meta.external_system.as_str());
        let candidates = match record {
            SyncRecord::User(user) => self.by_email(tenant, label::USER, std::slice::from_ref(&user.email))?,
            SyncRecord::Contact(contact) => self.by_email(tenant, label::CONTACT, &contact.emails())?,
            SyncRecord::Organization(org) => self.by_domain(tenant, &org.domains)?,
            SyncRecord::Meeting(meeting) if !meeting.meeting_external_url.is_empty() => self
                .store
                .find_nodes(
                    tenant,
                    &NodeFilter::new()
                        .with_label(label::MEETING)
                        .with_property("meetingExternalUrl", meeting.meeting_external_url.as_str()),
                )?
                .into_iter()
                .map(|n| n.id)
                .collect(),
            _ => Vec::new(),
        };

        // A node this system already links under another external id is a different record
        for candidate in candidates {
            let linked = self
                .store
                .load_edge(tenant, &candidate, relationship::IS_LINKED_WITH, &system)?;
            if linked.is_none() {
                debug!(tenant = %tenant, label, external_id = %meta.external_id, id = %candidate, "secondary match");
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Nodes with `owner_label` that have one of `emails`
    fn by_email(&self, tenant: &TenantName, owner_label: &str, emails: &[String]) -> SyncResult<Vec<NodeId>> {
        let mut found = Vec::new();
        for email in emails.iter().filter(|e| !e.trim().is_empty()) {
            let email_id = email_node_id(email);
            for edge in self.store.get_edges_to(tenant, &email_id, Some(relationship::HAS))? {
                if edge.source_label == owner_label && !found.contains(&edge.source) {
                    found.push(edge.source);
                }
            }
        }
        Ok(found)
    }

    fn by_domain(&self, tenant: &TenantName, domains: &[String]) -> SyncResult<Vec<NodeId>> {
        let mut found = Vec::new();
        for domain in domains.iter().filter(|d| !d.trim().is_empty()) {
            let domain_id = domain_node_id(domain);
            for edge in self
                .store
                .get_edges_to(tenant, &domain_id, Some(relationship::HAS_DOMAIN))?
            {
                if edge.source_label == label::ORGANIZATION && !found.contains(&edge.source) {
                    found.push(edge.source);
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node, NodeRef};
    use crate::source::{ContactData, MeetingData, SyncMeta, UserData};
    use crate::storage::{OpenStore, SqliteStore};

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn tenant() -> TenantName {
        TenantName::parse("acme").unwrap()
    }

    fn system(store: &SqliteStore, id: &str) -> NodeRef {
        let node = Node::new(NodeId::from_string(id), label::EXTERNAL_SYSTEM);
        store.save_node(&tenant(), &node).unwrap();
        node.node_ref()
    }

    fn linked_contact(store: &SqliteStore, system: &NodeRef, external_id: &str) -> NodeRef {
        let node = Node::new(NodeId::new(), label::CONTACT);
        store.save_node(&tenant(), &node).unwrap();
        store
            .save_edge(
                &tenant(),
                &Edge::new(&node.node_ref(), relationship::IS_LINKED_WITH, system)
                    .with_property(property::EXTERNAL_ID, external_id),
            )
            .unwrap();
        node.node_ref()
    }

    fn with_email(store: &SqliteStore, owner: &NodeRef, email: &str) {
        let email_node = Node::new(email_node_id(email), label::EMAIL).with_property("email", email);
        store.save_node(&tenant(), &email_node).unwrap();
        store
            .save_edge(&tenant(), &Edge::new(owner, relationship::HAS, &email_node.node_ref()))
            .unwrap();
    }

    fn contact_record(system: &str, external_id: &str, email: &str) -> SyncRecord {
        SyncRecord::Contact(ContactData {
            meta: SyncMeta {
                external_id: external_id.into(),
                external_system: system.into(),
                ..Default::default()
            },
            email: email.into(),
            ..Default::default()
        })
    }

    #[test]
    fn matches_by_external_id_only_within_system() {
        let store = create_test_store();
        let hubspot = system(&store, "hubspot");
        system(&store, "zendesk_support");
        let contact = linked_contact(&store, &hubspot, "42");
        let matcher = EntityMatcher::new(&store);

        assert_eq!(
            matcher.get_matched_id(&tenant(), label::CONTACT, "hubspot", "42").unwrap(),
            contact.id.as_str()
        );
        assert_eq!(matcher.get_matched_id(&tenant(), label::CONTACT, "zendesk_support", "42").unwrap(), "");
        assert_eq!(matcher.get_matched_id(&tenant(), label::USER, "hubspot", "42").unwrap(), "");
        assert_eq!(matcher.get_matched_id(&tenant(), label::CONTACT, "hubspot", "").unwrap(), "");
    }

    #[test]
    fn falls_back_to_email_for_another_system() {
        let store = create_test_store();
        let hubspot = system(&store, "hubspot");
        system(&store, "zendesk_support");
        let contact = linked_contact(&store, &hubspot, "42");
        with_email(&store, &contact, "a@x.com");
        let matcher = EntityMatcher::new(&store);

        let matched = matcher
            .match_record(&tenant(), &contact_record("zendesk_support", "z-9", "A@X.com"))
            .unwrap();
        assert_eq!(matched, Some(contact.id.clone()));

        // Same system, different external id: not the same record
        let matched = matcher
            .match_record(&tenant(), &contact_record("hubspot", "43", "a@x.com"))
            .unwrap();
        assert_eq!(matched, None);
    }

    #[test]
    fn email_match_respects_owner_label() {
        let store = create_test_store();
        let hubspot = system(&store, "hubspot");
        let contact = linked_contact(&store, &hubspot, "42");
        with_email(&store, &contact, "a@x.com");

        let user = SyncRecord::User(UserData {
            meta: SyncMeta {
                external_id: "u-1".into(),
                external_system: "zendesk_support".into(),
                ..Default::default()
            },
            email: "a@x.com".into(),
            ..Default::default()
        });
        assert_eq!(EntityMatcher::new(&store).match_record(&tenant(), &user).unwrap(), None);
    }

    #[test]
    fn explicit_internal_id_must_exist_with_label() {
        let store = create_test_store();
        let hubspot = system(&store, "hubspot");
        let contact = linked_contact(&store, &hubspot, "42");
        let matcher = EntityMatcher::new(&store);

        let mut record = contact_record("zendesk_support", "z-1", "");
        record.meta_mut().id = contact.id.as_str().to_string();
        assert_eq!(matcher.match_record(&tenant(), &record).unwrap(), Some(contact.id));

        record.meta_mut().id = "missing".into();
        assert_eq!(matcher.match_record(&tenant(), &record).unwrap(), None);
    }

    #[test]
    fn meetings_match_by_external_url() {
        let store = create_test_store();
        system(&store, "hubspot");
        let meeting = Node::new(NodeId::new(), label::MEETING)
            .with_property("meetingExternalUrl", "https://meet.example.com/abc");
        store.save_node(&tenant(), &meeting).unwrap();

        let record = SyncRecord::Meeting(MeetingData {
            meta: SyncMeta {
                external_id: "m-1".into(),
                external_system: "hubspot".into(),
                ..Default::default()
            },
            meeting_external_url: "https://meet.example.com/abc".into(),
            ..Default::default()
        });
        assert_eq!(
            EntityMatcher::new(&store).match_record(&tenant(), &record).unwrap(),
            Some(meeting.id)
        );
    }
}
