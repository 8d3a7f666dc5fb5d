//! Source data: DTOs, the provider contract and the raw-table provider

mod connector;
mod raw;
mod traits;
mod types;

pub use connector::Connector;
pub use raw::{CanonicalJsonMapper, RawTableProvider, RecordMapper};
pub use traits::{MarkResult, ProcessedMark, SourceDataProvider, SourceError, SourceResult};
pub use types::{
    ContactData, EmailMessageData, InteractionEventData, IssueData, LocationData, LogEntryData,
    MeetingData, NoteData, OrganizationData, ParentOrganization, Reference, SyncMeta, SyncRecord,
    SyncedEntityType, TicketData, UserData,
};
