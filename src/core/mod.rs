// Core types - strong ids, identities and page handles shared by every layer

pub mod strong_types;

pub use strong_types::{
    current_timestamp, timestamp_from_millis, timestamp_to_millis, EntityId, Namespace, Page,
    PageId, PageTitle, RevisionId, Timestamp, User, UserId,
};
