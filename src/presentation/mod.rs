// Presentation - ordering and client payloads built on top of a comment store

pub mod ordering;
pub mod serializer;

pub use ordering::{compare_comments, sort_comments, sort_replies, OrderingOptions, RankedComment};
pub use serializer::{AuthorCache, AuthorProfile, CommentSerializer, CommentStreamPayload};
