// Entities - value objects for the two kinds of discussion content

pub mod entity;
pub mod comment;
pub mod reply;

pub use comment::Comment;
pub use entity::{AbstractComment, Entity, EntityKind, EntityMeta, EntityRef};
pub use reply::Reply;
