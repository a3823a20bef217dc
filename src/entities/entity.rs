// Entity - identity, authorship and timestamps shared by comments and replies

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Comment, Reply};
use crate::core::{EntityId, Page, Timestamp, User};

/// Discriminates the two entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Comment,
    Reply,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Comment => "comment",
            EntityKind::Reply => "reply",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and revision-derived metadata of an entity.
///
/// `author` and `created` come from the first revision that produced the
/// entity and never change afterwards. `last_editor` and `modified` follow the
/// latest revision; `modified` stays `None` until the entity is edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: EntityId,
    pub author: User,
    pub last_editor: User,
    pub created: Timestamp,
    pub modified: Option<Timestamp>,
}

impl EntityMeta {
    /// Metadata for a freshly created entity
    pub fn created_by(id: EntityId, author: User, created: Timestamp) -> Self {
        Self {
            id,
            last_editor: author.clone(),
            author,
            created,
            modified: None,
        }
    }
}

/// Read access shared by comments and replies
pub trait AbstractComment {
    fn meta(&self) -> &EntityMeta;

    fn kind(&self) -> EntityKind;

    fn id(&self) -> EntityId {
        self.meta().id
    }

    fn author(&self) -> &User {
        &self.meta().author
    }

    fn last_editor(&self) -> &User {
        &self.meta().last_editor
    }

    fn creation_date(&self) -> Timestamp {
        self.meta().created
    }

    fn modification_date(&self) -> Option<Timestamp> {
        self.meta().modified
    }

    /// Subject page the discussion belongs to
    fn associated_page(&self) -> &Page;
}

/// Borrowed view of either entity kind, used by the store contract
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Comment(&'a Comment),
    Reply(&'a Reply),
}

impl AbstractComment for EntityRef<'_> {
    fn meta(&self) -> &EntityMeta {
        match self {
            EntityRef::Comment(comment) => comment.meta(),
            EntityRef::Reply(reply) => reply.meta(),
        }
    }

    fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Comment(_) => EntityKind::Comment,
            EntityRef::Reply(_) => EntityKind::Reply,
        }
    }

    fn associated_page(&self) -> &Page {
        match self {
            EntityRef::Comment(comment) => comment.associated_page(),
            EntityRef::Reply(reply) => reply.associated_page(),
        }
    }
}

impl<'a> From<&'a Comment> for EntityRef<'a> {
    fn from(comment: &'a Comment) -> Self {
        EntityRef::Comment(comment)
    }
}

impl<'a> From<&'a Reply> for EntityRef<'a> {
    fn from(reply: &'a Reply) -> Self {
        EntityRef::Reply(reply)
    }
}

/// Owned entity of either kind, carried by lifecycle events and listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entity {
    Comment(Comment),
    Reply(Reply),
}

impl AbstractComment for Entity {
    fn meta(&self) -> &EntityMeta {
        match self {
            Entity::Comment(comment) => comment.meta(),
            Entity::Reply(reply) => reply.meta(),
        }
    }

    fn kind(&self) -> EntityKind {
        match self {
            Entity::Comment(_) => EntityKind::Comment,
            Entity::Reply(_) => EntityKind::Reply,
        }
    }

    fn associated_page(&self) -> &Page {
        match self {
            Entity::Comment(comment) => comment.associated_page(),
            Entity::Reply(reply) => reply.associated_page(),
        }
    }
}
