// Reply - single-level child of a comment

use serde::{Deserialize, Serialize};

use super::entity::{AbstractComment, EntityKind, EntityMeta};
use super::Comment;
use crate::core::Page;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    meta: EntityMeta,
    parent: Comment,
}

impl Reply {
    pub fn new(meta: EntityMeta, parent: Comment) -> Self {
        Self { meta, parent }
    }

    pub fn parent(&self) -> &Comment {
        &self.parent
    }
}

impl AbstractComment for Reply {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Reply
    }

    /// Replies inherit the subject page of their parent
    fn associated_page(&self) -> &Page {
        self.parent.associated_page()
    }
}
