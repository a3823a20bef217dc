// Comment - top-level entity attached to a subject page

use serde::{Deserialize, Serialize};

use super::entity::{AbstractComment, EntityKind, EntityMeta};
use crate::core::Page;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    meta: EntityMeta,
    title: String,
    block_name: Option<String>,
    associated_page: Page,
}

impl Comment {
    pub fn new(
        meta: EntityMeta,
        title: impl Into<String>,
        block_name: Option<String>,
        associated_page: Page,
    ) -> Self {
        Self {
            meta,
            title: title.into(),
            block_name,
            associated_page,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Named comment section on the subject page; `None` is the default section
    pub fn block_name(&self) -> Option<&str> {
        self.block_name.as_deref()
    }
}

impl AbstractComment for Comment {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Comment
    }

    fn associated_page(&self) -> &Page {
        &self.associated_page
    }
}
