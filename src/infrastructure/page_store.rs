// Page Store - the host's versioned page storage as seen by the comment stores

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::{Namespace, Page, PageId, PageTitle, RevisionId, Timestamp, User};
use crate::error::AppResult;

/// Role of the primary content slot of every revision
pub const MAIN_SLOT: &str = "main";

/// Slot role -> raw text content of one revision
pub type SlotContent = BTreeMap<String, String>;

/// Build slot content holding only the main slot
pub fn main_slot(text: impl Into<String>) -> SlotContent {
    let mut slots = SlotContent::new();
    slots.insert(MAIN_SLOT.to_string(), text.into());
    slots
}

/// One immutable revision of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    pub page_id: PageId,
    pub parent_id: Option<RevisionId>,
    pub actor: User,
    pub timestamp: Timestamp,
    pub slots: SlotContent,
}

impl Revision {
    pub fn slot(&self, role: &str) -> Option<&str> {
        self.slots.get(role).map(String::as_str)
    }

    pub fn main_text(&self) -> Option<&str> {
        self.slot(MAIN_SLOT)
    }
}

/// Options for an edit of an existing page
#[derive(Debug, Clone, Default)]
pub struct EditFlags {
    /// Revision the edit was based on; a newer latest revision is an edit conflict
    pub base_revision: Option<RevisionId>,
    pub summary: Option<String>,
}

/// Result of a create or edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Saved { page: Page, revision: Revision },
    /// A page with the requested title already exists
    AlreadyExists,
    /// The page changed after the base revision was read
    Conflict,
    /// The page (or its latest revision) is gone
    Missing,
}

impl WriteOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, WriteOutcome::Saved { .. })
    }

    pub fn into_saved(self) -> Option<(Page, Revision)> {
        match self {
            WriteOutcome::Saved { page, revision } => Some((page, revision)),
            _ => None,
        }
    }
}

/// Versioned page storage provided by the host
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn page_by_id(&self, id: PageId) -> AppResult<Option<Page>>;

    async fn page_by_title(&self, title: &PageTitle) -> AppResult<Option<Page>>;

    /// Create a brand-new page; an existing title yields `AlreadyExists`
    async fn create_page(
        &self,
        title: &PageTitle,
        content: SlotContent,
        actor: &User,
    ) -> AppResult<WriteOutcome>;

    /// Save a new revision. Slots missing from `content` are inherited from the
    /// latest revision.
    async fn edit_page(
        &self,
        page: &Page,
        content: SlotContent,
        actor: &User,
        flags: EditFlags,
    ) -> AppResult<WriteOutcome>;

    /// Delete a page and its revisions. Returns false if the page did not exist.
    async fn delete_page(&self, page: &Page, actor: &User, suppress: bool) -> AppResult<bool>;

    async fn first_revision(&self, page_id: PageId) -> AppResult<Option<Revision>>;

    async fn latest_revision(&self, page_id: PageId) -> AppResult<Option<Revision>>;

    async fn revision_by_id(&self, id: RevisionId) -> AppResult<Option<Revision>>;

    /// All pages of one namespace, in id order
    async fn pages_in_namespace(&self, namespace: Namespace) -> AppResult<Vec<Page>>;
}
