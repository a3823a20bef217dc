// Comment Store - the contract both persistence backends implement
//
// Reads surface missing or inconsistent data as `None`/empty results. Mutations
// return `Ok(None)`/`Ok(false)` for expectable failures (permission denied,
// edit conflict) and `Err` only when the underlying storage fails.

pub mod vote_helper;
pub mod watch_helper;
pub mod namespace_page_store;
pub mod talk_page_content;
pub mod talk_page_cache;
pub mod talk_page_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{Config, StoreBackend};
use crate::core::{EntityId, Page, PageId, RevisionId, Timestamp, User, UserId};
use crate::entities::{AbstractComment, Comment, EntityRef, Reply};
use crate::error::AppResult;
use crate::framework::hooks::LifecycleEvents;
use crate::framework::privacy::{CommentAction, GroupPermissions, PermissionOracle};
use crate::infrastructure::database::{Database, ReadConsistency};
use crate::infrastructure::page_store::PageStore;
use crate::infrastructure::sqlite_page_store::SqlitePageStore;
use crate::infrastructure::users::{SqliteUserDirectory, UserDirectory};

pub use namespace_page_store::NamespacePageStore;
pub use talk_page_store::TalkPageStore;
pub use vote_helper::{Vote, VoteHelper};
pub use watch_helper::WatchHelper;

/// How the presentation layer should fetch per-entity history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryHandler {
    /// History lives on the entity's own page; `{id}` is replaced by the entity id
    Url { template: String },
    /// History is reconstructed on request through the named client callback
    Callback { name: String },
}

impl HistoryHandler {
    pub fn url_for(&self, id: EntityId) -> Option<String> {
        match self {
            HistoryHandler::Url { template } => Some(template.replace("{id}", &id.to_string())),
            HistoryHandler::Callback { .. } => None,
        }
    }
}

/// One historical state of an entity, newest first when listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryItem {
    pub revision_id: RevisionId,
    pub timestamp: Timestamp,
    pub actor: User,
    pub wikitext: String,
}

/// Collaborators supplied by the host runtime
#[derive(Clone)]
pub struct HostServices {
    pub pages: Arc<dyn PageStore>,
    pub users: Arc<dyn UserDirectory>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub events: Arc<LifecycleEvents>,
}

impl HostServices {
    /// SQLite-backed host collaborators sharing `db`, with the stock group rights
    pub fn sqlite(db: &Database, config: &Config, events: LifecycleEvents) -> Self {
        Self {
            pages: Arc::new(SqlitePageStore::new(db)),
            users: Arc::new(SqliteUserDirectory::new(db)),
            permissions: Arc::new(GroupPermissions::wiki_defaults(&config.comments.moderator_group)),
            events: Arc::new(events),
        }
    }
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn get_comment(&self, id: EntityId) -> AppResult<Option<Comment>>;

    async fn get_reply(&self, id: EntityId) -> AppResult<Option<Reply>>;

    /// All comments on a subject page, unordered
    async fn get_associated_comments(&self, page: &Page) -> AppResult<Vec<Comment>>;

    async fn get_replies(&self, comment: &Comment) -> AppResult<Vec<Reply>>;

    async fn get_num_replies(&self, comment: &Comment) -> AppResult<usize>;

    async fn insert_comment(
        &self,
        actor: &User,
        wikitext: &str,
        associated_page_id: PageId,
        title: &str,
        block_name: Option<&str>,
    ) -> AppResult<Option<Comment>>;

    async fn insert_reply(
        &self,
        actor: &User,
        wikitext: &str,
        parent: &Comment,
    ) -> AppResult<Option<Reply>>;

    async fn update_comment(
        &self,
        comment: &Comment,
        title: &str,
        wikitext: &str,
        actor: &User,
    ) -> AppResult<bool>;

    async fn update_reply(&self, reply: &Reply, wikitext: &str, actor: &User) -> AppResult<bool>;

    /// Deleting an entity that no longer exists succeeds
    async fn delete_comment(&self, comment: &Comment, actor: &User) -> AppResult<bool>;

    async fn delete_reply(&self, reply: &Reply, actor: &User) -> AppResult<bool>;

    async fn user_can(
        &self,
        action: CommentAction,
        user: &User,
        entity: EntityRef<'_>,
    ) -> AppResult<bool>;

    /// Current logical body, `None` if the entity's content cannot be read
    async fn get_wikitext(&self, entity: EntityRef<'_>) -> AppResult<Option<String>>;

    /// Past states of an entity, newest first
    async fn get_history(&self, entity: EntityRef<'_>) -> AppResult<Vec<HistoryItem>>;

    fn history_handler(&self) -> HistoryHandler;

    fn vote_helper(&self) -> &VoteHelper;

    fn watch_helper(&self) -> &WatchHelper;

    async fn vote(&self, comment: &Comment, vote: Vote, user: &User) -> AppResult<bool> {
        self.vote_helper().vote(comment.id(), vote, user.id).await
    }

    async fn get_vote(&self, comment: &Comment, user: &User) -> AppResult<Vote> {
        self.vote_helper().get_vote(comment.id(), user.id).await
    }

    async fn get_num_up_votes(&self, comment: &Comment) -> AppResult<u64> {
        self.vote_helper().num_up_votes(comment.id()).await
    }

    async fn get_num_down_votes(&self, comment: &Comment) -> AppResult<u64> {
        self.vote_helper().num_down_votes(comment.id()).await
    }

    async fn watch(&self, comment: &Comment, user: &User) -> AppResult<bool> {
        self.watch_helper().watch(comment.id(), user.id).await
    }

    async fn unwatch(&self, comment: &Comment, user: &User) -> AppResult<bool> {
        self.watch_helper().unwatch(comment.id(), user.id).await
    }

    async fn is_watching(
        &self,
        comment: &Comment,
        user: &User,
        consistency: ReadConsistency,
    ) -> AppResult<bool> {
        self.watch_helper()
            .is_watching(comment.id(), user.id, consistency)
            .await
    }

    async fn get_watchers(&self, comment: &Comment) -> AppResult<BTreeMap<UserId, User>> {
        self.watch_helper().get_watchers(comment.id()).await
    }
}

/// Build the backend selected by `config.comments.backend`
pub fn build_store(config: &Config, db: Database, host: HostServices) -> Arc<dyn CommentStore> {
    match config.comments.backend {
        StoreBackend::Namespace => Arc::new(NamespacePageStore::new(db, host, &config.comments)),
        StoreBackend::TalkPage => Arc::new(TalkPageStore::new(db, host, config)),
    }
}
