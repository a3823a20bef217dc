// Namespace Page Store - one versioned page per comment or reply
//
// The entity id is the id of its page in the comment namespace. The
// `cs_comments` and `cs_replies` tables map those pages to their subject page,
// title and block, or to their parent comment. Page write and metadata write
// are separate statements with no shared transaction.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, error, info, instrument, warn};

use super::{CommentStore, HistoryHandler, HistoryItem, HostServices, VoteHelper, WatchHelper};
use crate::config::{CommentsConfig, ReplyDeletePolicy};
use crate::core::{EntityId, Namespace, Page, PageId, PageTitle, User};
use crate::entities::{AbstractComment, Comment, Entity, EntityMeta, EntityRef, Reply};
use crate::error::{AppError, AppResult};
use crate::framework::hooks::{LifecycleEvent, LifecycleEvents, LifecycleKind};
use crate::framework::privacy::{CommentAction, PermissionOracle};
use crate::infrastructure::database::Database;
use crate::infrastructure::page_store::{main_slot, EditFlags, PageStore, Revision, WriteOutcome};

/// Produces candidate page titles for new entities
pub type TitleGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Ten random lowercase hex characters
pub fn random_title() -> String {
    format!("{:010x}", rand::random::<u64>() & 0xff_ffff_ffff)
}

fn display_title_directive(comment_title: &str) -> String {
    format!("{{{{DISPLAYTITLE:\n{}\n}}}}", comment_title)
}

/// Append the display-title directive so the raw comment page renders with its title
pub fn add_annotations(wikitext: &str, comment_title: &str) -> String {
    format!("{}{}", wikitext, display_title_directive(comment_title))
}

/// Strip the directive `add_annotations` produced for the same title.
/// A directive for any other title is left in place.
pub fn remove_annotations(wikitext: &str, comment_title: &str) -> String {
    wikitext.replace(&display_title_directive(comment_title), "")
}

/// Row of the administrative listing
#[derive(Debug, Clone)]
pub struct ListedEntity {
    pub entity: Entity,
    pub last_touched: Option<crate::core::Timestamp>,
}

pub struct NamespacePageStore {
    db: Database,
    pages: Arc<dyn PageStore>,
    permissions: Arc<dyn PermissionOracle>,
    events: Arc<LifecycleEvents>,
    votes: VoteHelper,
    watches: WatchHelper,
    namespace: Namespace,
    max_title_attempts: u32,
    reply_delete_policy: ReplyDeletePolicy,
    title_generator: TitleGenerator,
}

impl NamespacePageStore {
    pub fn new(db: Database, host: HostServices, config: &CommentsConfig) -> Self {
        Self {
            votes: VoteHelper::new(db.clone()),
            watches: WatchHelper::new(db.clone(), host.users.clone()),
            db,
            pages: host.pages,
            permissions: host.permissions,
            events: host.events,
            namespace: config.namespace,
            max_title_attempts: config.max_title_attempts.max(1),
            reply_delete_policy: config.reply_delete_policy,
            title_generator: Arc::new(random_title),
        }
    }

    pub fn with_title_generator(mut self, generator: TitleGenerator) -> Self {
        self.title_generator = generator;
        self
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Authorship and timestamps from the first and latest revision of the entity page.
    /// Either revision missing means the history is unusable and the entity is treated as absent.
    async fn load_meta(&self, id: EntityId) -> AppResult<Option<EntityMeta>> {
        let page_id = PageId::from(id);
        let first = self.pages.first_revision(page_id).await?;
        let latest = self.pages.latest_revision(page_id).await?;

        match (first, latest) {
            (Some(first), Some(latest)) => Ok(Some(EntityMeta {
                id,
                author: first.actor,
                last_editor: latest.actor,
                created: first.timestamp,
                modified: (latest.id != first.id).then_some(latest.timestamp),
            })),
            _ => {
                warn!("Entity {} has no usable revision history", id);
                Ok(None)
            }
        }
    }

    /// Create a new page under a random title, retrying title collisions
    async fn create_entity_page(
        &self,
        wikitext: String,
        actor: &User,
    ) -> AppResult<Option<(Page, Revision)>> {
        for attempt in 1..=self.max_title_attempts {
            let title = PageTitle::new(self.namespace, &(self.title_generator)())?;
            match self
                .pages
                .create_page(&title, main_slot(wikitext.clone()), actor)
                .await?
            {
                WriteOutcome::Saved { page, revision } => return Ok(Some((page, revision))),
                WriteOutcome::AlreadyExists => {
                    debug!("Title {} taken on attempt {}, retrying", title, attempt);
                }
                other => {
                    warn!("Creating entity page {} failed: {:?}", title, other);
                    return Ok(None);
                }
            }
        }

        warn!(
            "Gave up creating an entity page after {} title collisions",
            self.max_title_attempts
        );
        Ok(None)
    }

    /// Delete the page of an entity. A page that is already gone counts as deleted.
    async fn delete_entity_page(&self, id: EntityId, actor: &User) -> AppResult<()> {
        // Keep the id; the page handle is invalid after deletion
        let page_id = PageId::from(id);
        match self.pages.page_by_id(page_id).await? {
            Some(page) => {
                if !self.pages.delete_page(&page, actor, true).await? {
                    debug!("Page {} vanished before it could be deleted", page_id);
                }
            }
            None => debug!("Page {} already deleted", page_id),
        }
        Ok(())
    }

    async fn reply_ids(&self, comment: EntityId) -> AppResult<Vec<EntityId>> {
        let rows = sqlx::query(
            "SELECT cst_r_reply_page_id FROM cs_replies WHERE cst_r_comment_page_id = ? ORDER BY cst_r_reply_page_id",
        )
        .bind(comment.value())
        .fetch_all(self.db.primary())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list replies of {}: {}", comment, e)))?;
        Ok(rows.into_iter().map(|row| EntityId(row.get("cst_r_reply_page_id"))).collect())
    }

    async fn comments_where(&self, sql: &str, page: &Page, block: Option<&str>) -> AppResult<Vec<Comment>> {
        let mut query = sqlx::query(sql).bind(page.id.value());
        if let Some(block) = block {
            query = query.bind(block.to_string());
        }
        let rows = query
            .fetch_all(self.db.replica())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list comments of page {}: {}", page.id, e)))?;

        let mut comments = Vec::with_capacity(rows.len());
        for row in rows {
            let id = EntityId(row.get("cst_c_comment_page_id"));
            if let Some(comment) = self.get_comment(id).await? {
                comments.push(comment);
            }
        }
        Ok(comments)
    }

    /// Comments on `page` in one block; `None` selects the default block
    pub async fn get_associated_comments_in_block(
        &self,
        page: &Page,
        block: Option<&str>,
    ) -> AppResult<Vec<Comment>> {
        match block {
            Some(block) => {
                self.comments_where(
                    "SELECT cst_c_comment_page_id FROM cs_comments WHERE cst_c_assoc_page_id = ? AND cst_c_block_name = ? ORDER BY cst_c_comment_page_id",
                    page,
                    Some(block),
                )
                .await
            }
            None => {
                self.comments_where(
                    "SELECT cst_c_comment_page_id FROM cs_comments WHERE cst_c_assoc_page_id = ? AND cst_c_block_name IS NULL ORDER BY cst_c_comment_page_id",
                    page,
                    None,
                )
                .await
            }
        }
    }

    /// Comments and replies, most recently touched first, for the administrative listing
    pub async fn list_entities(&self, offset: u32, limit: u32) -> AppResult<Vec<ListedEntity>> {
        let rows = sqlx::query(
            r#"
            SELECT ids.entity_id, ids.kind, revision.rev_timestamp
            FROM (
                SELECT cst_c_comment_page_id AS entity_id, 'comment' AS kind FROM cs_comments
                UNION ALL
                SELECT cst_r_reply_page_id AS entity_id, 'reply' AS kind FROM cs_replies
            ) AS ids
            LEFT JOIN page ON page.page_id = ids.entity_id
            LEFT JOIN revision ON revision.rev_id = page.page_latest
            ORDER BY revision.rev_timestamp DESC, ids.entity_id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.db.replica())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list comment pages: {}", e)))?;

        let mut listed = Vec::with_capacity(rows.len());
        for row in rows {
            let id = EntityId(row.get("entity_id"));
            let kind: String = row.get("kind");
            let last_touched = row
                .get::<Option<i64>, _>("rev_timestamp")
                .and_then(crate::core::timestamp_from_millis);
            let entity = if kind == "comment" {
                self.get_comment(id).await?.map(Entity::Comment)
            } else {
                self.get_reply(id).await?.map(Entity::Reply)
            };
            match entity {
                Some(entity) => listed.push(ListedEntity { entity, last_touched }),
                None => debug!("Listing skips unresolvable {} {}", kind, id),
            }
        }
        Ok(listed)
    }

    /// Pages in the comment namespace that no metadata row points at
    pub async fn orphaned_pages(&self) -> AppResult<Vec<Page>> {
        let rows = sqlx::query(
            "SELECT cst_c_comment_page_id AS id FROM cs_comments UNION SELECT cst_r_reply_page_id AS id FROM cs_replies",
        )
        .fetch_all(self.db.primary())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to read comment metadata ids: {}", e)))?;
        let known: HashSet<i64> = rows.into_iter().map(|row| row.get("id")).collect();

        Ok(self
            .pages
            .pages_in_namespace(self.namespace)
            .await?
            .into_iter()
            .filter(|page| !known.contains(&page.id.value()))
            .collect())
    }

    /// Delete every orphaned comment page; returns how many were removed
    pub async fn purge_orphaned_pages(&self, actor: &User) -> AppResult<usize> {
        let orphans = self.orphaned_pages().await?;
        let mut purged = 0;
        for page in orphans {
            if self.pages.delete_page(&page, actor, true).await? {
                purged += 1;
            }
        }
        if purged > 0 {
            info!("Purged {} orphaned comment pages", purged);
        }
        Ok(purged)
    }

    async fn entity_wikitext(&self, id: EntityId) -> AppResult<Option<String>> {
        Ok(self
            .pages
            .latest_revision(id.into())
            .await?
            .and_then(|revision| revision.main_text().map(str::to_string)))
    }

    /// Delete one reply without a permission check
    /// Delete a reply's page and row. The event carries the reply as it resolved
    /// before deletion; a reply whose page was already gone fires none.
    async fn remove_reply(&self, id: EntityId, parent: &Comment, actor: &User) -> AppResult<()> {
        let resolved = self.load_meta(id).await?.map(|meta| Reply::new(meta, parent.clone()));
        self.delete_entity_page(id, actor).await?;

        sqlx::query("DELETE FROM cs_replies WHERE cst_r_reply_page_id = ?")
            .bind(id.value())
            .execute(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete reply row {}: {}", id, e)))?;

        match resolved {
            Some(reply) => {
                self.events
                    .dispatch(LifecycleEvent::new(LifecycleKind::Delete, Entity::Reply(reply), actor))
                    .await;
            }
            None => debug!("Reply {} had no page left; no delete event", id),
        }
        Ok(())
    }

    async fn row_exists(&self, sql: &str, id: EntityId) -> AppResult<bool> {
        let row = sqlx::query(sql)
            .bind(id.value())
            .fetch_optional(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to look up metadata of {}: {}", id, e)))?;
        Ok(row.is_some())
    }

    /// Host right on the entity page plus first-revision authorship or the moderator right
    async fn may_modify_page(&self, action: CommentAction, user: &User, page: &Page) -> AppResult<bool> {
        if !self.permissions.can(user, action.right(), page).await? {
            return Ok(false);
        }

        // Authorship always comes from the page's first revision
        let Some(first) = self.pages.first_revision(page.id).await? else {
            return Ok(false);
        };
        if first.actor.same_identity(user) {
            return Ok(true);
        }
        match action.moderator_right() {
            Some(right) => self.permissions.can(user, right, page).await,
            None => Ok(false),
        }
    }

    /// Permission to delete an entity that may no longer resolve. Without its
    /// page there is no authorship to check, so only moderators may clean up.
    async fn may_delete(&self, id: EntityId, actor: &User, subject: &Page) -> AppResult<bool> {
        match self.pages.page_by_id(id.into()).await? {
            Some(page) => self.may_modify_page(CommentAction::Delete, actor, &page).await,
            None => match CommentAction::Delete.moderator_right() {
                Some(right) => self.permissions.can(actor, right, subject).await,
                None => Ok(false),
            },
        }
    }
}

#[async_trait]
impl CommentStore for NamespacePageStore {
    async fn get_comment(&self, id: EntityId) -> AppResult<Option<Comment>> {
        let row = sqlx::query(
            "SELECT cst_c_assoc_page_id, cst_c_comment_title, cst_c_block_name FROM cs_comments WHERE cst_c_comment_page_id = ?",
        )
        .bind(id.value())
        .fetch_optional(self.db.primary())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to get comment {}: {}", id, e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let assoc_id = PageId(row.get("cst_c_assoc_page_id"));
        let Some(associated_page) = self.pages.page_by_id(assoc_id).await? else {
            debug!("Comment {} points at missing page {}", id, assoc_id);
            return Ok(None);
        };
        let Some(meta) = self.load_meta(id).await? else {
            return Ok(None);
        };

        Ok(Some(Comment::new(
            meta,
            row.get::<String, _>("cst_c_comment_title"),
            row.get::<Option<String>, _>("cst_c_block_name"),
            associated_page,
        )))
    }

    async fn get_reply(&self, id: EntityId) -> AppResult<Option<Reply>> {
        let row = sqlx::query("SELECT cst_r_comment_page_id FROM cs_replies WHERE cst_r_reply_page_id = ?")
            .bind(id.value())
            .fetch_optional(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get reply {}: {}", id, e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let parent_id = EntityId(row.get("cst_r_comment_page_id"));
        let Some(parent) = self.get_comment(parent_id).await? else {
            debug!("Reply {} has no resolvable parent {}", id, parent_id);
            return Ok(None);
        };
        let Some(meta) = self.load_meta(id).await? else {
            return Ok(None);
        };
        Ok(Some(Reply::new(meta, parent)))
    }

    async fn get_associated_comments(&self, page: &Page) -> AppResult<Vec<Comment>> {
        self.comments_where(
            "SELECT cst_c_comment_page_id FROM cs_comments WHERE cst_c_assoc_page_id = ? ORDER BY cst_c_comment_page_id",
            page,
            None,
        )
        .await
    }

    async fn get_replies(&self, comment: &Comment) -> AppResult<Vec<Reply>> {
        let mut replies = Vec::new();
        for id in self.reply_ids(comment.id()).await? {
            if let Some(meta) = self.load_meta(id).await? {
                replies.push(Reply::new(meta, comment.clone()));
            }
        }
        Ok(replies)
    }

    /// Counts only replies that still resolve, matching `get_replies`
    async fn get_num_replies(&self, comment: &Comment) -> AppResult<usize> {
        Ok(self.get_replies(comment).await?.len())
    }

    #[instrument(skip(self, actor, wikitext), fields(actor = %actor.name))]
    async fn insert_comment(
        &self,
        actor: &User,
        wikitext: &str,
        associated_page_id: PageId,
        title: &str,
        block_name: Option<&str>,
    ) -> AppResult<Option<Comment>> {
        let title = title.trim();
        if title.is_empty() {
            debug!("Rejecting comment without a title");
            return Ok(None);
        }
        let Some(associated_page) = self.pages.page_by_id(associated_page_id).await? else {
            debug!("Cannot comment on missing page {}", associated_page_id);
            return Ok(None);
        };
        if !self
            .permissions
            .can(actor, CommentAction::Post.right(), &associated_page)
            .await?
        {
            debug!("{} may not comment on {}", actor.name, associated_page.title);
            return Ok(None);
        }

        let annotated = add_annotations(wikitext, title);
        let Some((page, revision)) = self.create_entity_page(annotated, actor).await? else {
            return Ok(None);
        };
        let id = EntityId::from(page.id);

        let inserted = sqlx::query(
            "INSERT INTO cs_comments (cst_c_comment_page_id, cst_c_assoc_page_id, cst_c_comment_title, cst_c_block_name) VALUES (?, ?, ?, ?)",
        )
        .bind(id.value())
        .bind(associated_page.id.value())
        .bind(title)
        .bind(block_name)
        .execute(self.db.primary())
        .await;

        if let Err(e) = inserted {
            error!("Comment page {} created but its metadata row failed: {}", page.id, e);
            return Err(AppError::PartialWrite {
                page_id: page.id,
                reason: e.to_string(),
            });
        }

        if actor.is_registered() {
            self.watches.watch(id, actor.id).await?;
        }

        let comment = Comment::new(
            EntityMeta::created_by(id, revision.actor.clone(), revision.timestamp),
            title,
            block_name.map(str::to_string),
            associated_page,
        );
        info!("Inserted comment {} on page {}", id, comment.associated_page().id);

        self.events
            .dispatch(LifecycleEvent::new(LifecycleKind::Insert, Entity::Comment(comment.clone()), actor))
            .await;
        Ok(Some(comment))
    }

    #[instrument(skip(self, actor, wikitext, parent), fields(actor = %actor.name, parent = %parent.id()))]
    async fn insert_reply(
        &self,
        actor: &User,
        wikitext: &str,
        parent: &Comment,
    ) -> AppResult<Option<Reply>> {
        let Some(parent) = self.get_comment(parent.id()).await? else {
            debug!("Cannot reply to missing comment");
            return Ok(None);
        };
        if !self
            .permissions
            .can(actor, CommentAction::Post.right(), parent.associated_page())
            .await?
        {
            return Ok(None);
        }

        let Some((page, revision)) = self.create_entity_page(wikitext.to_string(), actor).await? else {
            return Ok(None);
        };
        let id = EntityId::from(page.id);

        let inserted = sqlx::query(
            "INSERT INTO cs_replies (cst_r_reply_page_id, cst_r_comment_page_id) VALUES (?, ?)",
        )
        .bind(id.value())
        .bind(parent.id().value())
        .execute(self.db.primary())
        .await;

        if let Err(e) = inserted {
            error!("Reply page {} created but its metadata row failed: {}", page.id, e);
            return Err(AppError::PartialWrite {
                page_id: page.id,
                reason: e.to_string(),
            });
        }

        if actor.is_registered() {
            self.watches.watch(parent.id(), actor.id).await?;
        }

        let reply = Reply::new(
            EntityMeta::created_by(id, revision.actor.clone(), revision.timestamp),
            parent,
        );
        info!("Inserted reply {} to comment {}", id, reply.parent().id());

        self.events
            .dispatch(LifecycleEvent::new(LifecycleKind::Insert, Entity::Reply(reply.clone()), actor))
            .await;
        Ok(Some(reply))
    }

    #[instrument(skip(self, comment, title, wikitext, actor), fields(comment = %comment.id()))]
    async fn update_comment(
        &self,
        comment: &Comment,
        title: &str,
        wikitext: &str,
        actor: &User,
    ) -> AppResult<bool> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        if !self.user_can(CommentAction::Edit, actor, comment.into()).await? {
            debug!("{} may not edit comment {}", actor.name, comment.id());
            return Ok(false);
        }
        let Some(page) = self.pages.page_by_id(comment.id().into()).await? else {
            return Ok(false);
        };
        let previous = self.get_wikitext(comment.into()).await?.unwrap_or_default();

        let outcome = self
            .pages
            .edit_page(
                &page,
                main_slot(add_annotations(wikitext, title)),
                actor,
                EditFlags::default(),
            )
            .await?;
        if !outcome.is_saved() {
            warn!("Edit of comment {} not saved: {:?}", comment.id(), outcome);
            return Ok(false);
        }

        let updated = sqlx::query(
            "UPDATE cs_comments SET cst_c_comment_title = ? WHERE cst_c_comment_page_id = ?",
        )
        .bind(title)
        .bind(comment.id().value())
        .execute(self.db.primary())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update comment row {}: {}", comment.id(), e)))?;
        if updated.rows_affected() == 0 {
            warn!("Comment {} lost its metadata row during update", comment.id());
            return Ok(false);
        }

        if let Some(fresh) = self.get_comment(comment.id()).await? {
            self.events
                .dispatch(
                    LifecycleEvent::new(LifecycleKind::Update, Entity::Comment(fresh), actor)
                        .with_previous_wikitext(previous),
                )
                .await;
        }
        Ok(true)
    }

    #[instrument(skip(self, reply, wikitext, actor), fields(reply = %reply.id()))]
    async fn update_reply(&self, reply: &Reply, wikitext: &str, actor: &User) -> AppResult<bool> {
        if !self.user_can(CommentAction::Edit, actor, reply.into()).await? {
            debug!("{} may not edit reply {}", actor.name, reply.id());
            return Ok(false);
        }
        let Some(page) = self.pages.page_by_id(reply.id().into()).await? else {
            return Ok(false);
        };
        let previous = self.entity_wikitext(reply.id()).await?.unwrap_or_default();

        let outcome = self
            .pages
            .edit_page(&page, main_slot(wikitext), actor, EditFlags::default())
            .await?;
        if !outcome.is_saved() {
            warn!("Edit of reply {} not saved: {:?}", reply.id(), outcome);
            return Ok(false);
        }

        if let Some(fresh) = self.get_reply(reply.id()).await? {
            self.events
                .dispatch(
                    LifecycleEvent::new(LifecycleKind::Update, Entity::Reply(fresh), actor)
                        .with_previous_wikitext(previous),
                )
                .await;
        }
        Ok(true)
    }

    #[instrument(skip(self, comment, actor), fields(comment = %comment.id()))]
    async fn delete_comment(&self, comment: &Comment, actor: &User) -> AppResult<bool> {
        let id = comment.id();
        let has_row = self
            .row_exists("SELECT 1 FROM cs_comments WHERE cst_c_comment_page_id = ?", id)
            .await?;
        if !has_row && self.pages.page_by_id(id.into()).await?.is_none() {
            return Ok(true);
        }
        if !self.may_delete(id, actor, comment.associated_page()).await? {
            debug!("{} may not delete comment {}", actor.name, id);
            return Ok(false);
        }

        // A comment whose subject page is gone no longer resolves but still owns rows
        let current = self.get_comment(id).await?.unwrap_or_else(|| comment.clone());

        // Reply rows whose pages are gone still block a refusing delete
        let reply_ids = self.reply_ids(id).await?;
        if !reply_ids.is_empty() {
            match self.reply_delete_policy {
                ReplyDeletePolicy::Refuse => {
                    debug!("Refusing to delete comment {} with replies", id);
                    return Ok(false);
                }
                ReplyDeletePolicy::Cascade => {
                    for reply_id in &reply_ids {
                        self.remove_reply(*reply_id, &current, actor).await?;
                    }
                }
            }
        }

        self.delete_entity_page(id, actor).await?;

        sqlx::query("DELETE FROM cs_comments WHERE cst_c_comment_page_id = ?")
            .bind(id.value())
            .execute(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete comment row {}: {}", id, e)))?;
        self.votes.purge(id).await?;
        self.watches.purge(id).await?;

        info!("Deleted comment {} with {} replies", id, reply_ids.len());
        self.events
            .dispatch(LifecycleEvent::new(LifecycleKind::Delete, Entity::Comment(current), actor))
            .await;
        Ok(true)
    }

    #[instrument(skip(self, reply, actor), fields(reply = %reply.id()))]
    async fn delete_reply(&self, reply: &Reply, actor: &User) -> AppResult<bool> {
        let id = reply.id();
        let has_row = self
            .row_exists("SELECT 1 FROM cs_replies WHERE cst_r_reply_page_id = ?", id)
            .await?;
        if !has_row && self.pages.page_by_id(id.into()).await?.is_none() {
            return Ok(true);
        }
        if !self.may_delete(id, actor, reply.associated_page()).await? {
            debug!("{} may not delete reply {}", actor.name, id);
            return Ok(false);
        }

        let parent = self
            .get_comment(reply.parent().id())
            .await?
            .unwrap_or_else(|| reply.parent().clone());
        self.remove_reply(id, &parent, actor).await?;
        info!("Deleted reply {}", id);
        Ok(true)
    }

    async fn user_can(
        &self,
        action: CommentAction,
        user: &User,
        entity: EntityRef<'_>,
    ) -> AppResult<bool> {
        if action == CommentAction::Post {
            return self
                .permissions
                .can(user, action.right(), entity.associated_page())
                .await;
        }

        let Some(page) = self.pages.page_by_id(entity.id().into()).await? else {
            return Ok(false);
        };
        self.may_modify_page(action, user, &page).await
    }

    async fn get_wikitext(&self, entity: EntityRef<'_>) -> AppResult<Option<String>> {
        let text = self.entity_wikitext(entity.id()).await?;
        Ok(match entity {
            EntityRef::Comment(comment) => text.map(|text| remove_annotations(&text, comment.title())),
            EntityRef::Reply(_) => text,
        })
    }

    async fn get_history(&self, entity: EntityRef<'_>) -> AppResult<Vec<HistoryItem>> {
        let page_id = PageId::from(entity.id());
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut next = self.pages.latest_revision(page_id).await?;

        while let Some(revision) = next {
            if revision.page_id != page_id || !seen.insert(revision.id) {
                break;
            }
            let text = revision.main_text().unwrap_or_default();
            let wikitext = match entity {
                EntityRef::Comment(comment) => remove_annotations(text, comment.title()),
                EntityRef::Reply(_) => text.to_string(),
            };
            items.push(HistoryItem {
                revision_id: revision.id,
                timestamp: revision.timestamp,
                actor: revision.actor.clone(),
                wikitext,
            });
            next = match revision.parent_id {
                Some(parent) => self.pages.revision_by_id(parent).await?,
                None => None,
            };
        }
        Ok(items)
    }

    fn history_handler(&self) -> HistoryHandler {
        HistoryHandler::Url {
            template: "index.php?curid={id}&action=history".to_string(),
        }
    }

    fn vote_helper(&self) -> &VoteHelper {
        &self.votes
    }

    fn watch_helper(&self) -> &WatchHelper {
        &self.watches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_round_trip() {
        let wikitext = "Some ''markup''\nwith lines";
        let annotated = add_annotations(wikitext, "Bar");
        assert!(annotated.contains("DISPLAYTITLE"));
        assert_eq!(remove_annotations(&annotated, "Bar"), wikitext);
    }

    #[test]
    fn test_mismatched_title_keeps_directive() {
        let annotated = add_annotations("Foo", "Old title");
        assert_eq!(remove_annotations(&annotated, "New title"), annotated);
    }

    #[test]
    fn test_random_titles_are_ten_hex_chars() {
        let title = random_title();
        assert_eq!(title.len(), 10);
        assert!(title.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
