// Talk Page Store - every comment of a subject page in one JSON document
//
// The document lives in the `commentstreams` slot of the subject's talk page.
// Entity ids are minted in `cs_associated_pages`, which also maps each id back
// to its subject page. Every mutation reads the latest document, changes one
// record and saves the whole document as a new talk page revision based on
// the revision it read.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, info, instrument, warn};

use super::talk_page_cache::{TalkPageCache, TalkPageSnapshot};
use super::talk_page_content::{StoredRecord, TalkPageContent, COMMENT_STREAMS_SLOT};
use super::{CommentStore, HistoryHandler, HistoryItem, HostServices, VoteHelper, WatchHelper};
use crate::config::{Config, ReplyDeletePolicy};
use crate::core::{current_timestamp, EntityId, Page, PageId, RevisionId, User};
use crate::entities::{AbstractComment, Comment, Entity, EntityKind, EntityMeta, EntityRef, Reply};
use crate::error::{AppError, AppResult};
use crate::framework::hooks::{LifecycleEvent, LifecycleEvents, LifecycleKind};
use crate::framework::privacy::CommentAction;
use crate::infrastructure::database::Database;
use crate::infrastructure::page_store::{EditFlags, PageStore, Revision, SlotContent, MAIN_SLOT};
use crate::infrastructure::users::UserDirectory;

pub struct TalkPageStore {
    db: Database,
    pages: Arc<dyn PageStore>,
    users: Arc<dyn UserDirectory>,
    events: Arc<LifecycleEvents>,
    votes: VoteHelper,
    watches: WatchHelper,
    cache: TalkPageCache,
    moderator_group: String,
    reply_delete_policy: ReplyDeletePolicy,
}

impl TalkPageStore {
    pub fn new(db: Database, host: HostServices, config: &Config) -> Self {
        Self {
            votes: VoteHelper::new(db.clone()),
            watches: WatchHelper::new(db.clone(), host.users.clone()),
            db,
            pages: host.pages,
            users: host.users,
            events: host.events,
            cache: TalkPageCache::new(config.cache.capacity),
            moderator_group: config.comments.moderator_group.clone(),
            reply_delete_policy: config.comments.reply_delete_policy,
        }
    }

    /// Drop every cached document, mapping and record
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Current document of a subject page's talk page. `fresh` bypasses the cache;
    /// writers always read fresh.
    async fn load_snapshot(&self, subject: &Page, fresh: bool) -> AppResult<Arc<TalkPageSnapshot>> {
        if !fresh {
            if let Some(snapshot) = self.cache.snapshot(subject.id).await {
                return Ok(snapshot);
            }
        }

        let Some(talk_title) = subject.title.talk_page() else {
            return Ok(Arc::new(TalkPageSnapshot::empty()));
        };
        let snapshot = match self.pages.page_by_title(&talk_title).await? {
            None => TalkPageSnapshot::empty(),
            Some(talk_page) => match self.pages.latest_revision(talk_page.id).await? {
                Some(revision) => TalkPageSnapshot {
                    content: TalkPageContent::from_revision(&revision),
                    latest_revision: Some(revision.id),
                    talk_page: Some(talk_page),
                },
                None => TalkPageSnapshot {
                    talk_page: Some(talk_page),
                    latest_revision: None,
                    content: TalkPageContent::new(),
                },
            },
        };

        let snapshot = Arc::new(snapshot);
        self.cache.put_snapshot(subject.id, snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Save `content` as the next revision of the talk page `before` was read from.
    /// `None` means the write was rejected (conflict, missing page) and nothing changed.
    async fn write_snapshot(
        &self,
        subject: &Page,
        before: &TalkPageSnapshot,
        content: TalkPageContent,
        actor: &User,
        summary: &str,
    ) -> AppResult<Option<Revision>> {
        let mut slots = SlotContent::new();
        slots.insert(COMMENT_STREAMS_SLOT.to_string(), content.to_json()?);

        let outcome = match &before.talk_page {
            Some(talk_page) => {
                let flags = EditFlags {
                    base_revision: before.latest_revision,
                    summary: Some(summary.to_string()),
                };
                self.pages.edit_page(talk_page, slots, actor, flags).await?
            }
            None => {
                let Some(talk_title) = subject.title.talk_page() else {
                    return Ok(None);
                };
                slots.insert(MAIN_SLOT.to_string(), String::new());
                self.pages.create_page(&talk_title, slots, actor).await?
            }
        };

        match outcome.into_saved() {
            Some((talk_page, revision)) => {
                let snapshot = TalkPageSnapshot {
                    talk_page: Some(talk_page),
                    latest_revision: Some(revision.id),
                    content,
                };
                self.cache.put_snapshot(subject.id, Arc::new(snapshot)).await;
                Ok(Some(revision))
            }
            None => {
                warn!("Talk page write for {} was not saved", subject.title);
                self.cache.forget_page(subject.id).await;
                Ok(None)
            }
        }
    }

    async fn mint_id(&self, subject: &Page) -> AppResult<EntityId> {
        let result = sqlx::query("INSERT INTO cs_associated_pages (cst_ap_page_id) VALUES (?)")
            .bind(subject.id.value())
            .execute(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to mint entity id for page {}: {}", subject.id, e)))?;
        let id = EntityId(result.last_insert_rowid());
        self.cache.put_subject(id, subject.id).await;
        Ok(id)
    }

    /// Undo `mint_id` after a failed write
    async fn release_id(&self, id: EntityId) -> AppResult<()> {
        self.cache.forget_entity(id).await;
        self.delete_association(id).await
    }

    async fn delete_association(&self, id: EntityId) -> AppResult<()> {
        sqlx::query("DELETE FROM cs_associated_pages WHERE cst_ap_comment_id = ?")
            .bind(id.value())
            .execute(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete association of {}: {}", id, e)))?;
        Ok(())
    }

    async fn associated_ids(&self, subject: PageId) -> AppResult<HashSet<EntityId>> {
        let rows = sqlx::query("SELECT cst_ap_comment_id FROM cs_associated_pages WHERE cst_ap_page_id = ?")
            .bind(subject.value())
            .fetch_all(self.db.replica())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list entities of page {}: {}", subject, e)))?;
        Ok(rows.into_iter().map(|row| EntityId(row.get("cst_ap_comment_id"))).collect())
    }

    /// Subject page id an entity was minted for, read from the database
    async fn association_of(&self, id: EntityId) -> AppResult<Option<PageId>> {
        let row = sqlx::query("SELECT cst_ap_page_id FROM cs_associated_pages WHERE cst_ap_comment_id = ?")
            .bind(id.value())
            .fetch_optional(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to resolve subject of {}: {}", id, e)))?;
        Ok(row.map(|row| PageId(row.get("cst_ap_page_id"))))
    }

    async fn subject_page_of(&self, id: EntityId) -> AppResult<Option<Page>> {
        let subject_id = match self.cache.subject_of(id).await {
            Some(subject_id) => subject_id,
            None => {
                let Some(subject_id) = self.association_of(id).await? else {
                    return Ok(None);
                };
                self.cache.put_subject(id, subject_id).await;
                subject_id
            }
        };
        self.pages.page_by_id(subject_id).await
    }

    /// Subject page for a delete. A deleted subject is stood in for by the
    /// caller's handle when it names the same page, so its talk page can still
    /// be found by title.
    async fn locate_subject(&self, subject_id: PageId, handle: &Page) -> AppResult<Option<Page>> {
        if let Some(page) = self.pages.page_by_id(subject_id).await? {
            return Ok(Some(page));
        }
        Ok((handle.id == subject_id).then(|| handle.clone()))
    }

    /// Authors may change their own records; moderators may change anything,
    /// including entities whose record is gone.
    fn may_modify(&self, user: &User, record: Option<&StoredRecord>) -> bool {
        record.is_some_and(|record| record.author == user.name) || user.in_group(&self.moderator_group)
    }

    /// Record of `id` on `subject`, re-reading the talk page once if the cached
    /// document does not have it
    async fn find_record(&self, subject: &Page, id: EntityId) -> AppResult<Option<StoredRecord>> {
        if let Some(record) = self.cache.record_on(subject.id, id).await {
            return Ok(Some(record));
        }
        let snapshot = self.load_snapshot(subject, false).await?;
        if let Some(record) = snapshot.content.get(id) {
            return Ok(Some(record.clone()));
        }
        let snapshot = self.load_snapshot(subject, true).await?;
        Ok(snapshot.content.get(id).cloned())
    }

    async fn resolve_user(&self, name: &str) -> AppResult<User> {
        Ok(self
            .users
            .user_by_name(name)
            .await?
            .unwrap_or_else(|| User::unregistered(name)))
    }

    async fn meta_of(&self, id: EntityId, record: &StoredRecord) -> AppResult<EntityMeta> {
        let author = self.resolve_user(&record.author).await?;
        let last_editor = match &record.last_editor {
            Some(name) if name != &record.author => self.resolve_user(name).await?,
            _ => author.clone(),
        };
        Ok(EntityMeta {
            id,
            author,
            last_editor,
            created: record.created,
            modified: record.modified,
        })
    }

    async fn comment_from(&self, id: EntityId, record: &StoredRecord, subject: Page) -> AppResult<Option<Comment>> {
        if record.kind != EntityKind::Comment {
            return Ok(None);
        }
        let Some(title) = record.title.clone() else {
            return Ok(None);
        };
        let meta = self.meta_of(id, record).await?;
        Ok(Some(Comment::new(meta, title, record.block.clone(), subject)))
    }

    async fn reply_from(&self, id: EntityId, record: &StoredRecord, parent: Comment) -> AppResult<Option<Reply>> {
        if record.kind != EntityKind::Reply || record.parent != Some(parent.id()) {
            return Ok(None);
        }
        let meta = self.meta_of(id, record).await?;
        Ok(Some(Reply::new(meta, parent)))
    }

    /// Earliest revision in the parent chain of `revision` that already held
    /// `record` unchanged, i.e. the edit that wrote this state
    async fn revision_that_wrote(
        &self,
        revision: &Revision,
        id: EntityId,
        record: &StoredRecord,
    ) -> AppResult<RevisionId> {
        let mut writer = revision.id;
        let mut seen = HashSet::from([revision.id]);
        let mut next = revision.parent_id;

        while let Some(parent_id) = next {
            if !seen.insert(parent_id) {
                break;
            }
            let Some(parent) = self.pages.revision_by_id(parent_id).await? else {
                break;
            };
            if parent.page_id != revision.page_id {
                break;
            }
            let unchanged = parent
                .slot(COMMENT_STREAMS_SLOT)
                .and_then(TalkPageContent::parse_str)
                .is_some_and(|content| content.get(id) == Some(record));
            if !unchanged {
                break;
            }
            writer = parent.id;
            next = parent.parent_id;
        }
        Ok(writer)
    }

    /// Mint new ids for every record on the talk page of `subject` and re-key
    /// the document. Used after an import brought in ids from another install.
    /// Returns the old to new id mapping.
    #[instrument(skip(self, subject, actor), fields(subject = %subject.id))]
    pub async fn reindex_page(&self, subject: &Page, actor: &User) -> AppResult<BTreeMap<EntityId, EntityId>> {
        let before = self.load_snapshot(subject, true).await?;
        let mut mapping = BTreeMap::new();
        if before.content.is_empty() {
            return Ok(mapping);
        }

        let mut content = TalkPageContent::new();
        for old_id in before.content.comment_ids() {
            if let Some(record) = before.content.get(old_id) {
                let new_id = self.mint_id(subject).await?;
                mapping.insert(old_id, new_id);
                content.insert(new_id, record.clone());
            }
        }
        for (old_id, record) in before.content.iter() {
            if record.kind != EntityKind::Reply {
                continue;
            }
            let Some(new_parent) = record.parent.and_then(|parent| mapping.get(&parent).copied()) else {
                warn!("Dropping reply {} whose parent is not on page {}", old_id, subject.id);
                continue;
            };
            let new_id = self.mint_id(subject).await?;
            mapping.insert(old_id, new_id);
            let mut record = record.clone();
            record.parent = Some(new_parent);
            content.insert(new_id, record);
        }

        let written = self
            .write_snapshot(subject, &before, content, actor, "Reindex comments")
            .await;
        match written {
            Ok(Some(_)) => {}
            Ok(None) => {
                for new_id in mapping.values() {
                    self.release_id(*new_id).await?;
                }
                return Err(AppError::StorageConflict(format!(
                    "talk page of {} changed while reindexing",
                    subject.title
                )));
            }
            Err(e) => {
                for new_id in mapping.values() {
                    self.release_id(*new_id).await?;
                }
                return Err(e);
            }
        }

        // Imported ids may coincide with freshly minted ones
        let minted: HashSet<EntityId> = mapping.values().copied().collect();
        for old_id in mapping.keys().filter(|old_id| !minted.contains(old_id)) {
            sqlx::query("DELETE FROM cs_associated_pages WHERE cst_ap_comment_id = ? AND cst_ap_page_id = ?")
                .bind(old_id.value())
                .bind(subject.id.value())
                .execute(self.db.primary())
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to drop old association {}: {}", old_id, e)))?;
            self.cache.forget_entity(*old_id).await;
        }
        for (old_id, new_id) in &mapping {
            self.cache.put_subject(*new_id, subject.id).await;
            debug!("Reindexed {} as {}", old_id, new_id);
        }

        info!("Reindexed {} entities on page {}", mapping.len(), subject.id);
        Ok(mapping)
    }
}

#[async_trait]
impl CommentStore for TalkPageStore {
    async fn get_comment(&self, id: EntityId) -> AppResult<Option<Comment>> {
        let Some(subject) = self.subject_page_of(id).await? else {
            return Ok(None);
        };
        let Some(record) = self.find_record(&subject, id).await? else {
            debug!("Comment {} not found on the talk page of {}", id, subject.title);
            return Ok(None);
        };
        self.comment_from(id, &record, subject).await
    }

    async fn get_reply(&self, id: EntityId) -> AppResult<Option<Reply>> {
        let Some(subject) = self.subject_page_of(id).await? else {
            return Ok(None);
        };
        let Some(record) = self.find_record(&subject, id).await? else {
            return Ok(None);
        };
        let Some(parent_id) = record.parent else {
            return Ok(None);
        };
        let Some(parent) = self.get_comment(parent_id).await? else {
            debug!("Reply {} has no resolvable parent {}", id, parent_id);
            return Ok(None);
        };
        self.reply_from(id, &record, parent).await
    }

    async fn get_associated_comments(&self, page: &Page) -> AppResult<Vec<Comment>> {
        let snapshot = self.load_snapshot(page, false).await?;
        let known = self.associated_ids(page.id).await?;

        let mut comments = Vec::new();
        for id in snapshot.content.comment_ids() {
            if !known.contains(&id) {
                debug!("Skipping comment {} with no association to page {}", id, page.id);
                continue;
            }
            if let Some(record) = snapshot.content.get(id) {
                if let Some(comment) = self.comment_from(id, record, page.clone()).await? {
                    comments.push(comment);
                }
            }
        }
        Ok(comments)
    }

    async fn get_replies(&self, comment: &Comment) -> AppResult<Vec<Reply>> {
        let snapshot = self.load_snapshot(comment.associated_page(), false).await?;
        let mut replies = Vec::new();
        for id in snapshot.content.replies_of(comment.id()) {
            if let Some(record) = snapshot.content.get(id) {
                if let Some(reply) = self.reply_from(id, record, comment.clone()).await? {
                    replies.push(reply);
                }
            }
        }
        Ok(replies)
    }

    async fn get_num_replies(&self, comment: &Comment) -> AppResult<usize> {
        let snapshot = self.load_snapshot(comment.associated_page(), false).await?;
        Ok(snapshot.content.replies_of(comment.id()).len())
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
        if title.is_empty() || !actor.is_registered() {
            return Ok(None);
        }
        let Some(subject) = self.pages.page_by_id(associated_page_id).await? else {
            debug!("Cannot comment on missing page {}", associated_page_id);
            return Ok(None);
        };
        if subject.title.talk_page().is_none() {
            debug!("Page {} has no talk page to hold comments", subject.title);
            return Ok(None);
        }

        let before = self.load_snapshot(&subject, true).await?;
        let id = self.mint_id(&subject).await?;
        let created = current_timestamp();
        let mut content = before.content.clone();
        content.insert(id, StoredRecord::comment(&actor.name, created, wikitext, title, block_name));

        match self.write_snapshot(&subject, &before, content, actor, "New comment").await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.release_id(id).await?;
                return Ok(None);
            }
            Err(e) => {
                self.release_id(id).await?;
                return Err(e);
            }
        }

        self.watches.watch(id, actor.id).await?;

        let comment = Comment::new(
            EntityMeta::created_by(id, actor.clone(), created),
            title,
            block_name.map(str::to_string),
            subject,
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
        if !actor.is_registered() {
            return Ok(None);
        }
        let Some(parent) = self.get_comment(parent.id()).await? else {
            debug!("Cannot reply to missing comment");
            return Ok(None);
        };
        let subject = parent.associated_page().clone();

        let before = self.load_snapshot(&subject, true).await?;
        if !before.content.contains(parent.id()) {
            return Ok(None);
        }
        let id = self.mint_id(&subject).await?;
        let created = current_timestamp();
        let mut content = before.content.clone();
        content.insert(id, StoredRecord::reply(&actor.name, created, wikitext, parent.id()));

        match self.write_snapshot(&subject, &before, content, actor, "New reply").await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.release_id(id).await?;
                return Ok(None);
            }
            Err(e) => {
                self.release_id(id).await?;
                return Err(e);
            }
        }

        self.watches.watch(parent.id(), actor.id).await?;

        let reply = Reply::new(EntityMeta::created_by(id, actor.clone(), created), parent);
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

        let subject = comment.associated_page();
        let before = self.load_snapshot(subject, true).await?;
        let Some(mut record) = before.content.get(comment.id()).cloned() else {
            return Ok(false);
        };
        let previous = std::mem::replace(&mut record.wikitext, wikitext.to_string());
        record.title = Some(title.to_string());
        record.modified = Some(current_timestamp());
        record.last_editor = Some(actor.name.clone());
        record.base_revision = before.latest_revision;

        let mut content = before.content.clone();
        content.insert(comment.id(), record);
        if self
            .write_snapshot(subject, &before, content, actor, "Edit comment")
            .await?
            .is_none()
        {
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

        let subject = reply.associated_page();
        let before = self.load_snapshot(subject, true).await?;
        let Some(mut record) = before.content.get(reply.id()).cloned() else {
            return Ok(false);
        };
        let previous = std::mem::replace(&mut record.wikitext, wikitext.to_string());
        record.modified = Some(current_timestamp());
        record.last_editor = Some(actor.name.clone());
        record.base_revision = before.latest_revision;

        let mut content = before.content.clone();
        content.insert(reply.id(), record);
        if self
            .write_snapshot(subject, &before, content, actor, "Edit reply")
            .await?
            .is_none()
        {
            return Ok(false);
        }

        if actor.is_registered() {
            self.watches.watch(reply.parent().id(), actor.id).await?;
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
        let Some(subject_id) = self.association_of(id).await? else {
            return Ok(true);
        };
        let subject = self.locate_subject(subject_id, comment.associated_page()).await?;
        let before = match &subject {
            Some(subject) => self.load_snapshot(subject, true).await?,
            None => Arc::new(TalkPageSnapshot::empty()),
        };
        let record = before
            .content
            .get(id)
            .filter(|record| record.kind == EntityKind::Comment)
            .cloned();
        if !self.may_modify(actor, record.as_ref()) {
            debug!("{} may not delete comment {}", actor.name, id);
            return Ok(false);
        }

        let reply_ids = before.content.replies_of(id);
        if !reply_ids.is_empty() && self.reply_delete_policy == ReplyDeletePolicy::Refuse {
            debug!("Refusing to delete comment {} with replies", id);
            return Ok(false);
        }

        // A comment whose subject page is gone no longer resolves but still owns rows
        let current = self.get_comment(id).await?.unwrap_or_else(|| comment.clone());

        let mut replies = Vec::with_capacity(reply_ids.len());
        if let (Some(_), Some(subject)) = (&record, &subject) {
            let mut content = before.content.clone();
            for reply_id in &reply_ids {
                if let Some(reply_record) = content.remove(*reply_id) {
                    if let Some(reply) = self.reply_from(*reply_id, &reply_record, current.clone()).await? {
                        replies.push(reply);
                    }
                }
            }
            content.remove(id);

            if self
                .write_snapshot(subject, &before, content, actor, "Delete comment")
                .await?
                .is_none()
            {
                return Ok(false);
            }
        }

        for reply_id in &reply_ids {
            self.delete_association(*reply_id).await?;
            self.cache.forget_entity(*reply_id).await;
        }
        self.delete_association(id).await?;
        self.cache.forget_entity(id).await;
        self.votes.purge(id).await?;
        self.watches.purge(id).await?;

        for reply in replies {
            self.events
                .dispatch(LifecycleEvent::new(LifecycleKind::Delete, Entity::Reply(reply), actor))
                .await;
        }
        info!("Deleted comment {} with {} replies", id, reply_ids.len());
        self.events
            .dispatch(LifecycleEvent::new(LifecycleKind::Delete, Entity::Comment(current), actor))
            .await;
        Ok(true)
    }

    #[instrument(skip(self, reply, actor), fields(reply = %reply.id()))]
    async fn delete_reply(&self, reply: &Reply, actor: &User) -> AppResult<bool> {
        let id = reply.id();
        let Some(subject_id) = self.association_of(id).await? else {
            return Ok(true);
        };
        let subject = self.locate_subject(subject_id, reply.associated_page()).await?;
        let before = match &subject {
            Some(subject) => self.load_snapshot(subject, true).await?,
            None => Arc::new(TalkPageSnapshot::empty()),
        };
        let record = before
            .content
            .get(id)
            .filter(|record| record.kind == EntityKind::Reply)
            .cloned();
        if !self.may_modify(actor, record.as_ref()) {
            debug!("{} may not delete reply {}", actor.name, id);
            return Ok(false);
        }

        let current = self.get_reply(id).await?.unwrap_or_else(|| reply.clone());

        if let (Some(_), Some(subject)) = (&record, &subject) {
            let mut content = before.content.clone();
            content.remove(id);
            if self
                .write_snapshot(subject, &before, content, actor, "Delete reply")
                .await?
                .is_none()
            {
                return Ok(false);
            }
        }

        self.delete_association(id).await?;
        self.cache.forget_entity(id).await;

        info!("Deleted reply {}", id);
        self.events
            .dispatch(LifecycleEvent::new(LifecycleKind::Delete, Entity::Reply(current), actor))
            .await;
        Ok(true)
    }

    async fn user_can(
        &self,
        action: CommentAction,
        user: &User,
        entity: EntityRef<'_>,
    ) -> AppResult<bool> {
        if action == CommentAction::Post {
            return Ok(user.is_registered());
        }
        let Some(record) = self.find_record(entity.associated_page(), entity.id()).await? else {
            return Ok(false);
        };
        Ok(self.may_modify(user, Some(&record)))
    }

    async fn get_wikitext(&self, entity: EntityRef<'_>) -> AppResult<Option<String>> {
        Ok(self
            .find_record(entity.associated_page(), entity.id())
            .await?
            .map(|record| record.wikitext))
    }

    async fn get_history(&self, entity: EntityRef<'_>) -> AppResult<Vec<HistoryItem>> {
        let Some(talk_title) = entity.associated_page().title.talk_page() else {
            return Ok(Vec::new());
        };
        let Some(talk_page) = self.pages.page_by_title(&talk_title).await? else {
            return Ok(Vec::new());
        };

        let id = entity.id();
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut next = self.pages.latest_revision(talk_page.id).await?;

        while let Some(revision) = next {
            if revision.page_id != talk_page.id || !seen.insert(revision.id) {
                break;
            }
            let Some(content) = revision.slot(COMMENT_STREAMS_SLOT).and_then(TalkPageContent::parse_str) else {
                break;
            };
            let Some(record) = content.get(id) else {
                break;
            };
            items.push(HistoryItem {
                revision_id: self.revision_that_wrote(&revision, id, record).await?,
                timestamp: record.touched(),
                actor: self.resolve_user(record.last_editor_name()).await?,
                wikitext: record.wikitext.clone(),
            });
            next = match record.base_revision {
                Some(base) => self.pages.revision_by_id(base).await?,
                None => None,
            };
        }
        Ok(items)
    }

    fn history_handler(&self) -> HistoryHandler {
        HistoryHandler::Callback {
            name: "commentstreams.talkPageHistory".to_string(),
        }
    }

    fn vote_helper(&self) -> &VoteHelper {
        &self.votes
    }

    fn watch_helper(&self) -> &WatchHelper {
        &self.watches
    }
}
