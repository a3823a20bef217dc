// Comment Serializer - builds the client payload for one subject page

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::ordering::{sort_comments, sort_replies, OrderingOptions, RankedComment};
use crate::config::CommentsConfig;
use crate::core::{EntityId, Page, PageId, Timestamp, User, UserId};
use crate::entities::{AbstractComment, Comment, Reply};
use crate::error::AppResult;
use crate::framework::privacy::CommentAction;
use crate::infrastructure::database::ReadConsistency;
use crate::infrastructure::users::UserDirectory;
use crate::store::{CommentStore, HistoryHandler};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorProfile {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    /// `None` for identities without an account
    pub user_page: Option<String>,
}

/// Author profiles resolved during one request. Owned by the serializer and
/// dropped with it.
#[derive(Default)]
pub struct AuthorCache {
    profiles: HashMap<UserId, AuthorProfile>,
}

impl AuthorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn profile(&mut self, users: &dyn UserDirectory, user: &User) -> AppResult<AuthorProfile> {
        if !user.is_registered() {
            return Ok(AuthorProfile {
                id: user.id,
                username: user.name.clone(),
                display_name: user.name.clone(),
                user_page: None,
            });
        }
        if let Some(profile) = self.profiles.get(&user.id) {
            return Ok(profile.clone());
        }

        // Prefer the directory's current name over the one captured with the revision
        let name = match users.user_by_id(user.id).await? {
            Some(current) => current.name,
            None => user.name.clone(),
        };
        let profile = AuthorProfile {
            id: user.id,
            user_page: Some(format!("User:{}", name)),
            display_name: name.clone(),
            username: name,
        };
        self.profiles.insert(user.id, profile.clone());
        Ok(profile)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyPayload {
    pub id: EntityId,
    pub parent_id: EntityId,
    pub wikitext: String,
    pub author: AuthorProfile,
    pub last_editor: AuthorProfile,
    pub created: Timestamp,
    pub modified: Option<Timestamp>,
    pub can_edit: bool,
    pub can_delete: bool,
    pub history_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentPayload {
    pub id: EntityId,
    pub title: String,
    pub block: Option<String>,
    pub wikitext: String,
    pub author: AuthorProfile,
    pub last_editor: AuthorProfile,
    pub created: Timestamp,
    pub modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_votes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_votes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_vote: Option<i64>,
    pub watching: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub history_url: Option<String>,
    pub replies: Vec<ReplyPayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentStreamPayload {
    pub page_id: PageId,
    pub newest_first: bool,
    pub voting: bool,
    pub history: HistoryHandler,
    pub comments: Vec<CommentPayload>,
}

pub struct CommentSerializer {
    store: Arc<dyn CommentStore>,
    users: Arc<dyn UserDirectory>,
    options: OrderingOptions,
    authors: AuthorCache,
}

impl CommentSerializer {
    pub fn new(store: Arc<dyn CommentStore>, users: Arc<dyn UserDirectory>, config: &CommentsConfig) -> Self {
        Self {
            store,
            users,
            options: OrderingOptions {
                newest_first: config.newest_first,
                voting: config.enable_voting,
            },
            authors: AuthorCache::new(),
        }
    }

    pub fn authors(&self) -> &AuthorCache {
        &self.authors
    }

    /// Ordered comments of `page` as seen by `viewer`. `block` limits the result
    /// to one named block.
    pub async fn stream_for(
        &mut self,
        page: &Page,
        viewer: &User,
        block: Option<&str>,
    ) -> AppResult<CommentStreamPayload> {
        let comments = self.store.get_associated_comments(page).await?;

        let mut ranked = Vec::with_capacity(comments.len());
        for comment in comments {
            if block.is_some() && comment.block_name() != block {
                continue;
            }
            let (up, down) = if self.options.voting {
                (
                    self.store.get_num_up_votes(&comment).await?,
                    self.store.get_num_down_votes(&comment).await?,
                )
            } else {
                (0, 0)
            };
            ranked.push(RankedComment::new(comment, up, down));
        }
        sort_comments(&mut ranked, self.options);

        let history = self.store.history_handler();
        let mut payloads = Vec::with_capacity(ranked.len());
        for entry in ranked {
            payloads.push(self.comment_payload(entry, viewer, &history).await?);
        }
        debug!("Serialized {} comments for page {}", payloads.len(), page.id);

        Ok(CommentStreamPayload {
            page_id: page.id,
            newest_first: self.options.newest_first,
            voting: self.options.voting,
            history,
            comments: payloads,
        })
    }

    async fn comment_payload(
        &mut self,
        entry: RankedComment,
        viewer: &User,
        history: &HistoryHandler,
    ) -> AppResult<CommentPayload> {
        let comment: Comment = entry.comment;
        let store = self.store.clone();

        let mut replies = store.get_replies(&comment).await?;
        sort_replies(&mut replies);
        let mut reply_payloads = Vec::with_capacity(replies.len());
        for reply in &replies {
            reply_payloads.push(self.reply_payload(reply, viewer, history).await?);
        }

        let viewer_vote = if self.options.voting && viewer.is_registered() {
            Some(store.get_vote(&comment, viewer).await?.value())
        } else {
            None
        };
        let watching = viewer.is_registered()
            && store.is_watching(&comment, viewer, ReadConsistency::Replica).await?;

        Ok(CommentPayload {
            id: comment.id(),
            title: comment.title().to_string(),
            block: comment.block_name().map(str::to_string),
            wikitext: store.get_wikitext((&comment).into()).await?.unwrap_or_default(),
            author: self.authors.profile(self.users.as_ref(), comment.author()).await?,
            last_editor: self.authors.profile(self.users.as_ref(), comment.last_editor()).await?,
            created: comment.creation_date(),
            modified: comment.modification_date(),
            up_votes: self.options.voting.then_some(entry.up_votes),
            down_votes: self.options.voting.then_some(entry.down_votes),
            viewer_vote,
            watching,
            can_edit: store.user_can(CommentAction::Edit, viewer, (&comment).into()).await?,
            can_delete: store.user_can(CommentAction::Delete, viewer, (&comment).into()).await?,
            history_url: history.url_for(comment.id()),
            replies: reply_payloads,
        })
    }

    async fn reply_payload(
        &mut self,
        reply: &Reply,
        viewer: &User,
        history: &HistoryHandler,
    ) -> AppResult<ReplyPayload> {
        let store = self.store.clone();
        Ok(ReplyPayload {
            id: reply.id(),
            parent_id: reply.parent().id(),
            wikitext: store.get_wikitext(reply.into()).await?.unwrap_or_default(),
            author: self.authors.profile(self.users.as_ref(), reply.author()).await?,
            last_editor: self.authors.profile(self.users.as_ref(), reply.last_editor()).await?,
            created: reply.creation_date(),
            modified: reply.modification_date(),
            can_edit: store.user_can(CommentAction::Edit, viewer, reply.into()).await?,
            can_delete: store.user_can(CommentAction::Delete, viewer, reply.into()).await?,
            history_url: history.url_for(reply.id()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::Database;
    use crate::infrastructure::users::SqliteUserDirectory;

    #[tokio::test]
    async fn test_author_cache_resolves_once_per_user() {
        let db = Database::in_memory().await.unwrap();
        let users = SqliteUserDirectory::new(&db);
        let alice = users.create_user("Alice", &[]).await.unwrap();

        let mut cache = AuthorCache::new();
        let first = cache.profile(&users, &alice).await.unwrap();
        assert_eq!(first.user_page.as_deref(), Some("User:Alice"));

        // A later rename is not seen within the same request
        sqlx::query("UPDATE user SET user_name = 'Alicia' WHERE user_id = ?")
            .bind(alice.id.value())
            .execute(db.primary())
            .await
            .unwrap();
        assert_eq!(cache.profile(&users, &alice).await.unwrap(), first);
        assert_eq!(cache.len(), 1);

        let anonymous = cache.profile(&users, &User::unregistered("127.0.0.1")).await.unwrap();
        assert!(anonymous.user_page.is_none());
        assert_eq!(cache.len(), 1);
    }
}
