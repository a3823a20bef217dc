// Privacy - the host permission oracle and the comment actions it guards

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Page, PageId, User};
use crate::error::AppResult;

/// Group every identity belongs to
pub const GROUP_ALL: &str = "*";
/// Group every registered identity belongs to
pub const GROUP_USER: &str = "user";

/// Mutations guarded by the stores' `user_can`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentAction {
    Post,
    Edit,
    Delete,
}

impl CommentAction {
    /// Host right required to perform the action at all
    pub fn right(self) -> &'static str {
        match self {
            CommentAction::Post => "cs-comment",
            CommentAction::Edit => "edit",
            CommentAction::Delete => "delete",
        }
    }

    /// Host right that lets a non-author perform the action
    pub fn moderator_right(self) -> Option<&'static str> {
        match self {
            CommentAction::Post => None,
            CommentAction::Edit => Some("cs-moderator-edit"),
            CommentAction::Delete => Some("cs-moderator-delete"),
        }
    }
}

/// Host permission check: may `actor` exercise `right` on `page`
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn can(&self, actor: &User, right: &str, page: &Page) -> AppResult<bool>;
}

/// Rights granted per group, with optional per-page protection
#[derive(Debug, Clone, Default)]
pub struct GroupPermissions {
    grants: HashMap<String, BTreeSet<String>>,
    /// Pages whose non-read rights are limited to one group
    protections: HashMap<PageId, String>,
}

impl GroupPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock grants: registered users comment, edit and delete; moderators
    /// may additionally act on other people's comments.
    pub fn wiki_defaults(moderator_group: &str) -> Self {
        Self::new()
            .grant(GROUP_ALL, &["read"])
            .grant(GROUP_USER, &["cs-comment", "edit", "delete"])
            .grant(moderator_group, &["cs-moderator-edit", "cs-moderator-delete"])
    }

    pub fn grant(mut self, group: &str, rights: &[&str]) -> Self {
        self.grants
            .entry(group.to_string())
            .or_default()
            .extend(rights.iter().map(|right| right.to_string()));
        self
    }

    pub fn protect(mut self, page: PageId, group: &str) -> Self {
        self.protections.insert(page, group.to_string());
        self
    }

    fn groups_of<'a>(&self, actor: &'a User) -> Vec<&'a str> {
        let mut groups = vec![GROUP_ALL];
        if actor.is_registered() {
            groups.push(GROUP_USER);
        }
        groups.extend(actor.groups.iter().map(String::as_str));
        groups
    }

    pub fn has_right(&self, actor: &User, right: &str) -> bool {
        self.groups_of(actor).into_iter().any(|group| {
            self.grants
                .get(group)
                .map(|rights| rights.contains(right))
                .unwrap_or(false)
        })
    }
}

#[async_trait]
impl PermissionOracle for GroupPermissions {
    async fn can(&self, actor: &User, right: &str, page: &Page) -> AppResult<bool> {
        if right != "read" {
            if let Some(group) = self.protections.get(&page.id) {
                if !actor.in_group(group) {
                    return Ok(false);
                }
            }
        }
        Ok(self.has_right(actor, right))
    }
}
