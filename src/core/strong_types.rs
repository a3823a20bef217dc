// Strong Types - newtypes for the ids that flow between the stores and the host
// Keeps page ids, revision ids, entity ids and user ids from being mixed up

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Timestamps are millisecond precision UTC instants.
pub type Timestamp = DateTime<Utc>;

/// Current time truncated to whole milliseconds so it survives a database round trip.
pub fn current_timestamp() -> Timestamp {
    let millis = Utc::now().timestamp_millis();
    timestamp_from_millis(millis).unwrap_or_else(Utc::now)
}

pub fn timestamp_from_millis(millis: i64) -> Option<Timestamp> {
    Utc.timestamp_millis_opt(millis).single()
}

pub fn timestamp_to_millis(ts: &Timestamp) -> i64 {
    ts.timestamp_millis()
}

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw ID value
            pub fn value(self) -> i64 {
                self.0
            }

            pub fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_newtype!(
    /// Identifier of a comment or reply. A page id for the namespace backend,
    /// a minted synthetic id for the talk page backend.
    EntityId
);
id_newtype!(
    /// Host page identifier
    PageId
);
id_newtype!(
    /// Host revision identifier
    RevisionId
);
id_newtype!(
    /// Host user identifier; 0 is an unregistered identity
    UserId
);

impl From<PageId> for EntityId {
    fn from(id: PageId) -> Self {
        Self(id.0)
    }
}

impl From<EntityId> for PageId {
    fn from(id: EntityId) -> Self {
        Self(id.0)
    }
}

/// Host namespace number. Even numbers are subject namespaces, odd ones their talk namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub i32);

impl Namespace {
    pub const MAIN: Namespace = Namespace(0);
    pub const TALK: Namespace = Namespace(1);
    pub const USER: Namespace = Namespace(2);
    pub const COMMENT_STREAMS: Namespace = Namespace(844);

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn is_talk(self) -> bool {
        self.0 % 2 != 0
    }

    /// The talk namespace paired with this one. Talk namespaces have no talk namespace.
    pub fn talk(self) -> Option<Namespace> {
        if self.0 < 0 || self.is_talk() {
            None
        } else {
            Some(Namespace(self.0 + 1))
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static ILLEGAL_TITLE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#<>\[\]|{}\x00-\x1f\x7f]").expect("static regex"));

/// A validated page title: namespace plus title text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageTitle {
    namespace: Namespace,
    text: String,
}

impl PageTitle {
    pub const MAX_LENGTH: usize = 255;

    /// Create a title, normalising underscores to spaces and trimming
    pub fn new(namespace: Namespace, text: &str) -> AppResult<Self> {
        let text = text.replace('_', " ").trim().to_string();
        if text.is_empty() {
            return Err(AppError::Validation("Page title cannot be empty".to_string()));
        }
        if text.len() > Self::MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "Page title exceeds {} bytes",
                Self::MAX_LENGTH
            )));
        }
        if ILLEGAL_TITLE_CHARS.is_match(&text) {
            return Err(AppError::Validation(format!(
                "Page title contains illegal characters: {}",
                text
            )));
        }
        Ok(Self { namespace, text })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Title of the associated talk page, if this title can have one
    pub fn talk_page(&self) -> Option<PageTitle> {
        self.namespace.talk().map(|namespace| PageTitle {
            namespace,
            text: self.text.clone(),
        })
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.text)
    }
}

/// Handle to an existing host page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub title: PageTitle,
}

impl Page {
    pub fn new(id: PageId, title: PageTitle) -> Self {
        Self { id, title }
    }
}

/// A user identity as resolved by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            groups: BTreeSet::new(),
        }
    }

    /// An identity that carries a name but no account
    pub fn unregistered(name: impl Into<String>) -> Self {
        Self::new(UserId(0), name)
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_valid()
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Same account, ignoring group membership snapshots
    pub fn same_identity(&self, other: &User) -> bool {
        if self.is_registered() || other.is_registered() {
            self.id == other.id
        } else {
            self.name == other.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_talk_namespace_pairing() {
        assert_eq!(Namespace::MAIN.talk(), Some(Namespace::TALK));
        assert_eq!(Namespace::TALK.talk(), None);
        assert_eq!(Namespace::COMMENT_STREAMS.talk(), Some(Namespace(845)));
    }

    #[test]
    fn test_page_title_validation() {
        let title = PageTitle::new(Namespace::MAIN, "Main_Page").unwrap();
        assert_eq!(title.text(), "Main Page");
        assert_eq!(title.talk_page().unwrap().namespace(), Namespace::TALK);

        assert!(PageTitle::new(Namespace::MAIN, "  ").is_err());
        assert!(PageTitle::new(Namespace::MAIN, "Foo{bar}").is_err());
        assert!(PageTitle::new(Namespace::MAIN, &"x".repeat(300)).is_err());
    }

    #[test]
    fn test_timestamp_round_trip_is_millisecond_exact() {
        let now = current_timestamp();
        let millis = timestamp_to_millis(&now);
        assert_eq!(timestamp_from_millis(millis), Some(now));
    }

    #[test]
    fn test_identity_comparison() {
        let alice = User::new(UserId(3), "Alice");
        let moderator_view = User::new(UserId(3), "Alice").with_groups(["csmoderator"]);
        assert!(alice.same_identity(&moderator_view));
        assert!(!alice.same_identity(&User::new(UserId(4), "Bob")));
        assert!(User::unregistered("1.2.3.4").same_identity(&User::unregistered("1.2.3.4")));
        assert!(!User::unregistered("x").is_registered());
    }
}
