// Talk Page Content - the JSON document kept in a talk page's comment slot
//
// One object per subject page, keyed by entity id. Every write replaces the
// whole document; validation happens on read and a malformed document reads as
// empty.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::{EntityId, RevisionId, Timestamp};
use crate::entities::EntityKind;
use crate::error::AppResult;
use crate::infrastructure::page_store::Revision;

/// Slot role holding the comment document
pub const COMMENT_STREAMS_SLOT: &str = "commentstreams";

const REQUIRED_KEYS: [&str; 5] = ["type", "author", "created", "modified", "wikitext"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Author user name, resolved through the user directory on read
    pub author: String,
    pub created: Timestamp,
    pub modified: Option<Timestamp>,
    pub wikitext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_editor: Option<String>,
    /// Talk page revision this record was edited on top of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_revision: Option<RevisionId>,
}

impl StoredRecord {
    pub fn comment(
        author: &str,
        created: Timestamp,
        wikitext: &str,
        title: &str,
        block: Option<&str>,
    ) -> Self {
        Self {
            kind: EntityKind::Comment,
            author: author.to_string(),
            created,
            modified: None,
            wikitext: wikitext.to_string(),
            title: Some(title.to_string()),
            block: block.map(str::to_string),
            parent: None,
            last_editor: None,
            base_revision: None,
        }
    }

    pub fn reply(author: &str, created: Timestamp, wikitext: &str, parent: EntityId) -> Self {
        Self {
            kind: EntityKind::Reply,
            author: author.to_string(),
            created,
            modified: None,
            wikitext: wikitext.to_string(),
            title: None,
            block: None,
            parent: Some(parent),
            last_editor: None,
            base_revision: None,
        }
    }

    /// Name of whoever touched the record last
    pub fn last_editor_name(&self) -> &str {
        self.last_editor.as_deref().unwrap_or(&self.author)
    }

    /// `modified` when edited, otherwise `created`
    pub fn touched(&self) -> Timestamp {
        self.modified.unwrap_or(self.created)
    }

    fn is_consistent(&self) -> bool {
        match self.kind {
            EntityKind::Comment => self.title.is_some(),
            EntityKind::Reply => self.parent.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TalkPageContent {
    records: BTreeMap<EntityId, StoredRecord>,
}

impl TalkPageContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and decode a document. Anything but an object of integer keys
    /// mapping to complete records is rejected.
    pub fn parse(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut records = BTreeMap::new();

        for (key, entry) in object {
            let id = key.parse::<i64>().ok()?;
            let fields = entry.as_object()?;
            if !REQUIRED_KEYS.iter().all(|required| fields.contains_key(*required)) {
                return None;
            }
            let record: StoredRecord = serde_json::from_value(entry.clone()).ok()?;
            if !record.is_consistent() {
                return None;
            }
            records.insert(EntityId(id), record);
        }
        Some(Self { records })
    }

    pub fn parse_str(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Self::parse(&value)
    }

    /// Document of a talk page revision. A missing slot is an empty document;
    /// a malformed one is logged and read as empty.
    pub fn from_revision(revision: &Revision) -> Self {
        match revision.slot(COMMENT_STREAMS_SLOT) {
            None => Self::new(),
            Some(text) if text.trim().is_empty() => Self::new(),
            Some(text) => Self::parse_str(text).unwrap_or_else(|| {
                warn!(
                    "Ignoring malformed comment document in revision {} of page {}",
                    revision.id, revision.page_id
                );
                Self::new()
            }),
        }
    }

    pub fn to_json(&self) -> AppResult<String> {
        let object: serde_json::Map<String, Value> = self
            .records
            .iter()
            .map(|(id, record)| Ok::<_, serde_json::Error>((id.to_string(), serde_json::to_value(record)?)))
            .collect::<Result<_, _>>()?;
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    pub fn get(&self, id: EntityId) -> Option<&StoredRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn insert(&mut self, id: EntityId, record: StoredRecord) -> Option<StoredRecord> {
        self.records.insert(id, record)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<StoredRecord> {
        self.records.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &StoredRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn comment_ids(&self) -> Vec<EntityId> {
        self.iter()
            .filter(|(_, record)| record.kind == EntityKind::Comment)
            .map(|(id, _)| id)
            .collect()
    }

    /// Ids of the replies to `parent`, in id order
    pub fn replies_of(&self, parent: EntityId) -> Vec<EntityId> {
        self.iter()
            .filter(|(_, record)| record.kind == EntityKind::Reply && record.parent == Some(parent))
            .map(|(id, _)| id)
            .collect()
    }
}
