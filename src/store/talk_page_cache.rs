// Talk Page Cache - in-process read-through caches for the talk page backend
//
// Never authoritative: a miss always re-reads the revision store, and every
// write path updates or drops the affected entries.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::talk_page_content::{StoredRecord, TalkPageContent};
use crate::core::{EntityId, Page, PageId, RevisionId};
use crate::infrastructure::cache::Cache;

/// Parsed state of one subject page's talk page at one revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkPageSnapshot {
    /// `None` until the first comment creates the talk page
    pub talk_page: Option<Page>,
    pub latest_revision: Option<RevisionId>,
    pub content: TalkPageContent,
}

impl TalkPageSnapshot {
    pub fn empty() -> Self {
        Self {
            talk_page: None,
            latest_revision: None,
            content: TalkPageContent::new(),
        }
    }
}

struct Caches {
    snapshots: Cache<PageId, Arc<TalkPageSnapshot>>,
    subjects: Cache<EntityId, PageId>,
    records: Cache<EntityId, StoredRecord>,
}

pub struct TalkPageCache {
    inner: Mutex<Caches>,
}

impl TalkPageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Caches {
                snapshots: Cache::new(capacity),
                subjects: Cache::new(capacity),
                records: Cache::new(capacity),
            }),
        }
    }

    /// Snapshot keyed by the subject page id
    pub async fn snapshot(&self, subject: PageId) -> Option<Arc<TalkPageSnapshot>> {
        self.inner.lock().await.snapshots.get(&subject).cloned()
    }

    pub async fn put_snapshot(&self, subject: PageId, snapshot: Arc<TalkPageSnapshot>) {
        let mut caches = self.inner.lock().await;
        // Subjects come only from the association table; imported documents
        // can carry ids that belong elsewhere
        for (id, record) in snapshot.content.iter() {
            caches.records.insert(id, record.clone());
        }
        caches.snapshots.insert(subject, snapshot);
    }

    pub async fn subject_of(&self, id: EntityId) -> Option<PageId> {
        self.inner.lock().await.subjects.get(&id).copied()
    }

    pub async fn put_subject(&self, id: EntityId, subject: PageId) {
        self.inner.lock().await.subjects.insert(id, subject);
    }

    /// Last known record of `id`, if `id` is known to belong to `subject`
    pub async fn record_on(&self, subject: PageId, id: EntityId) -> Option<StoredRecord> {
        let mut caches = self.inner.lock().await;
        if caches.subjects.get(&id).copied() != Some(subject) {
            return None;
        }
        caches.records.get(&id).cloned()
    }

    pub async fn forget_entity(&self, id: EntityId) {
        let mut caches = self.inner.lock().await;
        caches.subjects.remove(&id);
        caches.records.remove(&id);
    }

    /// Drop the snapshot of a subject page and every record it held
    pub async fn forget_page(&self, subject: PageId) {
        let mut caches = self.inner.lock().await;
        if let Some(snapshot) = caches.snapshots.remove(&subject) {
            for (id, _) in snapshot.content.iter() {
                caches.records.remove(&id);
            }
        }
    }

    pub async fn clear(&self) {
        let mut caches = self.inner.lock().await;
        caches.snapshots.clear();
        caches.subjects.clear();
        caches.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::current_timestamp;

    fn snapshot_with(id: EntityId) -> Arc<TalkPageSnapshot> {
        let mut content = TalkPageContent::new();
        content.insert(id, StoredRecord::comment("Alice", current_timestamp(), "Foo", "Bar", None));
        Arc::new(TalkPageSnapshot {
            talk_page: None,
            latest_revision: Some(RevisionId(3)),
            content,
        })
    }

    #[tokio::test]
    async fn test_records_need_a_known_subject() {
        let cache = TalkPageCache::new(8);
        cache.put_snapshot(PageId(1), snapshot_with(EntityId(5))).await;
        assert!(cache.record_on(PageId(1), EntityId(5)).await.is_none());

        cache.put_subject(EntityId(5), PageId(1)).await;
        assert_eq!(
            cache.record_on(PageId(1), EntityId(5)).await.map(|r| r.wikitext),
            Some("Foo".to_string())
        );
        assert!(cache.record_on(PageId(2), EntityId(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_forget_page_drops_records_but_keeps_subjects() {
        let cache = TalkPageCache::new(8);
        cache.put_snapshot(PageId(1), snapshot_with(EntityId(5))).await;
        cache.put_subject(EntityId(5), PageId(1)).await;
        cache.forget_page(PageId(1)).await;

        assert!(cache.snapshot(PageId(1)).await.is_none());
        assert!(cache.record_on(PageId(1), EntityId(5)).await.is_none());
        assert_eq!(cache.subject_of(EntityId(5)).await, Some(PageId(1)));

        cache.clear().await;
        assert!(cache.subject_of(EntityId(5)).await.is_none());
    }
}
