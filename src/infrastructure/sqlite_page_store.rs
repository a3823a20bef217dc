use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};

use crate::core::{
    current_timestamp, timestamp_from_millis, timestamp_to_millis, Namespace, Page, PageId,
    PageTitle, RevisionId, User, UserId,
};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::Database;
use crate::infrastructure::page_store::{
    EditFlags, PageStore, Revision, SlotContent, WriteOutcome,
};

/// SQLite implementation of the host page store: pages, revisions and named slots
pub struct SqlitePageStore {
    pool: SqlitePool,
}

const REVISION_COLUMNS: &str =
    "rev_id, rev_page, rev_parent_id, rev_actor, rev_actor_name, rev_timestamp";

impl SqlitePageStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.primary().clone(),
        }
    }

    fn page_from_row(row: &SqliteRow) -> AppResult<Page> {
        let namespace = Namespace(row.get::<i64, _>("page_namespace") as i32);
        let title = PageTitle::new(namespace, row.get::<String, _>("page_title").as_str())?;
        Ok(Page::new(PageId(row.get("page_id")), title))
    }

    async fn revision_from_row(&self, row: SqliteRow) -> AppResult<Revision> {
        let id = RevisionId(row.get("rev_id"));
        let millis: i64 = row.get("rev_timestamp");
        let timestamp = timestamp_from_millis(millis).ok_or_else(|| {
            AppError::DeserializationError(format!("Revision {} has invalid timestamp {}", id, millis))
        })?;

        let slot_rows = sqlx::query(
            "SELECT slot_role, content_text FROM slots WHERE slot_revision_id = ?",
        )
        .bind(id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to load slots of revision {}: {}", id, e)))?;

        let slots = slot_rows
            .into_iter()
            .map(|slot| (slot.get::<String, _>("slot_role"), slot.get::<String, _>("content_text")))
            .collect();

        Ok(Revision {
            id,
            page_id: PageId(row.get("rev_page")),
            parent_id: row.get::<Option<i64>, _>("rev_parent_id").map(RevisionId),
            actor: User::new(UserId(row.get("rev_actor")), row.get::<String, _>("rev_actor_name")),
            timestamp,
            slots,
        })
    }

    /// Insert a revision row and its slots inside an open transaction
    async fn insert_revision(
        tx: &mut Transaction<'_, Sqlite>,
        page_id: PageId,
        parent_id: Option<RevisionId>,
        actor: &User,
        slots: &SlotContent,
    ) -> AppResult<Revision> {
        let timestamp = current_timestamp();
        let result = sqlx::query(
            "INSERT INTO revision (rev_page, rev_parent_id, rev_actor, rev_actor_name, rev_timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(page_id.value())
        .bind(parent_id.map(RevisionId::value))
        .bind(actor.id.value())
        .bind(&actor.name)
        .bind(timestamp_to_millis(&timestamp))
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert revision for page {}: {}", page_id, e)))?;
        let rev_id = RevisionId(result.last_insert_rowid());

        for (role, text) in slots {
            sqlx::query(
                "INSERT INTO slots (slot_revision_id, slot_role, content_text) VALUES (?, ?, ?)",
            )
            .bind(rev_id.value())
            .bind(role)
            .bind(text)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert slot {} of revision {}: {}", role, rev_id, e)))?;
        }

        sqlx::query("UPDATE page SET page_latest = ? WHERE page_id = ?")
            .bind(rev_id.value())
            .bind(page_id.value())
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to advance page {}: {}", page_id, e)))?;

        Ok(Revision {
            id: rev_id,
            page_id,
            parent_id,
            actor: User::new(actor.id, actor.name.clone()),
            timestamp,
            slots: slots.clone(),
        })
    }

    async fn fetch_revision(&self, sql: &str, key: i64) -> AppResult<Option<Revision>> {
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch revision for {}: {}", key, e)))?;

        match row {
            Some(row) => Ok(Some(self.revision_from_row(row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PageStore for SqlitePageStore {
    async fn page_by_id(&self, id: PageId) -> AppResult<Option<Page>> {
        let row = sqlx::query(
            "SELECT page_id, page_namespace, page_title FROM page WHERE page_id = ?",
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to get page {}: {}", id, e)))?;

        row.as_ref().map(Self::page_from_row).transpose()
    }

    async fn page_by_title(&self, title: &PageTitle) -> AppResult<Option<Page>> {
        let row = sqlx::query(
            "SELECT page_id, page_namespace, page_title FROM page WHERE page_namespace = ? AND page_title = ?",
        )
        .bind(title.namespace().value())
        .bind(title.text())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to get page {}: {}", title, e)))?;

        row.as_ref().map(Self::page_from_row).transpose()
    }

    async fn create_page(
        &self,
        title: &PageTitle,
        content: SlotContent,
        actor: &User,
    ) -> AppResult<WriteOutcome> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to begin transaction: {}", e))
        })?;

        let inserted = sqlx::query(
            "INSERT INTO page (page_namespace, page_title, page_latest) VALUES (?, ?, 0)",
        )
        .bind(title.namespace().value())
        .bind(title.text())
        .execute(&mut *tx)
        .await;

        let page_id = match inserted {
            Ok(result) => PageId(result.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!("Page {} already exists", title);
                return Ok(WriteOutcome::AlreadyExists);
            }
            Err(e) => {
                return Err(AppError::DatabaseError(format!(
                    "Failed to create page {}: {}",
                    title, e
                )))
            }
        };

        let revision = Self::insert_revision(&mut tx, page_id, None, actor, &content).await?;
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to commit creation of {}: {}", title, e))
        })?;

        info!("Created page {} ({}) with revision {}", title, page_id, revision.id);
        Ok(WriteOutcome::Saved {
            page: Page::new(page_id, title.clone()),
            revision,
        })
    }

    async fn edit_page(
        &self,
        page: &Page,
        content: SlotContent,
        actor: &User,
        flags: EditFlags,
    ) -> AppResult<WriteOutcome> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to begin transaction: {}", e))
        })?;

        let latest = sqlx::query("SELECT page_latest FROM page WHERE page_id = ?")
            .bind(page.id.value())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to read page {}: {}", page.id, e)))?
            .map(|row| RevisionId(row.get("page_latest")));

        let latest = match latest {
            Some(latest) if latest.is_valid() => latest,
            _ => return Ok(WriteOutcome::Missing),
        };

        if let Some(base) = flags.base_revision {
            if base != latest {
                debug!(
                    "Edit conflict on page {}: based on {}, latest is {}",
                    page.id, base, latest
                );
                return Ok(WriteOutcome::Conflict);
            }
        }

        // Unspecified slots carry over from the latest revision
        let inherited = sqlx::query(
            "SELECT slot_role, content_text FROM slots WHERE slot_revision_id = ?",
        )
        .bind(latest.value())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to load slots of revision {}: {}", latest, e)))?;

        let mut slots: SlotContent = inherited
            .into_iter()
            .map(|row| (row.get::<String, _>("slot_role"), row.get::<String, _>("content_text")))
            .collect();
        slots.extend(content);

        let revision = Self::insert_revision(&mut tx, page.id, Some(latest), actor, &slots).await?;
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to commit edit of page {}: {}", page.id, e))
        })?;

        debug!(
            "Saved revision {} of page {}{}",
            revision.id,
            page.id,
            flags.summary.map(|s| format!(" ({})", s)).unwrap_or_default()
        );
        Ok(WriteOutcome::Saved {
            page: page.clone(),
            revision,
        })
    }

    async fn delete_page(&self, page: &Page, actor: &User, suppress: bool) -> AppResult<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to begin transaction: {}", e))
        })?;

        let removed = sqlx::query("DELETE FROM page WHERE page_id = ?")
            .bind(page.id.value())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete page {}: {}", page.id, e)))?;

        if removed.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "DELETE FROM slots WHERE slot_revision_id IN (SELECT rev_id FROM revision WHERE rev_page = ?)",
        )
        .bind(page.id.value())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to delete slots of page {}: {}", page.id, e)))?;

        sqlx::query("DELETE FROM revision WHERE rev_page = ?")
            .bind(page.id.value())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete revisions of page {}: {}", page.id, e)))?;

        sqlx::query(
            "INSERT INTO deletion_log (log_page, log_namespace, log_title, log_actor, log_suppressed, log_timestamp) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(page.id.value())
        .bind(page.title.namespace().value())
        .bind(page.title.text())
        .bind(actor.id.value())
        .bind(suppress)
        .bind(timestamp_to_millis(&current_timestamp()))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to log deletion of page {}: {}", page.id, e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to commit deletion of page {}: {}", page.id, e))
        })?;

        info!("Deleted page {} (suppressed: {})", page.title, suppress);
        Ok(true)
    }

    async fn first_revision(&self, page_id: PageId) -> AppResult<Option<Revision>> {
        let sql = format!(
            "SELECT {} FROM revision WHERE rev_page = ? ORDER BY rev_id ASC LIMIT 1",
            REVISION_COLUMNS
        );
        self.fetch_revision(&sql, page_id.value()).await
    }

    async fn latest_revision(&self, page_id: PageId) -> AppResult<Option<Revision>> {
        let sql = format!(
            "SELECT {} FROM revision JOIN page ON page.page_latest = revision.rev_id WHERE page.page_id = ?",
            REVISION_COLUMNS
        );
        self.fetch_revision(&sql, page_id.value()).await
    }

    async fn revision_by_id(&self, id: RevisionId) -> AppResult<Option<Revision>> {
        let sql = format!("SELECT {} FROM revision WHERE rev_id = ?", REVISION_COLUMNS);
        self.fetch_revision(&sql, id.value()).await
    }

    async fn pages_in_namespace(&self, namespace: Namespace) -> AppResult<Vec<Page>> {
        let rows = sqlx::query(
            "SELECT page_id, page_namespace, page_title FROM page WHERE page_namespace = ? ORDER BY page_id",
        )
        .bind(namespace.value())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list namespace {}: {}", namespace, e)))?;

        rows.iter().map(Self::page_from_row).collect()
    }
}
