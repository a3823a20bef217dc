// Watch Helper - per-user watch list membership of comments

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::Row;
use tracing::{debug, warn};

use crate::core::{EntityId, User, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{Database, ReadConsistency};
use crate::infrastructure::users::UserDirectory;

/// Watch list storage over the `cs_watchlist` table
#[derive(Clone)]
pub struct WatchHelper {
    db: Database,
    users: Arc<dyn UserDirectory>,
}

impl WatchHelper {
    pub fn new(db: Database, users: Arc<dyn UserDirectory>) -> Self {
        Self { db, users }
    }

    /// Add `user` to the watchers of `entity`; watching twice is a no-op
    pub async fn watch(&self, entity: EntityId, user: UserId) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO cs_watchlist (cst_wl_comment_id, cst_wl_user_id) VALUES (?, ?)",
        )
        .bind(entity.value())
        .bind(user.value())
        .execute(self.db.primary())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to watch {}: {}", entity, e)))?;

        if result.rows_affected() > 0 {
            debug!("User {} now watches {}", user, entity);
        }
        Ok(true)
    }

    pub async fn unwatch(&self, entity: EntityId, user: UserId) -> AppResult<bool> {
        sqlx::query("DELETE FROM cs_watchlist WHERE cst_wl_comment_id = ? AND cst_wl_user_id = ?")
            .bind(entity.value())
            .bind(user.value())
            .execute(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to unwatch {}: {}", entity, e)))?;
        Ok(true)
    }

    /// Callers that just wrote should read with `ReadConsistency::Primary`
    pub async fn is_watching(
        &self,
        entity: EntityId,
        user: UserId,
        consistency: ReadConsistency,
    ) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM cs_watchlist WHERE cst_wl_comment_id = ? AND cst_wl_user_id = ?",
        )
        .bind(entity.value())
        .bind(user.value())
        .fetch_optional(self.db.pool(consistency))
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to check watch on {}: {}", entity, e)))?;
        Ok(row.is_some())
    }

    /// Watchers of `entity` keyed by user id. Rows whose user no longer resolves are skipped.
    pub async fn get_watchers(&self, entity: EntityId) -> AppResult<BTreeMap<UserId, User>> {
        let rows = sqlx::query("SELECT cst_wl_user_id FROM cs_watchlist WHERE cst_wl_comment_id = ?")
            .bind(entity.value())
            .fetch_all(self.db.replica())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list watchers of {}: {}", entity, e)))?;

        let mut watchers = BTreeMap::new();
        for row in rows {
            let user_id = UserId(row.get("cst_wl_user_id"));
            match self.users.user_by_id(user_id).await? {
                Some(user) => {
                    watchers.insert(user.id, user);
                }
                None => warn!("Skipping watcher {} of {}: user does not exist", user_id, entity),
            }
        }
        Ok(watchers)
    }

    /// Remove every watch row of an entity
    pub async fn purge(&self, entity: EntityId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM cs_watchlist WHERE cst_wl_comment_id = ?")
            .bind(entity.value())
            .execute(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to purge watchers of {}: {}", entity, e)))?;
        Ok(result.rows_affected())
    }
}
