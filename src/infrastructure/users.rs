// User Directory - resolves stored user ids and names back to identities

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::info;

use crate::core::{User, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::Database;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> AppResult<Option<User>>;
    async fn user_by_name(&self, name: &str) -> AppResult<Option<User>>;
}

/// User directory over the host `user` and `user_groups` tables
pub struct SqliteUserDirectory {
    pool: SqlitePool,
}

impl SqliteUserDirectory {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.primary().clone(),
        }
    }

    /// Register an account with the given group memberships
    pub async fn create_user(&self, name: &str, groups: &[&str]) -> AppResult<User> {
        let result = sqlx::query("INSERT INTO user (user_name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create user {}: {}", name, e)))?;
        let id = UserId(result.last_insert_rowid());

        for group in groups {
            self.add_group(id, group).await?;
        }

        info!("Created user {} ({})", name, id);
        Ok(User::new(id, name).with_groups(groups.iter().copied()))
    }

    pub async fn add_group(&self, id: UserId, group: &str) -> AppResult<()> {
        sqlx::query("INSERT OR IGNORE INTO user_groups (ug_user, ug_group) VALUES (?, ?)")
            .bind(id.value())
            .bind(group)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to add user {} to {}: {}", id, group, e)))?;
        Ok(())
    }

    /// Remove an account; its rows elsewhere are left behind as orphans
    pub async fn delete_user(&self, id: UserId) -> AppResult<bool> {
        sqlx::query("DELETE FROM user_groups WHERE ug_user = ?")
            .bind(id.value())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete groups of user {}: {}", id, e)))?;
        let result = sqlx::query("DELETE FROM user WHERE user_id = ?")
            .bind(id.value())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete user {}: {}", id, e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_groups(&self, user: User) -> AppResult<User> {
        let rows = sqlx::query("SELECT ug_group FROM user_groups WHERE ug_user = ?")
            .bind(user.id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load groups of user {}: {}", user.id, e)))?;
        let groups: Vec<String> = rows.into_iter().map(|row| row.get("ug_group")).collect();
        Ok(user.with_groups(groups))
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn user_by_id(&self, id: UserId) -> AppResult<Option<User>> {
        if !id.is_valid() {
            return Ok(None);
        }
        let row = sqlx::query("SELECT user_id, user_name FROM user WHERE user_id = ?")
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get user {}: {}", id, e)))?;

        match row {
            Some(row) => {
                let user = User::new(UserId(row.get("user_id")), row.get::<String, _>("user_name"));
                Ok(Some(self.load_groups(user).await?))
            }
            None => Ok(None),
        }
    }

    async fn user_by_name(&self, name: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT user_id, user_name FROM user WHERE user_name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get user {}: {}", name, e)))?;

        match row {
            Some(row) => {
                let user = User::new(UserId(row.get("user_id")), row.get::<String, _>("user_name"));
                Ok(Some(self.load_groups(user).await?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_by_id_and_name() {
        let db = Database::in_memory().await.unwrap();
        let users = SqliteUserDirectory::new(&db);
        let created = users.create_user("Alice", &["csmoderator"]).await.unwrap();

        let by_id = users.user_by_id(created.id).await.unwrap().unwrap();
        let by_name = users.user_by_name("Alice").await.unwrap().unwrap();
        assert_eq!(by_id, by_name);
        assert!(by_id.in_group("csmoderator"));

        assert!(users.user_by_name("Nobody").await.unwrap().is_none());
        assert!(users.user_by_id(UserId(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_user_no_longer_resolves() {
        let db = Database::in_memory().await.unwrap();
        let users = SqliteUserDirectory::new(&db);
        let bob = users.create_user("Bob", &[]).await.unwrap();
        assert!(users.delete_user(bob.id).await.unwrap());
        assert!(users.user_by_id(bob.id).await.unwrap().is_none());
    }
}
