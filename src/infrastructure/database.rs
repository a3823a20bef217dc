// Database - SQLite connection pools and schema for the comment side tables
// The host page/revision/user tables live in the same database so the
// administrative listing can join against them.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// Which connection a read should use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConsistency {
    /// Read from the primary; sees every committed write
    Primary,
    /// Read from the replica; may lag behind recent writes
    Replica,
}

/// Primary and (optional) replica pools shared by every store component
#[derive(Debug, Clone)]
pub struct Database {
    primary: SqlitePool,
    replica: SqlitePool,
}

const HOST_SCHEMA: &[(&str, &str)] = &[
    (
        "page",
        r#"
        CREATE TABLE IF NOT EXISTS page (
            page_id INTEGER PRIMARY KEY AUTOINCREMENT,
            page_namespace INTEGER NOT NULL,
            page_title TEXT NOT NULL,
            page_latest INTEGER NOT NULL DEFAULT 0,
            UNIQUE (page_namespace, page_title)
        )
        "#,
    ),
    (
        "revision",
        r#"
        CREATE TABLE IF NOT EXISTS revision (
            rev_id INTEGER PRIMARY KEY AUTOINCREMENT,
            rev_page INTEGER NOT NULL,
            rev_parent_id INTEGER,
            rev_actor INTEGER NOT NULL,
            rev_actor_name TEXT NOT NULL,
            rev_timestamp INTEGER NOT NULL
        )
        "#,
    ),
    (
        "revision index",
        "CREATE INDEX IF NOT EXISTS rev_page_id ON revision(rev_page, rev_id)",
    ),
    (
        "slots",
        r#"
        CREATE TABLE IF NOT EXISTS slots (
            slot_revision_id INTEGER NOT NULL,
            slot_role TEXT NOT NULL,
            content_text TEXT NOT NULL,
            PRIMARY KEY (slot_revision_id, slot_role)
        )
        "#,
    ),
    (
        "deletion_log",
        r#"
        CREATE TABLE IF NOT EXISTS deletion_log (
            log_id INTEGER PRIMARY KEY AUTOINCREMENT,
            log_page INTEGER NOT NULL,
            log_namespace INTEGER NOT NULL,
            log_title TEXT NOT NULL,
            log_actor INTEGER NOT NULL,
            log_suppressed INTEGER NOT NULL DEFAULT 0,
            log_timestamp INTEGER NOT NULL
        )
        "#,
    ),
    (
        "user",
        r#"
        CREATE TABLE IF NOT EXISTS user (
            user_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_name TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "user_groups",
        r#"
        CREATE TABLE IF NOT EXISTS user_groups (
            ug_user INTEGER NOT NULL,
            ug_group TEXT NOT NULL,
            PRIMARY KEY (ug_user, ug_group)
        )
        "#,
    ),
];

const COMMENT_SCHEMA: &[(&str, &str)] = &[
    (
        "cs_comments",
        r#"
        CREATE TABLE IF NOT EXISTS cs_comments (
            cst_c_comment_page_id INTEGER PRIMARY KEY,
            cst_c_assoc_page_id INTEGER NOT NULL,
            cst_c_comment_title TEXT NOT NULL,
            cst_c_block_name TEXT
        )
        "#,
    ),
    (
        "cs_comments index",
        "CREATE INDEX IF NOT EXISTS cst_c_assoc_page ON cs_comments(cst_c_assoc_page_id)",
    ),
    (
        "cs_replies",
        r#"
        CREATE TABLE IF NOT EXISTS cs_replies (
            cst_r_reply_page_id INTEGER PRIMARY KEY,
            cst_r_comment_page_id INTEGER NOT NULL
        )
        "#,
    ),
    (
        "cs_replies index",
        "CREATE INDEX IF NOT EXISTS cst_r_comment_page ON cs_replies(cst_r_comment_page_id)",
    ),
    (
        // AUTOINCREMENT keeps SQLite from handing out the id of a deleted row again
        "cs_associated_pages",
        r#"
        CREATE TABLE IF NOT EXISTS cs_associated_pages (
            cst_ap_comment_id INTEGER PRIMARY KEY AUTOINCREMENT,
            cst_ap_page_id INTEGER NOT NULL
        )
        "#,
    ),
    (
        "cs_associated_pages index",
        "CREATE INDEX IF NOT EXISTS cst_ap_page ON cs_associated_pages(cst_ap_page_id)",
    ),
    (
        "cs_votes",
        r#"
        CREATE TABLE IF NOT EXISTS cs_votes (
            cst_v_comment_id INTEGER NOT NULL,
            cst_v_user_id INTEGER NOT NULL,
            cst_v_vote INTEGER NOT NULL,
            PRIMARY KEY (cst_v_comment_id, cst_v_user_id)
        )
        "#,
    ),
    (
        "cs_watchlist",
        r#"
        CREATE TABLE IF NOT EXISTS cs_watchlist (
            cst_wl_comment_id INTEGER NOT NULL,
            cst_wl_user_id INTEGER NOT NULL,
            PRIMARY KEY (cst_wl_comment_id, cst_wl_user_id)
        )
        "#,
    ),
];

impl Database {
    pub fn new(primary: SqlitePool, replica: Option<SqlitePool>) -> Self {
        let replica = replica.unwrap_or_else(|| primary.clone());
        Self { primary, replica }
    }

    /// Single-connection in-memory database. One connection is required because
    /// every new SQLite memory connection opens a separate empty database.
    pub async fn in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to connect to in-memory SQLite: {}", e))
            })?;

        let db = Self::new(pool, None);
        db.initialize().await?;
        Ok(db)
    }

    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        if config.url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let primary = Self::open_pool(&config.url, config.max_connections).await?;
        let replica = match &config.replica_url {
            Some(url) => Some(Self::open_pool(url, config.max_connections).await?),
            None => None,
        };

        info!("Connected comment database at {}", config.url);
        let db = Self::new(primary, replica);
        db.initialize().await?;
        Ok(db)
    }

    async fn open_pool(url: &str, max_connections: u32) -> AppResult<SqlitePool> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::ConfigurationError(format!("Invalid database URL {}: {}", url, e)))?
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to {}: {}", url, e)))
    }

    /// Create host and comment tables if they do not exist yet
    pub async fn initialize(&self) -> AppResult<()> {
        for (name, ddl) in HOST_SCHEMA.iter().chain(COMMENT_SCHEMA.iter()) {
            sqlx::query(ddl).execute(&self.primary).await.map_err(|e| {
                AppError::DatabaseError(format!("Failed to create {}: {}", name, e))
            })?;
            debug!("Ensured schema object {}", name);
        }
        Ok(())
    }

    pub fn primary(&self) -> &SqlitePool {
        &self.primary
    }

    pub fn replica(&self) -> &SqlitePool {
        &self.replica
    }

    pub fn pool(&self, consistency: ReadConsistency) -> &SqlitePool {
        match consistency {
            ReadConsistency::Primary => &self.primary,
            ReadConsistency::Replica => &self.replica,
        }
    }

    /// Health check to verify database connectivity
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.primary)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_initialize_is_repeatable() {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db.health_check().await.unwrap();

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name LIKE 'cs_%'",
        )
        .fetch_one(db.primary())
        .await
        .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 5);
    }

    #[tokio::test]
    async fn test_replica_defaults_to_primary() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query("INSERT INTO cs_watchlist (cst_wl_comment_id, cst_wl_user_id) VALUES (1, 2)")
            .execute(db.pool(ReadConsistency::Primary))
            .await
            .unwrap();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM cs_watchlist")
            .fetch_one(db.pool(ReadConsistency::Replica))
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
    }
}
