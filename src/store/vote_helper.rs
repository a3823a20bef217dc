// Vote Helper - up/down votes on comments
// A neutral vote is the absence of a row; storing a 0 never happens.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::debug;

use crate::core::{EntityId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::Database;

/// A user's vote on a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Vote {
    Down,
    Neutral,
    Up,
}

impl Vote {
    pub fn value(self) -> i64 {
        match self {
            Vote::Down => -1,
            Vote::Neutral => 0,
            Vote::Up => 1,
        }
    }

    /// Interpret a stored value, clamping anything out of range to its sign
    pub fn from_stored(value: i64) -> Self {
        match value.signum() {
            1 => Vote::Up,
            -1 => Vote::Down,
            _ => Vote::Neutral,
        }
    }
}

impl From<Vote> for i64 {
    fn from(vote: Vote) -> Self {
        vote.value()
    }
}

impl TryFrom<i64> for Vote {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Vote::Down),
            0 => Ok(Vote::Neutral),
            1 => Ok(Vote::Up),
            other => Err(AppError::Validation(format!("Invalid vote value: {}", other))),
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Vote storage over the `cs_votes` table
#[derive(Debug, Clone)]
pub struct VoteHelper {
    db: Database,
}

impl VoteHelper {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn stored_vote(&self, entity: EntityId, user: UserId) -> AppResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT cst_v_vote FROM cs_votes WHERE cst_v_comment_id = ? AND cst_v_user_id = ?",
        )
        .bind(entity.value())
        .bind(user.value())
        .fetch_optional(self.db.primary())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to read vote on {}: {}", entity, e)))?;
        Ok(row.map(|row| row.get("cst_v_vote")))
    }

    /// Record `vote` for `user`. Succeeds whenever the stored state ends up matching
    /// the requested one, including when nothing had to change.
    pub async fn vote(&self, entity: EntityId, vote: Vote, user: UserId) -> AppResult<bool> {
        let existing = self.stored_vote(entity, user).await?;

        match (existing, vote) {
            (None, Vote::Neutral) => Ok(true),
            (Some(current), requested) if current == requested.value() => Ok(true),
            (Some(_), Vote::Neutral) => {
                sqlx::query("DELETE FROM cs_votes WHERE cst_v_comment_id = ? AND cst_v_user_id = ?")
                    .bind(entity.value())
                    .bind(user.value())
                    .execute(self.db.primary())
                    .await
                    .map_err(|e| AppError::DatabaseError(format!("Failed to retract vote on {}: {}", entity, e)))?;
                debug!("User {} retracted vote on {}", user, entity);
                Ok(true)
            }
            (Some(_), requested) => {
                let result = sqlx::query(
                    "UPDATE cs_votes SET cst_v_vote = ? WHERE cst_v_comment_id = ? AND cst_v_user_id = ?",
                )
                .bind(requested.value())
                .bind(entity.value())
                .bind(user.value())
                .execute(self.db.primary())
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to change vote on {}: {}", entity, e)))?;
                debug!("User {} changed vote on {} to {}", user, entity, requested);
                Ok(result.rows_affected() > 0)
            }
            (None, requested) => {
                // OR REPLACE absorbs a concurrent insert of the same pair
                sqlx::query(
                    "INSERT OR REPLACE INTO cs_votes (cst_v_comment_id, cst_v_user_id, cst_v_vote) VALUES (?, ?, ?)",
                )
                .bind(entity.value())
                .bind(user.value())
                .bind(requested.value())
                .execute(self.db.primary())
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to record vote on {}: {}", entity, e)))?;
                debug!("User {} voted {} on {}", user, requested, entity);
                Ok(true)
            }
        }
    }

    pub async fn get_vote(&self, entity: EntityId, user: UserId) -> AppResult<Vote> {
        Ok(self
            .stored_vote(entity, user)
            .await?
            .map(Vote::from_stored)
            .unwrap_or(Vote::Neutral))
    }

    async fn count_votes(&self, entity: EntityId, value: i64) -> AppResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM cs_votes WHERE cst_v_comment_id = ? AND cst_v_vote = ?",
        )
        .bind(entity.value())
        .bind(value)
        .fetch_one(self.db.replica())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to count votes on {}: {}", entity, e)))?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn num_up_votes(&self, entity: EntityId) -> AppResult<u64> {
        self.count_votes(entity, Vote::Up.value()).await
    }

    pub async fn num_down_votes(&self, entity: EntityId) -> AppResult<u64> {
        self.count_votes(entity, Vote::Down.value()).await
    }

    /// Remove every vote on an entity
    pub async fn purge(&self, entity: EntityId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM cs_votes WHERE cst_v_comment_id = ?")
            .bind(entity.value())
            .execute(self.db.primary())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to purge votes on {}: {}", entity, e)))?;
        Ok(result.rows_affected())
    }
}
