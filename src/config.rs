use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::core::Namespace;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub comments: CommentsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Eventually consistent read connection; reads fall back to the primary when unset
    pub replica_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentsConfig {
    pub backend: StoreBackend,
    pub newest_first: bool,
    pub enable_voting: bool,
    pub reply_delete_policy: ReplyDeletePolicy,
    pub moderator_group: String,
    pub namespace: Namespace,
    pub max_title_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Which persistence strategy backs the comment store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One page per comment or reply plus relational metadata
    Namespace,
    /// One JSON document per talk page
    TalkPage,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "namespace" | "namespacepage" => Ok(StoreBackend::Namespace),
            "talkpage" | "talk" => Ok(StoreBackend::TalkPage),
            other => Err(AppError::ConfigurationError(format!(
                "Unknown comment store backend: {}",
                other
            ))),
        }
    }
}

/// What deleting a comment that still has replies does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyDeletePolicy {
    /// Delete the replies first, then the comment
    Cascade,
    /// Leave everything in place and report failure
    Refuse,
}

impl FromStr for ReplyDeletePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cascade" => Ok(ReplyDeletePolicy::Cascade),
            "refuse" => Ok(ReplyDeletePolicy::Refuse),
            other => Err(AppError::ConfigurationError(format!(
                "Unknown reply delete policy: {}",
                other
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                replica_url: None,
                max_connections: 1,
            },
            cache: CacheConfig { capacity: 1000 },
            comments: CommentsConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Namespace,
            newest_first: false,
            enable_voting: false,
            reply_delete_policy: ReplyDeletePolicy::Cascade,
            moderator_group: "csmoderator".to_string(),
            namespace: Namespace::COMMENT_STREAMS,
            max_title_attempts: 16,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = CommentsConfig::default();
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/comment_streams.db".to_string()),
                replica_url: env::var("DATABASE_REPLICA_URL").ok(),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            cache: CacheConfig {
                capacity: env::var("CACHE_CAPACITY")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
            },
            comments: CommentsConfig {
                backend: env::var("COMMENTSTREAMS_STORE")
                    .unwrap_or_else(|_| "namespace".to_string())
                    .parse()
                    .map_err(|e: AppError| anyhow::anyhow!(e.to_string()))?,
                newest_first: env_flag("COMMENTSTREAMS_NEWEST_FIRST", defaults.newest_first),
                enable_voting: env_flag("COMMENTSTREAMS_ENABLE_VOTING", defaults.enable_voting),
                reply_delete_policy: env::var("COMMENTSTREAMS_REPLY_DELETE_POLICY")
                    .unwrap_or_else(|_| "cascade".to_string())
                    .parse()
                    .map_err(|e: AppError| anyhow::anyhow!(e.to_string()))?,
                moderator_group: env::var("COMMENTSTREAMS_MODERATOR_GROUP")
                    .unwrap_or(defaults.moderator_group),
                namespace: env::var("COMMENTSTREAMS_NAMESPACE")
                    .ok()
                    .and_then(|value| value.parse().ok())
                    .map(Namespace)
                    .unwrap_or(defaults.namespace),
                max_title_attempts: env::var("COMMENTSTREAMS_TITLE_ATTEMPTS")
                    .ok()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(defaults.max_title_attempts),
            },
            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        })
    }

    pub fn with_backend(mut self, backend: StoreBackend) -> Self {
        self.comments.backend = backend;
        self
    }
}
