// Lifecycle Hooks - post-mutation notifications for indexing and notification collaborators
// Listeners run after the store write succeeded; their failures are logged and
// never undo the mutation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{current_timestamp, Timestamp, User};
use crate::entities::{AbstractComment, Entity};
use crate::error::AppResult;

/// Mutation that triggered an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Insert,
    Update,
    Delete,
}

/// Event context handed to every listener
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub event_id: Uuid,
    pub kind: LifecycleKind,
    pub entity: Entity,
    pub actor: User,
    /// Wikitext before an update
    pub previous_wikitext: Option<String>,
    pub occurred_at: Timestamp,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, entity: Entity, actor: &User) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            entity,
            actor: actor.clone(),
            previous_wikitext: None,
            occurred_at: current_timestamp(),
        }
    }

    pub fn with_previous_wikitext(mut self, previous: impl Into<String>) -> Self {
        self.previous_wikitext = Some(previous.into());
        self
    }
}

/// Trait for collaborators reacting to comment mutations
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn on_event(&self, event: &LifecycleEvent) -> AppResult<()>;

    /// Get listener name for debugging
    fn name(&self) -> &str;

    /// Event kinds this listener wants; all by default
    fn kinds(&self) -> Vec<LifecycleKind> {
        vec![LifecycleKind::Insert, LifecycleKind::Update, LifecycleKind::Delete]
    }
}

/// Fan-out registry of lifecycle listeners
#[derive(Default)]
pub struct LifecycleEvents {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl LifecycleEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    /// Deliver an event to every interested listener concurrently.
    /// Returns the number of listeners that failed.
    pub async fn dispatch(&self, event: LifecycleEvent) -> usize {
        let interested: Vec<_> = self
            .listeners
            .iter()
            .filter(|listener| listener.kinds().contains(&event.kind))
            .collect();

        debug!(
            "Dispatching {:?} of {} {} to {} listeners",
            event.kind,
            event.entity.kind(),
            event.entity.id(),
            interested.len()
        );

        let results = join_all(interested.iter().map(|listener| listener.on_event(&event))).await;

        let mut failures = 0;
        for (listener, result) in interested.iter().zip(results) {
            if let Err(e) = result {
                failures += 1;
                warn!(
                    "Lifecycle listener '{}' failed on {:?} of {}: {}",
                    listener.name(),
                    event.kind,
                    event.entity.id(),
                    e
                );
            }
        }
        failures
    }
}

/// Built-in listener that writes every event to the log
pub struct TracingListener;

#[async_trait]
impl LifecycleListener for TracingListener {
    async fn on_event(&self, event: &LifecycleEvent) -> AppResult<()> {
        tracing::info!(
            event_id = %event.event_id,
            kind = ?event.kind,
            entity = %event.entity.id(),
            actor = %event.actor.name,
            "comment lifecycle event"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing_listener"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, Namespace, Page, PageId, PageTitle, UserId};
    use crate::entities::{Comment, EntityMeta};
    use crate::error::AppError;
    use tokio::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<LifecycleKind>>,
    }

    #[async_trait]
    impl LifecycleListener for Recorder {
        async fn on_event(&self, event: &LifecycleEvent) -> AppResult<()> {
            self.seen.lock().await.push(event.kind);
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    struct Failing;

    #[async_trait]
    impl LifecycleListener for Failing {
        async fn on_event(&self, _event: &LifecycleEvent) -> AppResult<()> {
            Err(AppError::Internal("index unavailable".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }

        fn kinds(&self) -> Vec<LifecycleKind> {
            vec![LifecycleKind::Delete]
        }
    }

    fn sample_entity() -> Entity {
        let author = User::new(UserId(1), "Alice");
        let page = Page::new(PageId(7), PageTitle::new(Namespace::MAIN, "Subject").unwrap());
        Entity::Comment(Comment::new(
            EntityMeta::created_by(EntityId(10), author, current_timestamp()),
            "Title",
            None,
            page,
        ))
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_propagated() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let mut events = LifecycleEvents::new();
        events.register(recorder.clone());
        events.register(Arc::new(Failing));
        events.register(Arc::new(TracingListener));

        let actor = User::new(UserId(1), "Alice");
        let failures = events
            .dispatch(LifecycleEvent::new(LifecycleKind::Insert, sample_entity(), &actor))
            .await;
        assert_eq!(failures, 0);

        let failures = events
            .dispatch(LifecycleEvent::new(LifecycleKind::Delete, sample_entity(), &actor))
            .await;
        assert_eq!(failures, 1);

        assert_eq!(
            *recorder.seen.lock().await,
            vec![LifecycleKind::Insert, LifecycleKind::Delete]
        );
    }
}
