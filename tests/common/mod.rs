#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use comment_streams::config::{Config, StoreBackend};
use comment_streams::core::{EntityId, Namespace, Page, PageTitle, User};
use comment_streams::entities::AbstractComment;
use comment_streams::framework::hooks::{LifecycleEvent, LifecycleEvents, LifecycleKind, LifecycleListener};
use comment_streams::framework::privacy::GroupPermissions;
use comment_streams::infrastructure::{main_slot, Database, PageStore, SqlitePageStore, SqliteUserDirectory};
use comment_streams::store::{build_store, CommentStore, HostServices};
use comment_streams::AppResult;

/// Remembers every lifecycle event it receives
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(LifecycleKind, EntityId, Option<String>)>>,
}

impl RecordingListener {
    pub async fn events(&self) -> Vec<(LifecycleKind, EntityId, Option<String>)> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, kind: LifecycleKind) -> usize {
        self.events.lock().await.iter().filter(|(k, _, _)| *k == kind).count()
    }
}

#[async_trait]
impl LifecycleListener for RecordingListener {
    async fn on_event(&self, event: &LifecycleEvent) -> AppResult<()> {
        self.events
            .lock()
            .await
            .push((event.kind, event.entity.id(), event.previous_wikitext.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording_listener"
    }
}

pub struct Harness {
    pub config: Config,
    pub db: Database,
    pub pages: Arc<SqlitePageStore>,
    pub users: Arc<SqliteUserDirectory>,
    pub recorder: Arc<RecordingListener>,
    pub alice: User,
    pub bob: User,
    pub moderator: User,
    pub subject: Page,
}

impl Harness {
    pub async fn new(backend: StoreBackend) -> Self {
        Self::with_config(Config::default().with_backend(backend)).await
    }

    pub async fn with_config(config: Config) -> Self {
        comment_streams::logging::init(&config.logging);
        let db = Database::connect(&config.database).await.unwrap();
        Self::with_database(config, db).await
    }

    pub async fn with_database(config: Config, db: Database) -> Self {
        let pages = Arc::new(SqlitePageStore::new(&db));
        let users = Arc::new(SqliteUserDirectory::new(&db));

        let alice = users.create_user("Alice", &[]).await.unwrap();
        let bob = users.create_user("Bob", &[]).await.unwrap();
        let moderator = users
            .create_user("Moira", &[config.comments.moderator_group.as_str()])
            .await
            .unwrap();

        let title = PageTitle::new(Namespace::MAIN, "Subject").unwrap();
        let subject = match pages.page_by_title(&title).await.unwrap() {
            Some(page) => page,
            None => pages
                .create_page(&title, main_slot("Article text"), &alice)
                .await
                .unwrap()
                .into_saved()
                .unwrap()
                .0,
        };

        Self {
            config,
            db,
            pages,
            users,
            recorder: Arc::new(RecordingListener::default()),
            alice,
            bob,
            moderator,
            subject,
        }
    }

    /// Host collaborators with the recording listener registered
    pub fn host(&self) -> HostServices {
        let mut events = LifecycleEvents::new();
        events.register(self.recorder.clone());
        HostServices {
            pages: self.pages.clone(),
            users: self.users.clone(),
            permissions: Arc::new(GroupPermissions::wiki_defaults(&self.config.comments.moderator_group)),
            events: Arc::new(events),
        }
    }

    pub fn store(&self) -> Arc<dyn CommentStore> {
        build_store(&self.config, self.db.clone(), self.host())
    }

    pub async fn other_page(&self, text: &str) -> Page {
        let title = PageTitle::new(Namespace::MAIN, text).unwrap();
        self.pages
            .create_page(&title, main_slot(""), &self.alice)
            .await
            .unwrap()
            .into_saved()
            .unwrap()
            .0
    }
}
