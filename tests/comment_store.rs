// Behaviour both comment store backends share

mod common;

use comment_streams::config::{Config, ReplyDeletePolicy, StoreBackend};
use comment_streams::entities::AbstractComment;
use comment_streams::framework::hooks::LifecycleKind;
use comment_streams::framework::privacy::CommentAction;
use comment_streams::infrastructure::{PageStore, ReadConsistency};
use comment_streams::presentation::CommentSerializer;
use comment_streams::store::talk_page_content::{TalkPageContent, COMMENT_STREAMS_SLOT};
use comment_streams::store::Vote;

use common::Harness;

const BACKENDS: [StoreBackend; 2] = [StoreBackend::Namespace, StoreBackend::TalkPage];

#[tokio::test]
async fn test_comment_round_trip() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();

        let comment = store
            .insert_comment(&h.alice, "Some ''text''", h.subject.id, "Hello", Some("intro"))
            .await
            .unwrap()
            .expect("comment inserted");

        let loaded = store.get_comment(comment.id()).await.unwrap().expect("comment loads");
        assert_eq!(loaded.title(), "Hello", "{:?}", backend);
        assert_eq!(loaded.block_name(), Some("intro"));
        assert_eq!(loaded.associated_page(), &h.subject);
        assert_eq!(loaded.author().id, h.alice.id);
        assert_eq!(loaded.last_editor().id, h.alice.id);
        assert!(loaded.modification_date().is_none());
        assert_eq!(
            store.get_wikitext((&loaded).into()).await.unwrap().as_deref(),
            Some("Some ''text''")
        );
        assert_eq!(store.get_associated_comments(&h.subject).await.unwrap(), vec![loaded]);
    }
}

#[tokio::test]
async fn test_comment_reply_scenario() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();

        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        let id = comment.id();
        assert_eq!(store.get_comment(id).await.unwrap().unwrap().title(), "Bar");
        assert_eq!(store.get_wikitext((&comment).into()).await.unwrap().as_deref(), Some("Foo"));
        assert_eq!(store.get_num_replies(&comment).await.unwrap(), 0);

        let reply = store.insert_reply(&h.bob, "Baz", &comment).await.unwrap().unwrap();
        assert_eq!(store.get_num_replies(&comment).await.unwrap(), 1);
        let replies = store.get_replies(&comment).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(store.get_wikitext((&replies[0]).into()).await.unwrap().as_deref(), Some("Baz"));
        assert_eq!(replies[0].parent().id(), id);

        assert!(store.delete_reply(&reply, &h.bob).await.unwrap());
        assert_eq!(store.get_num_replies(&comment).await.unwrap(), 0);

        assert!(store.delete_comment(&comment, &h.alice).await.unwrap());
        assert!(store.get_comment(id).await.unwrap().is_none(), "{:?}", backend);

        assert_eq!(h.recorder.count(LifecycleKind::Insert).await, 2);
        assert_eq!(h.recorder.count(LifecycleKind::Delete).await, 2);
    }
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        let reply = store.insert_reply(&h.alice, "Baz", &comment).await.unwrap().unwrap();

        assert!(store.delete_reply(&reply, &h.alice).await.unwrap());
        assert!(store.delete_reply(&reply, &h.alice).await.unwrap());
        assert!(store.delete_comment(&comment, &h.alice).await.unwrap());
        assert!(store.delete_comment(&comment, &h.alice).await.unwrap());

        // the second calls changed nothing
        assert_eq!(h.recorder.count(LifecycleKind::Delete).await, 2, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_moderator_edit_keeps_author() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();

        assert!(store
            .update_comment(&comment, "Bar (edited)", "Foo, moderated", &h.moderator)
            .await
            .unwrap());

        let edited = store.get_comment(comment.id()).await.unwrap().unwrap();
        assert_eq!(edited.author().id, h.alice.id, "{:?}", backend);
        assert_eq!(edited.last_editor().id, h.moderator.id);
        assert_eq!(edited.title(), "Bar (edited)");
        assert_eq!(edited.creation_date(), comment.creation_date());
        assert!(edited.modification_date().is_some());
        assert_eq!(
            store.get_wikitext((&edited).into()).await.unwrap().as_deref(),
            Some("Foo, moderated")
        );

        let events = h.recorder.events().await;
        let (kind, id, previous) = events.last().unwrap();
        assert_eq!((*kind, *id), (LifecycleKind::Update, comment.id()));
        assert_eq!(previous.as_deref(), Some("Foo"));
    }
}

#[tokio::test]
async fn test_other_users_are_denied() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        let reply = store.insert_reply(&h.alice, "Baz", &comment).await.unwrap().unwrap();

        assert!(!store.user_can(CommentAction::Edit, &h.bob, (&comment).into()).await.unwrap());
        assert!(!store.update_comment(&comment, "Hijacked", "x", &h.bob).await.unwrap());
        assert!(!store.update_reply(&reply, "x", &h.bob).await.unwrap());
        assert!(!store.delete_reply(&reply, &h.bob).await.unwrap());
        assert!(!store.delete_comment(&comment, &h.bob).await.unwrap());

        let unchanged = store.get_comment(comment.id()).await.unwrap().unwrap();
        assert_eq!(unchanged.title(), "Bar", "{:?}", backend);
        assert_eq!(store.get_num_replies(&comment).await.unwrap(), 1);

        assert!(store.user_can(CommentAction::Delete, &h.moderator, (&reply).into()).await.unwrap());
        assert!(store.user_can(CommentAction::Edit, &h.alice, (&reply).into()).await.unwrap());
    }
}

#[tokio::test]
async fn test_anonymous_users_cannot_post() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let anonymous = comment_streams::core::User::unregistered("192.0.2.1");

        let inserted = store
            .insert_comment(&anonymous, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap();
        assert!(inserted.is_none(), "{:?}", backend);
        assert!(store.get_associated_comments(&h.subject).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_invalid_inserts_are_rejected() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();

        let missing_page = comment_streams::core::PageId(9_999);
        assert!(store
            .insert_comment(&h.alice, "Foo", missing_page, "Bar", None)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .insert_comment(&h.alice, "Foo", h.subject.id, "   ", None)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_comment(comment_streams::core::EntityId(424_242)).await.unwrap().is_none());
        assert!(store.get_reply(comment_streams::core::EntityId(424_242)).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_cascade_removes_replies() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        let first = store.insert_reply(&h.bob, "One", &comment).await.unwrap().unwrap();
        let second = store.insert_reply(&h.alice, "Two", &comment).await.unwrap().unwrap();
        store.vote(&comment, Vote::Up, &h.bob).await.unwrap();

        assert!(store.delete_comment(&comment, &h.alice).await.unwrap());

        assert!(store.get_reply(first.id()).await.unwrap().is_none(), "{:?}", backend);
        assert!(store.get_reply(second.id()).await.unwrap().is_none());
        assert_eq!(store.get_num_up_votes(&comment).await.unwrap(), 0);
        assert!(store.get_watchers(&comment).await.unwrap().is_empty());
        // one delete per reply plus the comment
        assert_eq!(h.recorder.count(LifecycleKind::Delete).await, 3);
    }
}

async fn row_count(h: &Harness, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(h.db.primary())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_delete_after_subject_page_vanished() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        let reply = store.insert_reply(&h.bob, "Baz", &comment).await.unwrap().unwrap();
        store.vote(&comment, Vote::Up, &h.bob).await.unwrap();
        store.watch(&comment, &h.bob).await.unwrap();

        assert!(h.pages.delete_page(&h.subject, &h.moderator, false).await.unwrap());
        assert!(store.get_comment(comment.id()).await.unwrap().is_none(), "{:?}", backend);

        // Other users still may not delete it, and nothing is touched
        assert!(!store.delete_comment(&comment, &h.bob).await.unwrap(), "{:?}", backend);
        assert_eq!(row_count(&h, "cs_votes").await, 1);
        assert_eq!(row_count(&h, "cs_watchlist").await, 2);

        assert!(store.delete_comment(&comment, &h.alice).await.unwrap(), "{:?}", backend);
        assert_eq!(row_count(&h, "cs_votes").await, 0, "{:?}", backend);
        assert_eq!(row_count(&h, "cs_watchlist").await, 0);
        match backend {
            StoreBackend::Namespace => {
                assert_eq!(row_count(&h, "cs_comments").await, 0);
                assert_eq!(row_count(&h, "cs_replies").await, 0);
                assert!(h.pages.page_by_id(comment.id().into()).await.unwrap().is_none());
                assert!(h.pages.page_by_id(reply.id().into()).await.unwrap().is_none());
            }
            StoreBackend::TalkPage => {
                assert_eq!(row_count(&h, "cs_associated_pages").await, 0);
                let talk = h
                    .pages
                    .page_by_title(&h.subject.title.talk_page().unwrap())
                    .await
                    .unwrap()
                    .unwrap();
                let latest = h.pages.latest_revision(talk.id).await.unwrap().unwrap();
                let document = latest.slot(COMMENT_STREAMS_SLOT).unwrap();
                assert_eq!(TalkPageContent::parse_str(document).map(|c| c.len()), Some(0));
            }
        }
        assert_eq!(h.recorder.count(LifecycleKind::Delete).await, 2);
    }
}

#[tokio::test]
async fn test_refuse_policy_keeps_comment_with_replies() {
    for backend in BACKENDS {
        let mut config = Config::default().with_backend(backend);
        config.comments.reply_delete_policy = ReplyDeletePolicy::Refuse;
        let h = Harness::with_config(config).await;
        let store = h.store();

        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        let reply = store.insert_reply(&h.bob, "Baz", &comment).await.unwrap().unwrap();

        assert!(!store.delete_comment(&comment, &h.alice).await.unwrap());
        assert!(store.get_comment(comment.id()).await.unwrap().is_some(), "{:?}", backend);
        assert!(store.get_reply(reply.id()).await.unwrap().is_some());

        assert!(store.delete_reply(&reply, &h.bob).await.unwrap());
        assert!(store.delete_comment(&comment, &h.alice).await.unwrap());
    }
}

#[tokio::test]
async fn test_reply_edit_records_last_editor_and_watch() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        let reply = store.insert_reply(&h.alice, "Baz", &comment).await.unwrap().unwrap();
        assert!(!store.is_watching(&comment, &h.moderator, ReadConsistency::Primary).await.unwrap());

        assert!(store.update_reply(&reply, "Baz, tidied", &h.moderator).await.unwrap());

        let edited = store.get_reply(reply.id()).await.unwrap().unwrap();
        assert_eq!(edited.author().id, h.alice.id, "{:?}", backend);
        assert_eq!(edited.last_editor().id, h.moderator.id);
        assert_eq!(store.get_wikitext((&edited).into()).await.unwrap().as_deref(), Some("Baz, tidied"));
        if backend == StoreBackend::TalkPage {
            assert!(store.is_watching(&comment, &h.moderator, ReadConsistency::Primary).await.unwrap());
        }
    }
}

#[tokio::test]
async fn test_votes_are_exclusive_per_user() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();

        assert!(store.vote(&comment, Vote::Up, &h.bob).await.unwrap());
        assert!(store.vote(&comment, Vote::Up, &h.bob).await.unwrap());
        assert_eq!(store.get_vote(&comment, &h.bob).await.unwrap(), Vote::Up);
        assert!(store.vote(&comment, Vote::Down, &h.moderator).await.unwrap());
        assert_eq!(store.get_num_up_votes(&comment).await.unwrap(), 1);
        assert_eq!(store.get_num_down_votes(&comment).await.unwrap(), 1);

        assert!(store.vote(&comment, Vote::Down, &h.bob).await.unwrap());
        assert_eq!(store.get_num_up_votes(&comment).await.unwrap(), 0);
        assert_eq!(store.get_num_down_votes(&comment).await.unwrap(), 2);

        assert!(store.vote(&comment, Vote::Neutral, &h.bob).await.unwrap());
        assert_eq!(store.get_vote(&comment, &h.bob).await.unwrap(), Vote::Neutral);
        assert_eq!(store.get_num_down_votes(&comment).await.unwrap(), 1, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_authors_and_repliers_watch_the_comment() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "Foo", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        assert!(store.is_watching(&comment, &h.alice, ReadConsistency::Primary).await.unwrap());
        assert!(!store.is_watching(&comment, &h.bob, ReadConsistency::Primary).await.unwrap());

        store.insert_reply(&h.bob, "Baz", &comment).await.unwrap().unwrap();
        let watchers = store.get_watchers(&comment).await.unwrap();
        assert_eq!(watchers.len(), 2, "{:?}", backend);
        assert!(watchers.contains_key(&h.bob.id));

        assert!(store.unwatch(&comment, &h.alice).await.unwrap());
        assert!(store.unwatch(&comment, &h.alice).await.unwrap());
        assert!(!store.is_watching(&comment, &h.alice, ReadConsistency::Primary).await.unwrap());
        assert!(store.watch(&comment, &h.alice).await.unwrap());
    }
}

#[tokio::test]
async fn test_history_lists_every_state_newest_first() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let comment = store
            .insert_comment(&h.alice, "v1", h.subject.id, "Bar", None)
            .await
            .unwrap()
            .unwrap();
        // unrelated writes on the same subject page
        let other = store
            .insert_comment(&h.bob, "other", h.subject.id, "Other", None)
            .await
            .unwrap()
            .unwrap();
        assert!(store.update_comment(&comment, "Bar", "v2", &h.alice).await.unwrap());
        store.insert_reply(&h.bob, "noise", &other).await.unwrap().unwrap();
        assert!(store.update_comment(&comment, "Bar", "v3", &h.moderator).await.unwrap());

        let history = store.get_history((&comment).into()).await.unwrap();
        let texts: Vec<_> = history.iter().map(|item| item.wikitext.as_str()).collect();
        assert_eq!(texts, vec!["v3", "v2", "v1"], "{:?}", backend);
        assert!(history.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
        assert_eq!(history[0].actor.id, h.moderator.id);
        assert_eq!(history[2].actor.id, h.alice.id);
    }
}

#[tokio::test]
async fn test_comments_are_scoped_to_their_page() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let store = h.store();
        let elsewhere = h.other_page("Elsewhere").await;

        store.insert_comment(&h.alice, "Foo", h.subject.id, "Here", None).await.unwrap().unwrap();
        store.insert_comment(&h.bob, "Foo", elsewhere.id, "There", None).await.unwrap().unwrap();

        let here = store.get_associated_comments(&h.subject).await.unwrap();
        let there = store.get_associated_comments(&elsewhere).await.unwrap();
        assert_eq!(here.len(), 1, "{:?}", backend);
        assert_eq!(here[0].title(), "Here");
        assert_eq!(there.len(), 1);
        assert_eq!(there[0].title(), "There");
    }
}

#[tokio::test]
async fn test_serializer_orders_by_votes() {
    for backend in BACKENDS {
        let mut config = Config::default().with_backend(backend);
        config.comments.enable_voting = true;
        let h = Harness::with_config(config).await;
        let store = h.store();

        let first = store
            .insert_comment(&h.alice, "first", h.subject.id, "First", None)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .insert_comment(&h.bob, "second", h.subject.id, "Second", Some("faq"))
            .await
            .unwrap()
            .unwrap();
        store.insert_reply(&h.alice, "later reply", &second).await.unwrap().unwrap();
        store.insert_reply(&h.bob, "even later", &second).await.unwrap().unwrap();
        store.vote(&second, Vote::Up, &h.alice).await.unwrap();
        store.vote(&first, Vote::Down, &h.bob).await.unwrap();

        let mut serializer = CommentSerializer::new(store.clone(), h.users.clone(), &h.config.comments);
        let payload = serializer.stream_for(&h.subject, &h.alice, None).await.unwrap();

        let titles: Vec<_> = payload.comments.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Second", "First"], "{:?}", backend);
        let top = &payload.comments[0];
        assert_eq!(top.up_votes, Some(1));
        assert_eq!(top.viewer_vote, Some(1));
        assert!(!top.can_edit);
        assert!(payload.comments[1].can_edit);
        let replies: Vec<_> = top.replies.iter().map(|r| r.wikitext.as_str()).collect();
        assert_eq!(replies, vec!["later reply", "even later"]);
        assert!(top.replies[0].can_delete);
        assert_eq!(top.author.username, "Bob");
        assert_eq!(serializer.authors().len(), 2);

        let faq = serializer.stream_for(&h.subject, &h.alice, Some("faq")).await.unwrap();
        assert_eq!(faq.comments.len(), 1);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["comments"][0]["title"], "Second");
    }
}
