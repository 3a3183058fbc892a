//! Change-feed events folded into locally held collections

mod common;

use change_feed::{ChangeEvent, LocalChangeFeed};
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use feed_engine::domain::{Conversation, Message, Profile, Story, Video};
use feed_engine::remote::{DataService, Filter, MemoryDataService, RemoteCall, Table};
use feed_engine::repository::StoryRepository;
use feed_engine::services::sync::SyncSlot;
use feed_engine::services::{
    Collection, EngagementStore, InboxService, SyncBinding, SyncLayer, SyncScope,
};
use feed_engine::session::Session;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

struct World {
    feed: Arc<LocalChangeFeed>,
    remote: Arc<MemoryDataService>,
    layer: SyncLayer,
}

impl World {
    fn new() -> Self {
        let feed = Arc::new(LocalChangeFeed::default());
        let remote = Arc::new(MemoryDataService::new().with_change_feed(feed.clone()));
        let layer = SyncLayer::new(feed.clone(), remote.clone());
        Self {
            feed,
            remote,
            layer,
        }
    }
}

#[tokio::test]
async fn test_partial_profile_updates_accumulate() {
    let w = World::new();
    let p = profile(Uuid::new_v4(), "ana");
    let target = Collection::from_items(vec![p.clone()]);
    let handle = w
        .layer
        .open(SyncBinding::Profile {
            profile_id: p.id,
            target: target.clone(),
        })
        .await
        .unwrap();
    assert_eq!(handle.scope(), SyncScope::Profile(p.id));

    w.feed
        .publish(ChangeEvent::update("profiles", json!({ "id": p.id, "bio": "hi" })));
    w.feed.publish(ChangeEvent::update(
        "profiles",
        json!({ "id": p.id, "followers_count": 12 }),
    ));

    assert!(
        wait_until(|| target
            .get(p.id)
            .map(|held| held.followers_count == 12)
            .unwrap_or(false))
        .await
    );
    let held = target.get(p.id).unwrap();
    assert_eq!(held.bio.as_deref(), Some("hi"));
    assert_eq!(held.username, "ana");

    w.layer.close(handle);
}

#[tokio::test]
async fn test_other_profiles_are_ignored() {
    let w = World::new();
    let p = profile(Uuid::new_v4(), "ana");
    let target = Collection::from_items(vec![p.clone()]);
    let _handle = w
        .layer
        .open(SyncBinding::Profile {
            profile_id: p.id,
            target: target.clone(),
        })
        .await
        .unwrap();

    w.feed.publish(ChangeEvent::update(
        "profiles",
        json!({ "id": Uuid::new_v4(), "bio": "someone else" }),
    ));
    settle().await;

    assert_eq!(target.get(p.id).unwrap(), p);
}

#[tokio::test]
async fn test_pinned_update_resorts_owner_grid_and_syncs_engagement() {
    let w = World::new();
    let owner = Uuid::new_v4();
    let older = video_at(owner, 0, Utc::now() - ChronoDuration::days(2));
    let newer = video(owner, 3);
    w.remote.seed(Table::Videos, [row(&older), row(&newer)]);

    let store = Arc::new(EngagementStore::new(Session::anonymous(), w.remote.clone()));
    store.track_video(&older);
    store.track_video(&newer);
    let layer = SyncLayer::new(w.feed.clone(), w.remote.clone()).with_engagement(store.clone());

    let target = Collection::from_items(vec![newer.clone(), older.clone()]);
    let handle = layer
        .open(SyncBinding::OwnerVideos {
            owner_id: owner,
            target: target.clone(),
        })
        .await
        .unwrap();

    w.remote
        .update(
            Table::Videos,
            vec![Filter::eq_id("id", older.id)],
            json!({ "pinned": true }),
        )
        .await
        .unwrap();

    assert!(wait_until(|| target.id_at(0) == Some(older.id)).await);
    assert!(target.get(older.id).unwrap().pinned);
    assert_eq!(target.id_at(1), Some(newer.id));
    assert!(wait_until(|| store.item(older.id).map(|i| i.pinned).unwrap_or(false)).await);

    w.feed.publish(ChangeEvent::update(
        "videos",
        json!({ "id": newer.id, "user_id": owner, "likes_count": 40 }),
    ));
    assert!(wait_until(|| store.item(newer.id).map(|i| i.like_count) == Some(40)).await);
    assert_eq!(target.get(newer.id).unwrap().likes_count, 40);

    layer.close(handle);
}

#[tokio::test]
async fn test_partial_video_updates_accumulate() {
    let w = World::new();
    let owner = Uuid::new_v4();
    let mut clip = video(owner, 1);
    clip.profiles = Some(profile(owner, "maker"));
    let other = video_at(owner, 0, Utc::now() - ChronoDuration::hours(1));

    let store = Arc::new(EngagementStore::new(Session::anonymous(), w.remote.clone()));
    store.track_video(&clip);
    let layer = SyncLayer::new(w.feed.clone(), w.remote.clone()).with_engagement(store.clone());
    let target = Collection::from_items(vec![clip.clone(), other.clone()]);
    let _handle = layer
        .open(SyncBinding::OwnerVideos {
            owner_id: owner,
            target: target.clone(),
        })
        .await
        .unwrap();

    w.feed.publish(ChangeEvent::update(
        "videos",
        json!({ "id": clip.id, "user_id": owner, "likes_count": 9 }),
    ));
    w.feed.publish(ChangeEvent::update(
        "videos",
        json!({ "id": clip.id, "user_id": owner, "description": "sunset" }),
    ));

    assert!(wait_until(|| target
        .get(clip.id)
        .map(|held| held.description == "sunset")
        .unwrap_or(false))
    .await);
    let held = target.get(clip.id).unwrap();
    assert_eq!(held.likes_count, 9);
    assert_eq!(held.video_url, clip.video_url);
    assert_eq!(held.profiles.as_ref().map(|p| p.username.as_str()), Some("maker"));
    assert_eq!(target.id_at(0), Some(clip.id));
    assert_eq!(target.id_at(1), Some(other.id));
    assert_eq!(store.item(clip.id).unwrap().like_count, 9);
}

#[tokio::test]
async fn test_closed_handle_applies_nothing() {
    let w = World::new();
    let p = profile(Uuid::new_v4(), "ana");
    let target = Collection::from_items(vec![p.clone()]);
    let handle = w
        .layer
        .open(SyncBinding::Profile {
            profile_id: p.id,
            target: target.clone(),
        })
        .await
        .unwrap();
    assert!(handle.is_open());

    w.layer.close(handle);
    w.feed
        .publish(ChangeEvent::update("profiles", json!({ "id": p.id, "bio": "late" })));
    settle().await;

    assert_eq!(target.get(p.id).unwrap().bio, None);
}

#[tokio::test]
async fn test_conversation_only_appends_its_pair() {
    let w = World::new();
    let me = Uuid::new_v4();
    let partner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let target: Collection<Message> = Collection::new();
    let _handle = w
        .layer
        .open(SyncBinding::Conversation {
            me,
            partner,
            target: target.clone(),
        })
        .await
        .unwrap();

    w.feed
        .publish(ChangeEvent::insert("messages", message_row(me, partner, "hey")));
    w.feed
        .publish(ChangeEvent::insert("messages", message_row(stranger, me, "spam")));
    w.feed
        .publish(ChangeEvent::insert("messages", message_row(partner, me, "yo")));

    assert!(wait_until(|| target.len() == 2).await);
    settle().await;
    let contents: Vec<String> = target.items().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["hey", "yo"]);
}

#[tokio::test]
async fn test_malformed_payload_is_skipped() {
    let w = World::new();
    let me = Uuid::new_v4();
    let partner = Uuid::new_v4();
    let target: Collection<Message> = Collection::new();
    let _handle = w
        .layer
        .open(SyncBinding::Conversation {
            me,
            partner,
            target: target.clone(),
        })
        .await
        .unwrap();

    w.feed.publish(ChangeEvent::insert(
        "messages",
        json!({ "id": "not-a-uuid", "sender_id": me, "content": 7 }),
    ));
    w.feed
        .publish(ChangeEvent::insert("messages", message_row(partner, me, "still here")));

    assert!(wait_until(|| target.len() == 1).await);
    assert_eq!(target.items()[0].content, "still here");
}

#[tokio::test]
async fn test_story_change_refetches_active_set() {
    let w = World::new();
    let owner = Uuid::new_v4();
    let live = story(owner, ChronoDuration::hours(3));
    let expired = story(owner, ChronoDuration::hours(-1));
    w.remote.seed(Table::Stories, [row(&live), row(&expired)]);

    let target: Collection<Story> = Collection::new();
    let _handle = w
        .layer
        .open(SyncBinding::OwnerStories {
            owner_id: owner,
            target: target.clone(),
        })
        .await
        .unwrap();

    StoryRepository::new(w.remote.clone())
        .create(owner, "https://cdn.example.com/new.mp4")
        .await
        .unwrap();

    assert!(wait_until(|| target.len() == 2).await);
    let held = target.items();
    assert_eq!(held[0].id, live.id, "oldest first");
    assert!(held.iter().all(|s| s.id != expired.id));

    // Stories of other owners do not trigger a re-fetch
    w.remote.clear_calls();
    StoryRepository::new(w.remote.clone())
        .create(Uuid::new_v4(), "https://cdn.example.com/other.mp4")
        .await
        .unwrap();
    settle().await;
    assert!(!w.remote.calls().contains(&RemoteCall::Select(Table::Stories)));
}

#[tokio::test]
async fn test_inbox_rebuilds_on_new_message() {
    let w = World::new();
    let me = seed_profile(&w.remote, "me");
    let alice = seed_profile(&w.remote, "alice");
    let bob = seed_profile(&w.remote, "bob");
    let mut first = message_row(alice.id, me.id, "hello");
    first["created_at"] = json!(Utc::now() - ChronoDuration::hours(1));
    w.remote.seed(Table::Messages, [first]);

    let inbox = InboxService::new(Session::authenticated(me.id), w.remote.clone());
    let target = Collection::from_items(inbox.conversations().await.unwrap());
    assert_eq!(target.len(), 1);

    let _handle = w
        .layer
        .open(SyncBinding::Inbox {
            me: me.id,
            target: target.clone(),
        })
        .await
        .unwrap();

    // Not mine: no rebuild
    w.remote.clear_calls();
    w.feed.publish(ChangeEvent::insert(
        "messages",
        message_row(alice.id, bob.id, "psst"),
    ));
    settle().await;
    assert!(!w.remote.calls().contains(&RemoteCall::Select(Table::Messages)));

    inbox.send(bob.id, "hi bob").await.unwrap();

    assert!(wait_until(|| target.len() == 2).await);
    let conversations: Vec<Conversation> = target.items();
    assert_eq!(conversations[0].other_user.id, bob.id);
    assert_eq!(conversations[0].last_message.content, "hi bob");
    assert_eq!(conversations[1].other_user.username, "alice");
}

#[tokio::test]
async fn test_slot_switch_closes_previous_scope() {
    let w = World::new();
    let a: Profile = profile(Uuid::new_v4(), "a");
    let b: Profile = profile(Uuid::new_v4(), "b");
    let target = Collection::from_items(vec![a.clone(), b.clone()]);

    let mut slot = SyncSlot::new();
    slot.switch(
        &w.layer,
        SyncBinding::Profile {
            profile_id: a.id,
            target: target.clone(),
        },
    )
    .await
    .unwrap();
    slot.switch(
        &w.layer,
        SyncBinding::Profile {
            profile_id: b.id,
            target: target.clone(),
        },
    )
    .await
    .unwrap();
    assert_eq!(slot.scope(), Some(SyncScope::Profile(b.id)));

    w.feed
        .publish(ChangeEvent::update("profiles", json!({ "id": a.id, "bio": "stale" })));
    w.feed
        .publish(ChangeEvent::update("profiles", json!({ "id": b.id, "bio": "fresh" })));

    assert!(wait_until(|| target.get(b.id).and_then(|p| p.bio).is_some()).await);
    settle().await;
    assert_eq!(target.get(a.id).unwrap().bio, None);

    slot.clear(&w.layer);
    assert_eq!(slot.scope(), None);
}

#[tokio::test]
async fn test_update_for_unknown_video_is_ignored() {
    let w = World::new();
    let owner = Uuid::new_v4();
    let target: Collection<Video> = Collection::new();
    let _handle = w
        .layer
        .open(SyncBinding::OwnerVideos {
            owner_id: owner,
            target: target.clone(),
        })
        .await
        .unwrap();

    w.feed.publish(ChangeEvent::update(
        "videos",
        json!({ "id": Uuid::new_v4(), "user_id": owner, "pinned": true }),
    ));
    settle().await;
    assert!(target.is_empty());
}
