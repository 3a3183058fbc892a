//! Discover grid, user search and profile page loading

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use feed_engine::config::PlaybackConfig;
use feed_engine::error::FeedError;
use feed_engine::remote::{MemoryDataService, Table};
use feed_engine::services::{DiscoverFeed, EngagementStore, ProfileLoader};
use feed_engine::session::Session;
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[tokio::test]
async fn test_trending_uses_view_threshold() {
    let remote = Arc::new(MemoryDataService::new());
    let owner = Uuid::new_v4();
    let mut hot = video(owner, 0);
    hot.views_count = 5000;
    let mut warm = video(owner, 0);
    warm.views_count = 2500;
    let cold = video(owner, 0);
    remote.seed(Table::Videos, [row(&cold), row(&warm), row(&hot)]);

    let discover = DiscoverFeed::new(remote.clone(), &PlaybackConfig::default());
    let ids: Vec<Uuid> = discover.trending().await.unwrap().iter().map(|v| v.id).collect();

    assert_eq!(ids, vec![hot.id, warm.id]);
}

#[tokio::test]
async fn test_trending_falls_back_to_most_viewed() {
    let remote = Arc::new(MemoryDataService::new());
    let owner = Uuid::new_v4();
    let mut a = video(owner, 0);
    a.views_count = 12;
    let mut b = video(owner, 0);
    b.views_count = 40;
    remote.seed(Table::Videos, [row(&a), row(&b)]);

    let discover = DiscoverFeed::new(remote.clone(), &PlaybackConfig::default());
    let ids: Vec<Uuid> = discover.trending().await.unwrap().iter().map(|v| v.id).collect();

    assert_eq!(ids, vec![b.id, a.id]);
}

#[tokio::test]
async fn test_user_search_needs_two_characters() {
    let remote = Arc::new(MemoryDataService::new());
    seed_profile(&remote, "DanceQueen");
    seed_profile(&remote, "skater_dan");
    seed_profile(&remote, "chef");
    let discover = DiscoverFeed::new(remote.clone(), &PlaybackConfig::default());

    assert!(discover.search_users(" d ").await.unwrap().is_empty());
    assert!(remote.calls().is_empty());

    let mut names: Vec<String> = discover
        .search_users("dan")
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.username)
        .collect();
    names.sort();
    assert_eq!(names, vec!["DanceQueen", "skater_dan"]);
}

#[tokio::test]
async fn test_own_profile_is_created_when_missing() {
    let remote = Arc::new(MemoryDataService::new());
    let me = Uuid::new_v4();
    let loader = ProfileLoader::new(Session::authenticated(me), remote.clone());

    let page = assert_ok!(loader.load(me).await);

    assert!(page.is_owner);
    assert!(page.profile.username.starts_with("user"));
    assert_eq!(page.liked, Some(Vec::new()));
    assert_eq!(remote.rows(Table::Profiles).len(), 1);

    let again = loader.load(me).await.unwrap();
    assert_eq!(again.profile.username, page.profile.username);
}

#[tokio::test]
async fn test_missing_foreign_profile_is_not_found() {
    let remote = Arc::new(MemoryDataService::new());
    let loader = ProfileLoader::new(Session::anonymous(), remote.clone());

    let error = assert_err!(loader.load(Uuid::new_v4()).await);

    assert!(matches!(error, FeedError::NotFound(_)));
    assert!(remote.rows(Table::Profiles).is_empty());
}

#[tokio::test]
async fn test_profile_page_orders_pinned_first_and_tracks_engagement() {
    let remote = Arc::new(MemoryDataService::new());
    let me = Uuid::new_v4();
    let maker = seed_profile(&remote, "maker");
    let mut pinned_old = video_at(maker.id, 0, Utc::now() - ChronoDuration::days(5));
    pinned_old.pinned = true;
    let newest = video(maker.id, 2);
    let middle = video_at(maker.id, 0, Utc::now() - ChronoDuration::days(1));
    remote.seed(
        Table::Videos,
        [row(&middle), row(&newest), row(&pinned_old)],
    );
    remote.seed(
        Table::Stories,
        [row(&story(maker.id, ChronoDuration::hours(1)))],
    );
    remote.seed(
        Table::Follows,
        [json!({ "follower_id": me, "following_id": maker.id })],
    );

    let store = Arc::new(EngagementStore::new(Session::authenticated(me), remote.clone()));
    let loader =
        ProfileLoader::new(Session::authenticated(me), remote.clone()).with_engagement(store.clone());
    let page = loader.load(maker.id).await.unwrap();

    let ids: Vec<Uuid> = page.videos.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![pinned_old.id, newest.id, middle.id]);
    assert!(!page.is_owner);
    assert_eq!(page.liked, None);
    assert_eq!(page.stories.len(), 1);

    assert_eq!(store.item(newest.id).unwrap().like_count, 2);
    assert!(store.profile(maker.id).unwrap().following);
}

#[tokio::test]
async fn test_liked_grid_lists_liked_videos() {
    let remote = Arc::new(MemoryDataService::new());
    let me = Uuid::new_v4();
    let liked = seed_video(&remote, Uuid::new_v4(), 1);
    seed_video(&remote, Uuid::new_v4(), 0);
    remote.seed(Table::Likes, [json!({ "user_id": me, "video_id": liked.id })]);

    let loader = ProfileLoader::new(Session::authenticated(me), remote.clone());
    let videos = loader.liked_videos().await.unwrap();

    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].id, liked.id);

    let anonymous = ProfileLoader::new(Session::anonymous(), remote);
    assert!(matches!(
        anonymous.liked_videos().await,
        Err(FeedError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_only_owner_deletes_video() {
    let remote = Arc::new(MemoryDataService::new());
    let me = Uuid::new_v4();
    let mine = seed_video(&remote, me, 0);
    let theirs = seed_video(&remote, Uuid::new_v4(), 0);
    remote.seed(
        Table::Likes,
        [json!({ "user_id": Uuid::new_v4(), "video_id": mine.id })],
    );

    let store = Arc::new(EngagementStore::new(Session::authenticated(me), remote.clone()));
    store.track_video(&mine);
    let loader =
        ProfileLoader::new(Session::authenticated(me), remote.clone()).with_engagement(store.clone());

    assert!(matches!(
        loader.delete_video(theirs.id).await,
        Err(FeedError::Forbidden(_))
    ));
    assert_ok!(loader.delete_video(mine.id).await);

    assert_eq!(remote.rows(Table::Videos).len(), 1);
    assert!(remote.rows(Table::Likes).is_empty(), "likes cascade");
    assert!(store.item(mine.id).is_none());
    assert!(matches!(
        loader.delete_video(mine.id).await,
        Err(FeedError::NotFound(_))
    ));
}
