use anyhow::{Context, Result};
use change_feed::{ChangeFeed, RedisChangeFeed};
use feed_engine::config::Config;
use feed_engine::domain::format_count;
use feed_engine::remote::{DataService, PostgrestService};
use feed_engine::services::{
    Collection, EngagementStore, FeedSource, HomeFeed, SyncBinding, SyncLayer,
};
use feed_engine::session::Session;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    feed_engine::logging::init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(remote = %config.remote.url, "Starting feed engine");

    let remote: Arc<dyn DataService> = Arc::new(
        PostgrestService::new(&config.remote).context("Failed to build remote client")?,
    );
    let session = match std::env::var("VIEWER_ID")
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok())
    {
        Some(viewer) => Session::authenticated(viewer),
        None => Session::anonymous(),
    };
    let engagement = Arc::new(EngagementStore::new(session, remote.clone()));

    let home = HomeFeed::new(remote.clone(), &config.playback).with_engagement(engagement.clone());
    let videos = home.fetch().await.context("Failed to load home feed")?;
    if videos.is_empty() {
        println!("No videos yet.");
        return Ok(());
    }

    for (i, video) in videos.iter().enumerate() {
        let author = video
            .profiles
            .as_ref()
            .map(|p| p.username.as_str())
            .unwrap_or("unknown");
        println!(
            "{:>3}. @{:<16} {:>6} views {:>6} likes  {}",
            i + 1,
            author,
            format_count(video.views_count),
            format_count(video.likes_count),
            video.description
        );
    }

    let Some(redis_url) = config.realtime.redis_url.as_deref() else {
        return Ok(());
    };

    let feed: Arc<dyn ChangeFeed> = Arc::new(
        RedisChangeFeed::new(redis_url)
            .await
            .context("Failed to connect change feed")?,
    );
    let sync = SyncLayer::new(feed, remote.clone()).with_engagement(engagement.clone());

    let owner_id = videos[0].user_id;
    let target = Collection::from_items(
        videos
            .iter()
            .filter(|v| v.user_id == owner_id)
            .cloned()
            .collect(),
    );
    let handle = sync
        .open(SyncBinding::OwnerVideos {
            owner_id,
            target: target.clone(),
        })
        .await?;
    let mut updates = target.subscribe();

    info!(owner_id = %owner_id, "Watching video updates, Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Video collection dropped");
                    break;
                }
                for video in updates.borrow().iter() {
                    info!(
                        video_id = %video.id,
                        views = video.views_count,
                        likes = video.likes_count,
                        pinned = video.pinned,
                        "Video updated"
                    );
                }
            }
        }
    }

    sync.close(handle);
    Ok(())
}
