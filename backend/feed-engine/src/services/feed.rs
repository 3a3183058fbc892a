//! Feed loaders: home, discover and profile pages

use crate::config::PlaybackConfig;
use crate::domain::{Profile, Story, Video};
use crate::error::{FeedError, ServiceResult};
use crate::remote::DataService;
use crate::repository::{ProfileRepository, StoryRepository, VideoRepository};
use crate::services::engagement::EngagementStore;
use crate::services::scheduler::FeedSource;
use crate::services::sync::dedupe;
use crate::session::Session;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const DISCOVER_LIMIT: usize = 20;
const SEARCH_LIMIT: usize = 20;

/// Register videos with the engagement store and load the viewer's relations
async fn track_all(engagement: &Option<Arc<EngagementStore>>, videos: &[Video]) {
    let Some(store) = engagement else {
        return;
    };
    for video in videos {
        store.track_video(video);
    }
    join_all(videos.iter().map(|v| store.hydrate_item(v.id))).await;
}

/// Newest videos from everyone
pub struct HomeFeed {
    videos: VideoRepository,
    engagement: Option<Arc<EngagementStore>>,
    limit: usize,
}

impl HomeFeed {
    pub fn new(remote: Arc<dyn DataService>, config: &PlaybackConfig) -> Self {
        Self {
            videos: VideoRepository::new(remote),
            engagement: None,
            limit: config.feed_limit,
        }
    }

    pub fn with_engagement(mut self, engagement: Arc<EngagementStore>) -> Self {
        self.engagement = Some(engagement);
        self
    }
}

#[async_trait]
impl FeedSource for HomeFeed {
    async fn fetch(&self) -> ServiceResult<Vec<Video>> {
        let videos = dedupe(self.videos.latest(self.limit).await?);
        debug!(count = videos.len(), "Home feed fetched");
        track_all(&self.engagement, &videos).await;
        Ok(videos)
    }
}

/// Trending grid and user search
pub struct DiscoverFeed {
    videos: VideoRepository,
    profiles: ProfileRepository,
    engagement: Option<Arc<EngagementStore>>,
    min_views: u64,
}

impl DiscoverFeed {
    pub fn new(remote: Arc<dyn DataService>, config: &PlaybackConfig) -> Self {
        Self {
            videos: VideoRepository::new(remote.clone()),
            profiles: ProfileRepository::new(remote),
            engagement: None,
            min_views: config.trending_min_views,
        }
    }

    pub fn with_engagement(mut self, engagement: Arc<EngagementStore>) -> Self {
        self.engagement = Some(engagement);
        self
    }

    /// Videos above the view threshold, or the most viewed ones when none are
    pub async fn trending(&self) -> ServiceResult<Vec<Video>> {
        let mut videos = self.videos.trending(self.min_views, DISCOVER_LIMIT).await?;
        if videos.is_empty() {
            debug!(min_views = self.min_views, "Nothing trending, falling back to most viewed");
            videos = self.videos.most_viewed(DISCOVER_LIMIT).await?;
        }
        Ok(dedupe(videos))
    }

    /// Username search; terms shorter than two characters return nothing
    pub async fn search_users(&self, term: &str) -> ServiceResult<Vec<Profile>> {
        let term = term.trim();
        if term.chars().count() < 2 {
            return Ok(Vec::new());
        }
        Ok(self.profiles.search(term, SEARCH_LIMIT).await?)
    }
}

#[async_trait]
impl FeedSource for DiscoverFeed {
    async fn fetch(&self) -> ServiceResult<Vec<Video>> {
        let videos = self.trending().await?;
        track_all(&self.engagement, &videos).await;
        Ok(videos)
    }
}

/// Everything shown on a profile page
#[derive(Debug, Clone)]
pub struct ProfilePage {
    pub profile: Profile,
    /// Pinned first, then newest first
    pub videos: Vec<Video>,
    /// Only loaded on the viewer's own page
    pub liked: Option<Vec<Video>>,
    pub stories: Vec<Story>,
    pub is_owner: bool,
}

pub struct ProfileLoader {
    session: Session,
    profiles: ProfileRepository,
    videos: VideoRepository,
    stories: StoryRepository,
    engagement: Option<Arc<EngagementStore>>,
}

impl ProfileLoader {
    pub fn new(session: Session, remote: Arc<dyn DataService>) -> Self {
        Self {
            session,
            profiles: ProfileRepository::new(remote.clone()),
            videos: VideoRepository::new(remote.clone()),
            stories: StoryRepository::new(remote),
            engagement: None,
        }
    }

    pub fn with_engagement(mut self, engagement: Arc<EngagementStore>) -> Self {
        self.engagement = Some(engagement);
        self
    }

    pub async fn load(&self, user_id: Uuid) -> ServiceResult<ProfilePage> {
        let is_owner = self.session.is_viewer(user_id);
        let profile = if is_owner {
            self.profiles.ensure_profile(user_id).await?
        } else {
            self.profiles
                .find(user_id)
                .await?
                .ok_or_else(|| FeedError::NotFound(format!("profile {}", user_id)))?
        };

        let videos = dedupe(self.videos.by_owner(user_id).await?);
        let liked = if is_owner {
            Some(dedupe(self.videos.liked_by(user_id).await?))
        } else {
            None
        };
        let stories = self.stories.active_for(user_id, Utc::now()).await?;

        if let Some(store) = &self.engagement {
            store.track_profile(&profile);
            if !is_owner {
                store.hydrate_follow(user_id).await;
            }
        }
        track_all(&self.engagement, &videos).await;

        Ok(ProfilePage {
            profile,
            videos,
            liked,
            stories,
            is_owner,
        })
    }

    /// Liked-videos grid of the signed-in viewer
    pub async fn liked_videos(&self) -> ServiceResult<Vec<Video>> {
        let me = self.session.viewer().ok_or(FeedError::Unauthenticated)?;
        Ok(dedupe(self.videos.liked_by(me).await?))
    }

    /// Delete one of the viewer's own videos
    pub async fn delete_video(&self, video_id: Uuid) -> ServiceResult<()> {
        let video = self
            .videos
            .find(video_id)
            .await?
            .ok_or_else(|| FeedError::NotFound(format!("video {}", video_id)))?;
        if !self.session.is_viewer(video.user_id) {
            return Err(FeedError::Forbidden("not your video".to_string()));
        }

        self.videos.delete(video_id).await?;
        if let Some(store) = &self.engagement {
            store.forget(video_id);
        }
        info!(video_id = %video_id, "Video deleted");
        Ok(())
    }
}
