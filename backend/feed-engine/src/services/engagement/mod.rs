//! Engagement store: per-video and per-profile optimistic state
//!
//! Holds what the viewer sees for each tracked video (liked, pinned and the
//! shadowed counters) and each tracked profile (following, follower count).
//! Toggles go through the optimistic protocol in [`optimistic`]; every local
//! change is published on a `watch` channel.

mod optimistic;

pub use crate::error::EngagementError;
pub use optimistic::{InFlightGuards, InFlightTicket, MutationKey, MutationKind, MutationOutcome};

use crate::domain::{Profile, Video};
use crate::remote::{DataService, Procedure};
use crate::repository::{FollowRepository, LikeRepository, VideoRepository};
use crate::services::view_accounting::ViewCounter;
use crate::session::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Viewer-relative state of one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemEngagement {
    pub owner_id: Uuid,
    pub liked: bool,
    pub pinned: bool,
    pub like_count: u64,
    pub view_count: u64,
    pub share_count: u64,
    pub comment_count: u64,
}

impl ItemEngagement {
    fn from_video(video: &Video) -> Self {
        Self {
            owner_id: video.user_id,
            liked: false,
            pinned: video.pinned,
            like_count: video.likes_count,
            view_count: video.views_count,
            share_count: video.shares_count,
            comment_count: video.comments_count,
        }
    }
}

/// Viewer-relative state of one profile
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileEngagement {
    pub following: bool,
    pub followers_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngagementState {
    pub items: HashMap<Uuid, ItemEngagement>,
    pub profiles: HashMap<Uuid, ProfileEngagement>,
}

pub struct EngagementStore {
    session: Session,
    videos: VideoRepository,
    likes: LikeRepository,
    follows: FollowRepository,
    state: Mutex<EngagementState>,
    guards: InFlightGuards,
    snapshot: watch::Sender<EngagementState>,
}

fn adjust(count: u64, up: bool) -> u64 {
    if up {
        count.saturating_add(1)
    } else {
        count.saturating_sub(1)
    }
}

impl EngagementStore {
    pub fn new(session: Session, remote: Arc<dyn DataService>) -> Self {
        let (snapshot, _) = watch::channel(EngagementState::default());
        Self {
            session,
            videos: VideoRepository::new(remote.clone()),
            likes: LikeRepository::new(remote.clone()),
            follows: FollowRepository::new(remote),
            state: Mutex::new(EngagementState::default()),
            guards: InFlightGuards::new(),
            snapshot,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<EngagementState> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> EngagementState {
        self.state.lock().clone()
    }

    pub fn item(&self, video_id: Uuid) -> Option<ItemEngagement> {
        self.state.lock().items.get(&video_id).cloned()
    }

    pub fn profile(&self, user_id: Uuid) -> Option<ProfileEngagement> {
        self.state.lock().profiles.get(&user_id).cloned()
    }

    /// Whether the signed-in viewer owns content of `owner_id`
    pub fn is_owner(&self, owner_id: Uuid) -> bool {
        self.session.is_viewer(owner_id)
    }

    pub fn is_in_flight(&self, kind: MutationKind, target: Uuid) -> bool {
        self.guards.is_in_flight(MutationKey::new(kind, target))
    }

    fn publish(&self, state: &EngagementState) {
        self.snapshot.send_replace(state.clone());
    }

    /// Start tracking a video (and its owner); known entries are refreshed instead
    pub fn track_video(&self, video: &Video) {
        let known = self.state.lock().items.contains_key(&video.id);
        if known {
            self.sync_item(video);
            return;
        }

        let mut state = self.state.lock();
        state
            .items
            .insert(video.id, ItemEngagement::from_video(video));
        let owner = state.profiles.entry(video.user_id).or_default();
        if let Some(profile) = &video.profiles {
            owner.followers_count = profile.followers_count;
        }
        self.publish(&state);
    }

    pub fn track_profile(&self, profile: &Profile) {
        let mut state = self.state.lock();
        let entry = state.profiles.entry(profile.id).or_default();
        entry.followers_count = profile.followers_count;
        self.publish(&state);
    }

    /// Stop tracking a deleted video
    pub fn forget(&self, video_id: Uuid) {
        let mut state = self.state.lock();
        if state.items.remove(&video_id).is_some() {
            self.publish(&state);
        }
    }

    /// Adopt remote counters, except where a local mutation is still pending
    pub fn sync_item(&self, video: &Video) {
        let like_pending = self.is_in_flight(MutationKind::Like, video.id);
        let pin_pending = self.is_in_flight(MutationKind::Pin, video.id);

        let mut state = self.state.lock();
        let Some(item) = state.items.get_mut(&video.id) else {
            return;
        };
        if like_pending {
            debug!(video_id = %video.id, "Like in flight, keeping local like count");
        } else {
            item.like_count = video.likes_count;
        }
        if !pin_pending {
            item.pinned = video.pinned;
        }
        item.view_count = video.views_count;
        item.share_count = video.shares_count;
        item.comment_count = video.comments_count;
        self.publish(&state);
    }

    /// Adopt a remote follower count unless a follow toggle is pending
    pub fn sync_profile(&self, profile: &Profile) {
        if self.is_in_flight(MutationKind::Follow, profile.id) {
            return;
        }
        let mut state = self.state.lock();
        if let Some(entry) = state.profiles.get_mut(&profile.id) {
            entry.followers_count = profile.followers_count;
            self.publish(&state);
        }
    }

    /// Load the viewer's like status for a video and follow status for its owner
    pub async fn hydrate_item(&self, video_id: Uuid) {
        let Some(viewer) = self.session.viewer() else {
            return;
        };
        let owner_id = match self.item(video_id) {
            Some(item) => item.owner_id,
            None => return,
        };

        match self.likes.check_user_liked(viewer, video_id).await {
            Ok(liked) if !self.is_in_flight(MutationKind::Like, video_id) => {
                let mut state = self.state.lock();
                if let Some(item) = state.items.get_mut(&video_id) {
                    item.liked = liked;
                    self.publish(&state);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(video_id = %video_id, error = %e, "Failed to load like status"),
        }

        if owner_id != viewer {
            self.hydrate_follow(owner_id).await;
        }
    }

    pub async fn hydrate_follow(&self, user_id: Uuid) {
        let Some(viewer) = self.session.viewer() else {
            return;
        };
        match self.follows.is_following(viewer, user_id).await {
            Ok(following) if !self.is_in_flight(MutationKind::Follow, user_id) => {
                let mut state = self.state.lock();
                state.profiles.entry(user_id).or_default().following = following;
                self.publish(&state);
            }
            Ok(_) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to load follow status"),
        }
    }

    /// Like or unlike a video
    pub async fn toggle_like(&self, video_id: Uuid) -> MutationOutcome {
        let viewer = self.session.viewer();
        let likes = &self.likes;
        let videos = &self.videos;

        optimistic::run(
            &self.state,
            &self.guards,
            MutationKey::new(MutationKind::Like, video_id),
            |state| {
                let item = state
                    .items
                    .get_mut(&video_id)
                    .ok_or(EngagementError::NotTracked(video_id))?;
                let undo = (item.liked, item.like_count);
                item.liked = !item.liked;
                item.like_count = adjust(item.like_count, item.liked);
                Ok((item.liked, undo))
            },
            |liked| async move {
                let viewer = viewer.ok_or(EngagementError::Unauthenticated)?;
                if liked {
                    if likes.create_like(viewer, video_id).await? {
                        if let Err(e) = videos
                            .adjust_counter(Procedure::IncrementLikeCount, video_id)
                            .await
                        {
                            warn!(video_id = %video_id, error = %e, "Failed to increment like count");
                        }
                    } else {
                        debug!(video_id = %video_id, "Like already existed");
                    }
                } else {
                    likes.delete_like(viewer, video_id).await?;
                    if let Err(e) = videos
                        .adjust_counter(Procedure::DecrementLikeCount, video_id)
                        .await
                    {
                        warn!(video_id = %video_id, error = %e, "Failed to decrement like count");
                    }
                }
                Ok(())
            },
            |state, (liked, count)| {
                if let Some(item) = state.items.get_mut(&video_id) {
                    item.liked = liked;
                    item.like_count = count;
                }
            },
            |state| self.publish(state),
        )
        .await
    }

    /// Follow or unfollow another user
    pub async fn toggle_follow(&self, user_id: Uuid) -> MutationOutcome {
        let viewer = self.session.viewer();
        let follows = &self.follows;

        optimistic::run(
            &self.state,
            &self.guards,
            MutationKey::new(MutationKind::Follow, user_id),
            |state| {
                if viewer == Some(user_id) {
                    return Err(EngagementError::SelfFollow);
                }
                let entry = state.profiles.entry(user_id).or_default();
                let undo = entry.clone();
                entry.following = !entry.following;
                entry.followers_count = adjust(entry.followers_count, entry.following);
                Ok((entry.following, undo))
            },
            |following| async move {
                let viewer = viewer.ok_or(EngagementError::Unauthenticated)?;
                if following {
                    follows.follow(viewer, user_id).await?;
                } else {
                    follows.unfollow(viewer, user_id).await?;
                }
                Ok(())
            },
            |state, undo| {
                state.profiles.insert(user_id, undo);
            },
            |state| self.publish(state),
        )
        .await
    }

    /// Pin or unpin one of the viewer's own videos
    pub async fn toggle_pin(&self, video_id: Uuid) -> MutationOutcome {
        let viewer = self.session.viewer();
        let videos = &self.videos;

        let outcome = optimistic::run(
            &self.state,
            &self.guards,
            MutationKey::new(MutationKind::Pin, video_id),
            |state| {
                let item = state
                    .items
                    .get_mut(&video_id)
                    .ok_or(EngagementError::NotTracked(video_id))?;
                if viewer != Some(item.owner_id) {
                    return Err(EngagementError::NotOwner);
                }
                let undo = item.pinned;
                item.pinned = !item.pinned;
                Ok((item.pinned, undo))
            },
            |pinned| async move {
                videos.set_pinned(video_id, pinned).await?;
                info!(video_id = %video_id, pinned, "Pin state updated");
                Ok(())
            },
            |state, pinned| {
                if let Some(item) = state.items.get_mut(&video_id) {
                    item.pinned = pinned;
                }
            },
            |state| self.publish(state),
        )
        .await;

        match outcome {
            MutationOutcome::Reverted { error, .. } => MutationOutcome::Reverted {
                notice: Some(format!("Pin failed: {}", error)),
                error,
            },
            other => other,
        }
    }

    /// Count a share: local +1 right away, remote increment best-effort
    pub async fn record_share(&self, video_id: Uuid) {
        {
            let mut state = self.state.lock();
            let Some(item) = state.items.get_mut(&video_id) else {
                return;
            };
            item.share_count = item.share_count.saturating_add(1);
            self.publish(&state);
        }

        if let Err(e) = self
            .videos
            .adjust_counter(Procedure::IncrementShareCount, video_id)
            .await
        {
            warn!(video_id = %video_id, error = %e, "Failed to record share");
        }
    }
}

impl ViewCounter for EngagementStore {
    fn bump_view(&self, video_id: Uuid) {
        let mut state = self.state.lock();
        if let Some(item) = state.items.get_mut(&video_id) {
            item.view_count = item.view_count.saturating_add(1);
            self.publish(&state);
        }
    }
}
