//! Visibility-driven playback scheduler
//!
//! Exactly one video of the held feed is active at a time: the one most
//! recently reported as at least `visibility_threshold` visible.
//!
//! State transitions per video:
//! - Idle → Starting: becomes active (rewind, play requested, view accounting armed)
//! - Starting → Playing: play resolved while still active
//! - Starting → Paused: play refused (autoplay policy, abort); a tap retries
//! - Starting → Failed: the media itself failed to load
//! - Playing ⇄ Paused: tap
//! - any but Failed → Idle: another video became active (paused, accounting disarmed)
//!
//! Every activation bumps an epoch; a play result that arrives for an older
//! epoch is discarded.
//!
//! View accounting is armed, disarmed and told about playback only under the
//! scheduler lock; only the active video is ever armed.

use crate::config::PlaybackConfig;
use crate::domain::Video;
use crate::error::{FeedError, ServiceResult};
use crate::services::sync::Collection;
use crate::services::view_accounting::ViewAccounting;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// Autoplay refused by the platform
    #[error("Playback not allowed: {0}")]
    NotAllowed(String),

    /// Interrupted by a pause or a newer play request
    #[error("Playback aborted")]
    Aborted,

    #[error("Media failed to load: {0}")]
    Media(String),
}

/// Platform media element(s), one per video
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Seek to the start
    fn rewind(&self, video_id: Uuid);

    /// Request playback; resolves once playback actually started or was refused
    async fn play(&self, video_id: Uuid) -> Result<(), PlaybackError>;

    fn pause(&self, video_id: Uuid);
}

/// Where the scheduler's items come from on (re)load
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> ServiceResult<Vec<Video>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    /// Not playing, tap to play
    Paused,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    /// Nothing to show; offer a retry
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub active_index: Option<usize>,
    pub active_id: Option<Uuid>,
    pub playback: HashMap<Uuid, PlaybackState>,
    pub load: LoadState,
}

struct SchedulerState {
    active: Option<Uuid>,
    epoch: u64,
    playback: HashMap<Uuid, PlaybackState>,
    load: LoadState,
}

struct Inner {
    items: Collection<Video>,
    backend: Arc<dyn PlaybackBackend>,
    accounting: ViewAccounting,
    source: RwLock<Option<Arc<dyn FeedSource>>>,
    threshold: f64,
    state: Mutex<SchedulerState>,
    snapshot: watch::Sender<SchedulerSnapshot>,
}

#[derive(Clone)]
pub struct FeedScheduler {
    inner: Arc<Inner>,
}

enum TapAction {
    Activate,
    Pause,
    Play(u64),
    Ignore,
}

impl FeedScheduler {
    pub fn new(
        items: Collection<Video>,
        backend: Arc<dyn PlaybackBackend>,
        accounting: ViewAccounting,
        config: &PlaybackConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(SchedulerSnapshot {
            active_index: None,
            active_id: None,
            playback: HashMap::new(),
            load: LoadState::Loading,
        });
        Self {
            inner: Arc::new(Inner {
                items,
                backend,
                accounting,
                source: RwLock::new(None),
                threshold: config.visibility_threshold,
                state: Mutex::new(SchedulerState {
                    active: None,
                    epoch: 0,
                    playback: HashMap::new(),
                    load: LoadState::Loading,
                }),
                snapshot,
            }),
        }
    }

    /// Attach the loader used by [`refresh`](Self::refresh) and [`retry_load`](Self::retry_load)
    pub fn with_source(self, source: Arc<dyn FeedSource>) -> Self {
        *self.inner.source.write() = Some(source);
        self
    }

    pub fn items(&self) -> &Collection<Video> {
        &self.inner.items
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let (active_id, playback, load) = {
            let state = self.inner.state.lock();
            (state.active, state.playback.clone(), state.load.clone())
        };
        SchedulerSnapshot {
            active_index: active_id.and_then(|id| self.inner.items.position(id)),
            active_id,
            playback,
            load,
        }
    }

    pub fn active_index(&self) -> Option<usize> {
        self.snapshot().active_index
    }

    pub fn playback_state(&self, video_id: Uuid) -> PlaybackState {
        self.inner
            .state
            .lock()
            .playback
            .get(&video_id)
            .copied()
            .unwrap_or(PlaybackState::Idle)
    }

    fn publish(&self) {
        self.inner.snapshot.send_replace(self.snapshot());
    }

    /// Replace the held items; the first one becomes active
    pub fn load(&self, videos: Vec<Video>) {
        let previous = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state.playback.clear();
            state.load = if videos.is_empty() {
                LoadState::Empty
            } else {
                LoadState::Ready
            };
            let previous = state.active.take();
            if let Some(previous) = previous {
                self.inner.accounting.disarm(previous);
            }
            previous
        };
        if let Some(previous) = previous {
            self.inner.backend.pause(previous);
        }

        self.inner.items.replace(videos);
        info!(count = self.inner.items.len(), "Feed loaded");

        if self.inner.items.is_empty() {
            self.publish();
        } else {
            self.activate(0);
        }
    }

    /// Fetch from the attached source and load the result
    pub async fn refresh(&self) -> ServiceResult<()> {
        let source = self
            .inner
            .source
            .read()
            .clone()
            .ok_or_else(|| FeedError::Internal("no feed source attached".to_string()))?;

        self.inner.state.lock().load = LoadState::Loading;
        self.publish();

        match source.fetch().await {
            Ok(videos) => {
                self.load(videos);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Feed load failed");
                self.inner.state.lock().load = LoadState::Failed(e.to_string());
                self.publish();
                Err(e)
            }
        }
    }

    /// Manual retry from the empty or failed state
    pub async fn retry_load(&self) -> ServiceResult<()> {
        debug!("Retrying feed load");
        self.refresh().await
    }

    /// Visibility observer callback
    pub fn report_visibility(&self, index: usize, fraction: f64) {
        if fraction >= self.inner.threshold {
            self.activate(index);
        }
    }

    /// Make the video at `index` the only active one
    pub fn activate(&self, index: usize) {
        let Some(video_id) = self.inner.items.id_at(index) else {
            return;
        };

        let (previous, epoch, playable) = {
            let mut state = self.inner.state.lock();
            if state.active == Some(video_id) {
                return;
            }
            let previous = state.active.replace(video_id);
            if let Some(previous) = previous {
                if state.playback.get(&previous) != Some(&PlaybackState::Failed) {
                    state.playback.insert(previous, PlaybackState::Idle);
                }
            }
            state.epoch += 1;
            let playable = state.playback.get(&video_id) != Some(&PlaybackState::Failed);
            if let Some(previous) = previous {
                self.inner.accounting.disarm(previous);
            }
            if playable {
                state.playback.insert(video_id, PlaybackState::Starting);
                self.inner.accounting.arm(video_id);
            }
            (previous, state.epoch, playable)
        };

        if let Some(previous) = previous {
            self.inner.backend.pause(previous);
        }
        debug!(index, video_id = %video_id, epoch, "Activating video");

        if playable {
            self.inner.backend.rewind(video_id);
            self.spawn_play(video_id, epoch);
        }
        self.publish();
    }

    /// Tap on a video: toggles play/pause on the active one
    pub fn tap(&self, index: usize) {
        let Some(video_id) = self.inner.items.id_at(index) else {
            return;
        };

        let action = {
            let mut state = self.inner.state.lock();
            if state.active != Some(video_id) {
                TapAction::Activate
            } else {
                match state.playback.get(&video_id).copied() {
                    Some(PlaybackState::Playing) => {
                        state.playback.insert(video_id, PlaybackState::Paused);
                        self.inner.accounting.set_playing(video_id, false);
                        TapAction::Pause
                    }
                    Some(PlaybackState::Failed) | Some(PlaybackState::Starting) => TapAction::Ignore,
                    _ => {
                        state.epoch += 1;
                        state.playback.insert(video_id, PlaybackState::Starting);
                        TapAction::Play(state.epoch)
                    }
                }
            }
        };

        match action {
            TapAction::Activate => self.activate(index),
            TapAction::Pause => {
                self.inner.backend.pause(video_id);
                self.publish();
            }
            TapAction::Play(epoch) => {
                self.spawn_play(video_id, epoch);
                self.publish();
            }
            TapAction::Ignore => {}
        }
    }

    /// Drop a video (deleted by its owner); the next one takes its slot
    pub fn remove(&self, video_id: Uuid) {
        let index = self.inner.items.position(video_id);
        if self.inner.items.remove(video_id).is_none() {
            return;
        }

        let now_empty = self.inner.items.is_empty();
        let was_active = {
            let mut state = self.inner.state.lock();
            state.playback.remove(&video_id);
            if now_empty {
                state.load = LoadState::Empty;
            }
            if state.active == Some(video_id) {
                state.active = None;
                state.epoch += 1;
                self.inner.accounting.disarm(video_id);
                true
            } else {
                false
            }
        };

        if was_active {
            self.inner.backend.pause(video_id);
            let len = self.inner.items.len();
            if let (Some(index), true) = (index, len > 0) {
                self.activate(index.min(len - 1));
                return;
            }
        }
        self.publish();
    }

    fn spawn_play(&self, video_id: Uuid, epoch: u64) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let result = scheduler.inner.backend.play(video_id).await;
            scheduler.finish_play(video_id, epoch, result);
        });
    }

    fn finish_play(&self, video_id: Uuid, epoch: u64, result: Result<(), PlaybackError>) {
        let (current, still_active) = {
            let mut state = self.inner.state.lock();
            let still_active = state.active == Some(video_id);
            let current = state.epoch == epoch && still_active;
            if current {
                let next = match &result {
                    Ok(()) => {
                        self.inner.accounting.set_playing(video_id, true);
                        PlaybackState::Playing
                    }
                    Err(PlaybackError::Media(_)) => {
                        self.inner.accounting.disarm(video_id);
                        PlaybackState::Failed
                    }
                    Err(_) => {
                        self.inner.accounting.set_playing(video_id, false);
                        PlaybackState::Paused
                    }
                };
                state.playback.insert(video_id, next);
            }
            (current, still_active)
        };

        if !current {
            debug!(video_id = %video_id, epoch, "Discarding stale playback result");
            if result.is_ok() && !still_active {
                self.inner.backend.pause(video_id);
            }
            return;
        }

        match result {
            Ok(()) => {}
            Err(PlaybackError::Aborted) => debug!(video_id = %video_id, "Playback aborted"),
            Err(PlaybackError::Media(reason)) => {
                warn!(video_id = %video_id, reason = %reason, "Video failed to load");
            }
            Err(e) => {
                info!(video_id = %video_id, error = %e, "Autoplay prevented, waiting for tap");
            }
        }
        self.publish();
    }
}
