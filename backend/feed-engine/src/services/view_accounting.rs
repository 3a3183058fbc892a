//! Session-scoped view accounting
//!
//! A video counts as viewed once it has actually played for the threshold
//! (2 whole seconds by default) while active. Each `(session, video)` pair is
//! reported at most once:
//! - arm: start tracking the video, unless the session already counted it
//! - play: start a tick task whose first tick lands one full period later
//! - pause: abort the tick task, keeping the seconds accrued so far
//! - tick: add one second; on reaching the threshold set the session marker,
//!   bump the local counter and send one remote increment
//! - disarm: abort the tick task and drop accrued time

use crate::config::PlaybackConfig;
use crate::remote::Procedure;
use crate::repository::VideoRepository;
use crate::session::SessionId;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Record of videos already counted in a session
pub trait SessionMarkerStore: Send + Sync {
    fn contains(&self, session: SessionId, video_id: Uuid) -> bool;

    /// Set the marker; returns false when it was already set
    fn insert(&self, session: SessionId, video_id: Uuid) -> bool;
}

/// In-process marker store, lives as long as the app instance
#[derive(Default)]
pub struct MemorySessionMarkers {
    markers: DashSet<(SessionId, Uuid)>,
}

impl MemorySessionMarkers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionMarkerStore for MemorySessionMarkers {
    fn contains(&self, session: SessionId, video_id: Uuid) -> bool {
        self.markers.contains(&(session, video_id))
    }

    fn insert(&self, session: SessionId, video_id: Uuid) -> bool {
        self.markers.insert((session, video_id))
    }
}

/// Local view counter that gets the optimistic +1
pub trait ViewCounter: Send + Sync {
    fn bump_view(&self, video_id: Uuid);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed,
    /// Marker already set for this session; nothing to do
    AlreadyCounted,
}

struct Armed {
    generation: u64,
    playing: bool,
    watched_secs: u32,
    /// Running only while playing
    task: Option<JoinHandle<()>>,
}

impl Armed {
    fn stop_ticking(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Tick {
    Continue,
    Stop,
    Report,
}

#[derive(Default)]
struct AccountingState {
    armed: HashMap<Uuid, Armed>,
    next_generation: u64,
}

struct Inner {
    session: SessionId,
    markers: Arc<dyn SessionMarkerStore>,
    counter: Arc<dyn ViewCounter>,
    videos: VideoRepository,
    threshold_secs: u32,
    tick: Duration,
    state: Mutex<AccountingState>,
}

#[derive(Clone)]
pub struct ViewAccounting {
    inner: Arc<Inner>,
}

impl ViewAccounting {
    pub fn new(
        session: SessionId,
        markers: Arc<dyn SessionMarkerStore>,
        counter: Arc<dyn ViewCounter>,
        videos: VideoRepository,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                markers,
                counter,
                videos,
                threshold_secs: config.view_threshold_secs.max(1),
                tick: config.view_tick(),
                state: Mutex::new(AccountingState::default()),
            }),
        }
    }

    /// Start accruing watch time for `video_id`. Re-arming restarts from zero.
    pub fn arm(&self, video_id: Uuid) -> ArmOutcome {
        if self.inner.markers.contains(self.inner.session, video_id) {
            debug!(video_id = %video_id, "View already counted this session");
            return ArmOutcome::AlreadyCounted;
        }

        let mut state = self.inner.state.lock();
        if let Some(mut previous) = state.armed.remove(&video_id) {
            previous.stop_ticking();
        }
        state.next_generation += 1;
        let generation = state.next_generation;

        state.armed.insert(
            video_id,
            Armed {
                generation,
                playing: false,
                watched_secs: 0,
                task: None,
            },
        );
        ArmOutcome::Armed
    }

    /// Stop accruing; progress is discarded
    pub fn disarm(&self, video_id: Uuid) {
        if let Some(mut armed) = self.inner.state.lock().armed.remove(&video_id) {
            armed.stop_ticking();
            debug!(video_id = %video_id, watched_secs = armed.watched_secs, "View accounting disarmed");
        }
    }

    /// Report whether the media element is actually playing.
    /// Each start restarts the tick phase, so a second is only credited
    /// after a full second of uninterrupted playback.
    pub fn set_playing(&self, video_id: Uuid, playing: bool) {
        let mut state = self.inner.state.lock();
        let Some(armed) = state.armed.get_mut(&video_id) else {
            return;
        };
        match (armed.playing, playing) {
            (false, true) => {
                armed.stop_ticking();
                armed.task = Some(self.spawn_ticker(video_id, armed.generation));
            }
            (true, false) => armed.stop_ticking(),
            _ => {}
        }
        armed.playing = playing;
    }

    fn spawn_ticker(&self, video_id: Uuid, generation: u64) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + inner.tick, inner.tick);
            loop {
                ticker.tick().await;
                match inner.on_tick(video_id, generation) {
                    Tick::Continue => {}
                    Tick::Stop => break,
                    Tick::Report => {
                        inner.report(video_id).await;
                        break;
                    }
                }
            }
        })
    }

    pub fn is_armed(&self, video_id: Uuid) -> bool {
        self.inner.state.lock().armed.contains_key(&video_id)
    }

    /// Whole seconds accrued for an armed video
    pub fn watched_secs(&self, video_id: Uuid) -> Option<u32> {
        self.inner
            .state
            .lock()
            .armed
            .get(&video_id)
            .map(|a| a.watched_secs)
    }

    pub fn is_counted(&self, video_id: Uuid) -> bool {
        self.inner.markers.contains(self.inner.session, video_id)
    }
}

impl Inner {
    fn on_tick(&self, video_id: Uuid, generation: u64) -> Tick {
        let mut state = self.state.lock();
        let Some(armed) = state.armed.get_mut(&video_id) else {
            return Tick::Stop;
        };
        if armed.generation != generation {
            return Tick::Stop;
        }
        if !armed.playing {
            return Tick::Continue;
        }

        armed.watched_secs += 1;
        if armed.watched_secs < self.threshold_secs {
            return Tick::Continue;
        }

        state.armed.remove(&video_id);
        if self.markers.insert(self.session, video_id) {
            self.counter.bump_view(video_id);
            Tick::Report
        } else {
            Tick::Stop
        }
    }

    async fn report(&self, video_id: Uuid) {
        // Local count stays incremented even if this fails
        match self
            .videos
            .adjust_counter(Procedure::IncrementViewCount, video_id)
            .await
        {
            Ok(()) => info!(video_id = %video_id, "View counted"),
            Err(e) => warn!(video_id = %video_id, error = %e, "Failed to report view"),
        }
    }
}
