//! Story playback
//!
//! State transitions:
//! - Closed → Playing(0): avatar tapped while the owner has active stories
//! - Playing(i) → Playing(i + 1): progress reached 100, or a tap outside the left third
//! - Playing(last) → Closed: same triggers on the last story
//! - Playing(i) → Playing(max(i - 1, 0)): tap on the left third
//! - Playing → Closed: manual close, or the story set shrank below the index
//!
//! Progress is sampled every `story_sample_ms` as elapsed / duration × 100.

use crate::config::PlaybackConfig;
use crate::domain::Story;
use crate::error::{FeedError, ServiceResult};
use crate::remote::DataService;
use crate::repository::StoryRepository;
use crate::session::Session;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoryState {
    Closed,
    Playing { index: usize, progress: f64 },
}

/// Effect of a transition on the current clip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A clip (possibly the same one) starts from zero
    Restarted,
    Closed,
    Unchanged,
}

/// Pure state machine over one owner's story sequence
#[derive(Debug, Clone)]
pub struct StoryMachine {
    stories: Vec<Story>,
    state: StoryState,
}

impl Default for StoryMachine {
    fn default() -> Self {
        Self {
            stories: Vec::new(),
            state: StoryState::Closed,
        }
    }
}

impl StoryMachine {
    pub fn new(stories: Vec<Story>) -> Self {
        Self {
            stories,
            state: StoryState::Closed,
        }
    }

    pub fn state(&self) -> StoryState {
        self.state
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn current(&self) -> Option<&Story> {
        match self.state {
            StoryState::Playing { index, .. } => self.stories.get(index),
            StoryState::Closed => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, StoryState::Playing { .. })
    }

    /// Start playing at `index`; stays closed when there is nothing there
    pub fn open(&mut self, index: usize) -> Step {
        if index >= self.stories.len() {
            return Step::Unchanged;
        }
        self.state = StoryState::Playing {
            index,
            progress: 0.0,
        };
        Step::Restarted
    }

    pub fn advance(&mut self) -> Step {
        match self.state {
            StoryState::Playing { index, .. } if index + 1 < self.stories.len() => {
                self.state = StoryState::Playing {
                    index: index + 1,
                    progress: 0.0,
                };
                Step::Restarted
            }
            StoryState::Playing { .. } => self.close(),
            StoryState::Closed => Step::Unchanged,
        }
    }

    pub fn previous(&mut self) -> Step {
        match self.state {
            StoryState::Playing { index, .. } => {
                self.state = StoryState::Playing {
                    index: index.saturating_sub(1),
                    progress: 0.0,
                };
                Step::Restarted
            }
            StoryState::Closed => Step::Unchanged,
        }
    }

    /// Tap at horizontal position `x_fraction` (0.0 left edge, 1.0 right edge)
    pub fn tap(&mut self, x_fraction: f64) -> Step {
        if x_fraction < 1.0 / 3.0 {
            self.previous()
        } else {
            self.advance()
        }
    }

    pub fn close(&mut self) -> Step {
        match self.state {
            StoryState::Closed => Step::Unchanged,
            StoryState::Playing { .. } => {
                self.state = StoryState::Closed;
                Step::Closed
            }
        }
    }

    /// Record playback position of the current clip
    pub fn sample(&mut self, elapsed: Duration, duration: Duration) -> Step {
        let StoryState::Playing { index, .. } = self.state else {
            return Step::Unchanged;
        };
        if duration.is_zero() {
            return Step::Unchanged;
        }

        let progress = elapsed.as_secs_f64() / duration.as_secs_f64() * 100.0;
        if progress >= 100.0 {
            return self.advance();
        }
        self.state = StoryState::Playing {
            index,
            progress: progress.max(0.0),
        };
        Step::Unchanged
    }

    /// Swap in a re-fetched story set, keeping the playback state if it still fits
    pub fn replace_stories(&mut self, stories: Vec<Story>) -> Step {
        self.stories = stories;
        match self.state {
            StoryState::Playing { index, .. } if index >= self.stories.len() => self.close(),
            _ => Step::Unchanged,
        }
    }
}

/// Playback position source for the clip on screen
pub trait MediaClock: Send + Sync {
    /// Elapsed time and total length of `story`, which started at `started`;
    /// `None` while the length is still unknown
    fn position(&self, story: &Story, started: Instant) -> Option<(Duration, Duration)>;
}

/// Wall-clock position with known clip lengths
pub struct FixedDurationClock {
    default: Duration,
    durations: HashMap<Uuid, Duration>,
}

impl FixedDurationClock {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            durations: HashMap::new(),
        }
    }

    pub fn with_duration(mut self, story_id: Uuid, duration: Duration) -> Self {
        self.durations.insert(story_id, duration);
        self
    }
}

impl MediaClock for FixedDurationClock {
    fn position(&self, story: &Story, started: Instant) -> Option<(Duration, Duration)> {
        let duration = self
            .durations
            .get(&story.id)
            .copied()
            .unwrap_or(self.default);
        Some((started.elapsed(), duration))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarAction {
    /// Viewer opened at the first story
    Opened,
    /// Owner without stories: offer an upload
    PromptUpload,
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorySnapshot {
    pub stories: Vec<Story>,
    pub state: StoryState,
}

struct PlayerState {
    machine: StoryMachine,
    started: Instant,
    ticker: Option<JoinHandle<()>>,
}

struct Inner {
    owner_id: Uuid,
    session: Session,
    repo: StoryRepository,
    clock: Arc<dyn MediaClock>,
    sample_every: Duration,
    state: Mutex<PlayerState>,
    snapshot: watch::Sender<StorySnapshot>,
}

/// Timer-driven story viewer for one owner
#[derive(Clone)]
pub struct StoryPlayer {
    inner: Arc<Inner>,
}

impl Inner {
    fn publish(&self, state: &PlayerState) {
        self.snapshot.send_replace(StorySnapshot {
            stories: state.machine.stories().to_vec(),
            state: state.machine.state(),
        });
    }

    /// Apply a transition's side effects; returns whether the viewer is still open
    fn settle(&self, state: &mut PlayerState, step: Step) -> bool {
        match step {
            Step::Restarted => state.started = Instant::now(),
            Step::Closed => {
                if let Some(ticker) = state.ticker.take() {
                    ticker.abort();
                }
            }
            Step::Unchanged => {}
        }
        self.publish(state);
        state.machine.is_open()
    }

    /// One sampling tick; false once the viewer is closed
    fn sample(&self) -> bool {
        let mut state = self.state.lock();
        let Some(story) = state.machine.current().cloned() else {
            return false;
        };
        let step = match self.clock.position(&story, state.started) {
            Some((elapsed, duration)) => state.machine.sample(elapsed, duration),
            None => Step::Unchanged,
        };
        if step == Step::Restarted {
            debug!(owner_id = %self.owner_id, state = ?state.machine.state(), "Story advanced");
        }
        match step {
            // The ticker is this task; let it end on its own
            Step::Closed => {
                state.ticker = None;
                self.publish(&state);
                false
            }
            other => self.settle(&mut state, other),
        }
    }
}

impl StoryPlayer {
    pub fn new(
        owner_id: Uuid,
        session: Session,
        remote: Arc<dyn DataService>,
        clock: Arc<dyn MediaClock>,
        config: &PlaybackConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(StorySnapshot {
            stories: Vec::new(),
            state: StoryState::Closed,
        });
        Self {
            inner: Arc::new(Inner {
                owner_id,
                session,
                repo: StoryRepository::new(remote),
                clock,
                sample_every: config.story_sample_interval(),
                state: Mutex::new(PlayerState {
                    machine: StoryMachine::default(),
                    started: Instant::now(),
                    ticker: None,
                }),
                snapshot,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StorySnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn state(&self) -> StoryState {
        self.inner.state.lock().machine.state()
    }

    pub fn stories(&self) -> Vec<Story> {
        self.inner.state.lock().machine.stories().to_vec()
    }

    /// Avatar ring: the owner has something to show
    pub fn has_stories(&self) -> bool {
        !self.inner.state.lock().machine.stories().is_empty()
    }

    /// Only the owner may add stories
    pub fn can_upload(&self) -> bool {
        self.inner.session.is_viewer(self.inner.owner_id)
    }

    /// Fetch the owner's active stories without touching playback state
    pub async fn refresh(&self) -> ServiceResult<usize> {
        let stories = self.inner.repo.active_for(self.inner.owner_id, Utc::now()).await?;
        let count = stories.len();
        self.set_stories(stories);
        Ok(count)
    }

    pub fn set_stories(&self, stories: Vec<Story>) {
        let mut state = self.inner.state.lock();
        let step = state.machine.replace_stories(stories);
        self.inner.settle(&mut state, step);
    }

    pub fn open(&self, index: usize) -> bool {
        let mut state = self.inner.state.lock();
        let step = state.machine.open(index);
        if step != Step::Restarted {
            return false;
        }
        self.ensure_ticker(&mut state);
        self.inner.settle(&mut state, step)
    }

    pub fn avatar_tapped(&self) -> AvatarAction {
        if self.open(0) {
            AvatarAction::Opened
        } else if self.can_upload() {
            AvatarAction::PromptUpload
        } else {
            AvatarAction::Nothing
        }
    }

    pub fn tap(&self, x_fraction: f64) {
        self.transition(|machine| machine.tap(x_fraction));
    }

    pub fn next(&self) {
        self.transition(StoryMachine::advance);
    }

    pub fn previous(&self) {
        self.transition(StoryMachine::previous);
    }

    pub fn close(&self) {
        self.transition(StoryMachine::close);
    }

    fn transition(&self, f: impl FnOnce(&mut StoryMachine) -> Step) {
        let mut state = self.inner.state.lock();
        let step = f(&mut state.machine);
        self.inner.settle(&mut state, step);
    }

    /// Re-fetch after an upload finished elsewhere
    pub async fn on_upload_complete(&self) -> ServiceResult<()> {
        let count = self.refresh().await?;
        info!(owner_id = %self.inner.owner_id, count, "Stories refreshed after upload");
        Ok(())
    }

    /// Record an uploaded clip as a new story, then refresh
    pub async fn publish_story(&self, video_url: &str) -> ServiceResult<()> {
        if !self.can_upload() {
            return Err(FeedError::Forbidden(
                "only the owner can add stories".to_string(),
            ));
        }
        self.inner
            .repo
            .create(self.inner.owner_id, video_url)
            .await
            .map_err(|e| {
                warn!(owner_id = %self.inner.owner_id, error = %e, "Story upload failed");
                FeedError::from(e)
            })?;
        self.on_upload_complete().await
    }

    fn ensure_ticker(&self, state: &mut PlayerState) {
        if let Some(ticker) = &state.ticker {
            if !ticker.is_finished() {
                return;
            }
        }
        let inner = self.inner.clone();
        let every = inner.sample_every;
        state.ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + every, every);
            loop {
                interval.tick().await;
                if !inner.sample() {
                    break;
                }
            }
        }));
    }
}
