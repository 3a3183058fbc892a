// Shared fixtures for feed-engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use feed_engine::domain::{Profile, Story, Video};
use feed_engine::remote::{MemoryDataService, Table};
use feed_engine::services::{PlaybackBackend, PlaybackError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

pub fn profile(id: Uuid, username: &str) -> Profile {
    Profile {
        id,
        username: username.to_string(),
        avatar_url: None,
        bio: None,
        followers_count: 0,
        following_count: 0,
        verified: false,
        is_admin: false,
        is_banned: false,
    }
}

pub fn video(owner: Uuid, likes: u64) -> Video {
    video_at(owner, likes, Utc::now())
}

pub fn video_at(owner: Uuid, likes: u64, created_at: DateTime<Utc>) -> Video {
    Video {
        id: Uuid::new_v4(),
        user_id: owner,
        video_url: "https://cdn.example.com/v.mp4".to_string(),
        description: String::new(),
        views_count: 0,
        likes_count: likes,
        shares_count: 0,
        comments_count: 0,
        pinned: false,
        created_at,
        profiles: None,
    }
}

pub fn story(owner: Uuid, expires_in: ChronoDuration) -> Story {
    let now = Utc::now();
    Story {
        id: Uuid::new_v4(),
        user_id: owner,
        video_url: "https://cdn.example.com/s.mp4".to_string(),
        created_at: now,
        expires_at: now + expires_in,
        profiles: None,
    }
}

pub fn row<T: serde::Serialize>(item: &T) -> Value {
    serde_json::to_value(item).unwrap()
}

/// Seed a profile row and return the matching model
pub fn seed_profile(remote: &MemoryDataService, username: &str) -> Profile {
    let p = profile(Uuid::new_v4(), username);
    remote.seed(Table::Profiles, [row(&p)]);
    p
}

pub fn seed_video(remote: &MemoryDataService, owner: Uuid, likes: u64) -> Video {
    let v = video(owner, likes);
    remote.seed(Table::Videos, [row(&v)]);
    v
}

pub fn message_row(sender: Uuid, receiver: Uuid, content: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "sender_id": sender,
        "receiver_id": receiver,
        "content": content,
        "created_at": Utc::now(),
    })
}

/// Poll `check` until it holds, yielding to spawned tasks in between
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Observe `future` while it is parked on a paused write
pub async fn during<F: Future>(remote: &MemoryDataService, future: F, observe: impl FnOnce()) -> F::Output {
    remote.pause_writes();
    let (output, _) = tokio::join!(future, async {
        settle().await;
        observe();
        remote.resume_writes();
    });
    output
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Rewind(Uuid),
    Play(Uuid),
    Pause(Uuid),
}

/// Media element stand-in: records calls, refuses or fails on demand,
/// delays individual videos
#[derive(Default)]
pub struct FakeBackend {
    log: Mutex<Vec<MediaCall>>,
    refuse: Mutex<HashMap<Uuid, PlaybackError>>,
    delays: Mutex<HashMap<Uuid, Duration>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, video_id: Uuid, error: PlaybackError) {
        self.refuse.lock().insert(video_id, error);
    }

    pub fn allow(&self, video_id: Uuid) {
        self.refuse.lock().remove(&video_id);
    }

    pub fn delay(&self, video_id: Uuid, delay: Duration) {
        self.delays.lock().insert(video_id, delay);
    }

    pub fn log(&self) -> Vec<MediaCall> {
        self.log.lock().clone()
    }

    pub fn count(&self, call: &MediaCall) -> usize {
        self.log.lock().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl PlaybackBackend for FakeBackend {
    fn rewind(&self, video_id: Uuid) {
        self.log.lock().push(MediaCall::Rewind(video_id));
    }

    async fn play(&self, video_id: Uuid) -> Result<(), PlaybackError> {
        self.log.lock().push(MediaCall::Play(video_id));
        let delay = self.delays.lock().get(&video_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let refusal = self.refuse.lock().get(&video_id).cloned();
        match refusal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn pause(&self, video_id: Uuid) {
        self.log.lock().push(MediaCall::Pause(video_id));
    }
}
