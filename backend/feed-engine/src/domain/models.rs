use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A row held in a local collection, addressable by id
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> Uuid;
}

/// Counters arrive as signed (and sometimes null) integers; clamp at zero
fn counter<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.unwrap_or(0).max(0) as u64)
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// User profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default, deserialize_with = "counter")]
    pub followers_count: u64,
    #[serde(default, deserialize_with = "counter")]
    pub following_count: u64,
    #[serde(default, deserialize_with = "flag")]
    pub verified: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_admin: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_banned: bool,
}

impl Record for Profile {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Short-form video with its denormalized counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub user_id: Uuid,
    pub video_url: String,
    #[serde(default, deserialize_with = "text")]
    pub description: String,
    #[serde(default, deserialize_with = "counter")]
    pub views_count: u64,
    #[serde(default, deserialize_with = "counter")]
    pub likes_count: u64,
    #[serde(default, deserialize_with = "counter")]
    pub shares_count: u64,
    #[serde(default, deserialize_with = "counter")]
    pub comments_count: u64,
    #[serde(default, deserialize_with = "flag")]
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    /// Owner profile when the query embeds it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Profile>,
}

impl Video {
    /// Owner grid order: pinned first, then newest first
    pub fn grid_order(a: &Video, b: &Video) -> std::cmp::Ordering {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.created_at.cmp(&a.created_at))
    }
}

impl Record for Video {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Ephemeral story clip, visible until `expires_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub user_id: Uuid,
    pub video_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Profile>,
}

impl Story {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

impl Record for Story {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Direct message between two users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Profile>,
}

impl Message {
    /// True when the message was exchanged between `a` and `b`, in either direction
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The participant that is not `me`
    pub fn counterpart(&self, me: Uuid) -> Option<(Uuid, Option<&Profile>)> {
        if self.sender_id == me {
            Some((self.receiver_id, self.receiver.as_ref()))
        } else if self.receiver_id == me {
            Some((self.sender_id, self.sender.as_ref()))
        } else {
            None
        }
    }
}

impl Record for Message {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Profile>,
}

impl Record for Comment {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Inbox entry: latest message exchanged with one other user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub other_user: Profile,
    pub last_message: Message,
}

impl Record for Conversation {
    /// Keyed by the other participant
    fn id(&self) -> Uuid {
        self.other_user.id
    }
}

/// Compact counter rendering: 1.5M, 1.2k, 2k, 999
pub fn format_count(n: u64) -> String {
    fn compact(n: u64, unit: u64, suffix: &str) -> String {
        let tenths = (n * 10 + unit / 2) / unit;
        if tenths % 10 == 0 {
            format!("{}{}", tenths / 10, suffix)
        } else {
            format!("{}.{}{}", tenths / 10, tenths % 10, suffix)
        }
    }

    if n >= 1_000_000 {
        compact(n, 1_000_000, "M")
    } else if n >= 1_000 {
        compact(n, 1_000, "k")
    } else {
        n.to_string()
    }
}

/// Public link to a single video
pub fn share_link(origin: &str, video_id: Uuid) -> String {
    format!("{}/#/video/{}", origin.trim_end_matches('/'), video_id)
}
