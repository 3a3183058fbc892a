//! Row-level change feed consumed by the feed engine
//!
//! The remote data service publishes one notification per committed row change.
//! Consumers open a subscription scoped by table, optional row filter and
//! optional event kind, and receive matching events in FIFO order.
//!
//! # Architecture
//!
//! ```text
//! Remote data service:
//!   1. UPDATE videos SET likes_count = 12 WHERE id = 'v1'
//!   2. Publish change notification:
//!      PUBLISH changes:videos {"eventType": "UPDATE", "table": "videos", "new": {...}}
//!      ↓
//! Transport (Redis Pub/Sub, or in-process broadcast)
//!      ↓
//! Feed engine:
//!   3. Subscription for scope `videos / user_id=eq.u1 / UPDATE`
//!   4. Event decoded, filtered against the scope, delivered to the consumer
//! ```
//!
//! # Example: Subscriber
//!
//! ```no_run
//! use change_feed::{ChangeFeed, ChangeKind, ChannelScope, RedisChangeFeed, RowFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), change_feed::ChangeFeedError> {
//!     let feed = RedisChangeFeed::new("redis://localhost:6379").await?;
//!
//!     let scope = ChannelScope::table("videos")
//!         .with_filter(RowFilter::eq("user_id", "u1"))
//!         .only(ChangeKind::Update);
//!
//!     let mut subscription = feed.subscribe(scope).await?;
//!     while let Some(event) = subscription.next().await {
//!         println!("{} on {}: {}", event.kind, event.table, event.row());
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

mod error;
pub mod helpers;
mod local;
mod redis_feed;
mod stats;

pub use error::ChangeFeedError;
pub use helpers::{build_channel_name, parse_channel_name, parse_row_filter};
pub use local::LocalChangeFeed;
pub use redis_feed::RedisChangeFeed;
pub use stats::{FeedStats, StatsCollector};

type Result<T> = std::result::Result<T, ChangeFeedError>;

/// Kind of row change carried by a notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = ChangeFeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            other => Err(ChangeFeedError::InvalidMessage(format!(
                "Unknown change kind: {}",
                other
            ))),
        }
    }
}

/// Equality filter on a single column, written `column=eq.value` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Whether the row carries `column` with a value equal to the filter value.
    ///
    /// Non-string JSON scalars are compared by their textual form.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl std::fmt::Display for RowFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// What a single subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelScope {
    pub table: String,
    pub filter: Option<RowFilter>,
    /// `None` listens to every kind (`*`)
    pub kind: Option<ChangeKind>,
}

impl ChannelScope {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            kind: None,
        }
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Transport channel carrying this scope's table
    pub fn channel_name(&self) -> String {
        build_channel_name(&self.table)
    }

    /// Decide whether an event belongs to this scope
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        match &self.filter {
            Some(filter) => filter.matches(event.row()),
            None => true,
        }
    }
}

impl std::fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self
            .kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "*".to_string());
        match &self.filter {
            Some(filter) => write!(f, "{}[{}]:{}", self.table, filter, kind),
            None => write!(f, "{}:{}", self.table, kind),
        }
    }
}

/// Row change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    pub table: String,
    /// Row after the change (empty object for deletes)
    #[serde(rename = "new", default)]
    pub new_row: Value,
    /// Row before the change (primary key only unless replica identity is full)
    #[serde(rename = "old", default)]
    pub old_row: Value,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self::new(ChangeKind::Insert, table, row, Value::Null)
    }

    pub fn update(table: impl Into<String>, row: Value) -> Self {
        Self::new(ChangeKind::Update, table, row, Value::Null)
    }

    pub fn delete(table: impl Into<String>, old_row: Value) -> Self {
        Self::new(ChangeKind::Delete, table, Value::Null, old_row)
    }

    fn new(kind: ChangeKind, table: impl Into<String>, new_row: Value, old_row: Value) -> Self {
        Self {
            kind,
            table: table.into(),
            new_row,
            old_row,
            commit_timestamp: Some(Utc::now()),
        }
    }

    /// The row an event is about: the new row, or the old one for deletes
    pub fn row(&self) -> &Value {
        match self.kind {
            ChangeKind::Delete => &self.old_row,
            ChangeKind::Insert | ChangeKind::Update => &self.new_row,
        }
    }
}

/// Live subscription to one scope
///
/// Dropping the subscription stops delivery and aborts the forwarding task.
pub struct Subscription {
    scope: ChannelScope,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(
        scope: ChannelScope,
        receiver: mpsc::UnboundedReceiver<ChangeEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            scope,
            receiver,
            task: Some(task),
        }
    }

    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    /// Next event, or `None` once the transport has gone away
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Stop delivery; events already queued are discarded
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.receiver.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl futures_util::Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Source of scoped change notifications
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, scope: ChannelScope) -> Result<Subscription>;

    fn stats(&self) -> FeedStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_kind_display() {
        assert_eq!(ChangeKind::Insert.to_string(), "INSERT");
        assert_eq!(ChangeKind::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_change_kind_from_str() {
        assert_eq!("update".parse::<ChangeKind>().unwrap(), ChangeKind::Update);
        assert!("upsert".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn test_row_filter_matches_strings_and_scalars() {
        let row = json!({"user_id": "u1", "pinned": true, "views_count": 7});

        assert!(RowFilter::eq("user_id", "u1").matches(&row));
        assert!(!RowFilter::eq("user_id", "u2").matches(&row));
        assert!(RowFilter::eq("pinned", true).matches(&row));
        assert!(RowFilter::eq("views_count", 7).matches(&row));
        assert!(!RowFilter::eq("missing", "x").matches(&row));
    }

    #[test]
    fn test_scope_accepts_table_kind_and_filter() {
        let scope = ChannelScope::table("videos")
            .with_filter(RowFilter::eq("user_id", "u1"))
            .only(ChangeKind::Update);

        let hit = ChangeEvent::update("videos", json!({"id": "v1", "user_id": "u1"}));
        let wrong_owner = ChangeEvent::update("videos", json!({"id": "v2", "user_id": "u2"}));
        let wrong_kind = ChangeEvent::insert("videos", json!({"id": "v3", "user_id": "u1"}));
        let wrong_table = ChangeEvent::update("stories", json!({"id": "s1", "user_id": "u1"}));

        assert!(scope.accepts(&hit));
        assert!(!scope.accepts(&wrong_owner));
        assert!(!scope.accepts(&wrong_kind));
        assert!(!scope.accepts(&wrong_table));
    }

    #[test]
    fn test_delete_filters_on_old_row() {
        let scope = ChannelScope::table("stories").with_filter(RowFilter::eq("user_id", "u1"));
        let event = ChangeEvent::delete("stories", json!({"id": "s1", "user_id": "u1"}));

        assert_eq!(event.row()["id"], "s1");
        assert!(scope.accepts(&event));
    }

    #[test]
    fn test_event_wire_format() {
        let payload = r#"{
            "eventType": "UPDATE",
            "table": "profiles",
            "new": {"id": "p1", "bio": "hi"},
            "old": {"id": "p1"},
            "commit_timestamp": "2024-05-01T10:00:00Z"
        }"#;

        let event: ChangeEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.table, "profiles");
        assert_eq!(event.new_row["bio"], "hi");
        assert!(event.commit_timestamp.is_some());
    }

    #[test]
    fn test_scope_display() {
        let scope = ChannelScope::table("videos").with_filter(RowFilter::eq("user_id", "u1"));
        assert_eq!(scope.to_string(), "videos[user_id=eq.u1]:*");
    }
}
