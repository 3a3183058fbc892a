//! In-process change feed backed by a tokio broadcast channel

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::{ChangeEvent, ChangeFeed, ChannelScope, FeedStats, Result, StatsCollector, Subscription};

/// Change feed whose producer lives in the same process
///
/// Used by the in-memory data service and by tests; every published event is
/// fanned out to all open subscriptions and filtered per scope.
#[derive(Clone)]
pub struct LocalChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
    stats: StatsCollector,
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl LocalChangeFeed {
    /// Events buffered per subscriber before it is considered lagging
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            stats: StatsCollector::new(),
        }
    }

    /// Publish an event; returns the number of live subscriptions
    pub fn publish(&self, event: ChangeEvent) -> usize {
        debug!(table = %event.table, kind = %event.kind, "Publishing local change event");
        self.sender.send(event).unwrap_or(0)
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(&self, scope: ChannelScope) -> Result<Subscription> {
        let mut upstream = self.sender.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = self.stats.clone();
        let task_scope = scope.clone();

        stats.record_subscription();
        debug!(scope = %scope, "Opened local change subscription");

        let task = tokio::spawn(async move {
            loop {
                let event = match upstream.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(scope = %task_scope, skipped, "Change subscription lagged");
                        stats.record_lagged(skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                stats.record_receive();
                if !task_scope.accepts(&event) {
                    stats.record_filtered();
                    continue;
                }

                if tx.send(event).is_err() {
                    // Subscription dropped
                    break;
                }
                stats.record_delivery();
            }
            debug!(scope = %task_scope, "Local change subscription ended");
        });

        Ok(Subscription::new(scope, rx, task))
    }

    fn stats(&self) -> FeedStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeKind, RowFilter};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_delivers_only_matching_events_in_order() {
        let feed = LocalChangeFeed::default();
        let scope = ChannelScope::table("videos").with_filter(RowFilter::eq("user_id", "u1"));
        let mut sub = feed.subscribe(scope).await.unwrap();

        feed.publish(ChangeEvent::update("videos", json!({"id": "a", "user_id": "u1"})));
        feed.publish(ChangeEvent::update("videos", json!({"id": "b", "user_id": "u2"})));
        feed.publish(ChangeEvent::insert("videos", json!({"id": "c", "user_id": "u1"})));

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first.row()["id"], "a");
        assert_eq!(second.row()["id"], "c");
        assert_eq!(second.kind, ChangeKind::Insert);

        let stats = feed.stats();
        assert_eq!(stats.events_delivered, 2);
        assert_eq!(stats.events_filtered, 1);
    }

    #[tokio::test]
    async fn test_closed_subscription_receives_nothing() {
        let feed = LocalChangeFeed::default();
        let sub = feed.subscribe(ChannelScope::table("profiles")).await.unwrap();
        sub.close();

        // Give the forwarding task a chance to observe the abort
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(feed.publish(ChangeEvent::update("profiles", json!({"id": "p"}))), 0);
    }
}
