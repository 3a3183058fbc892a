//! Change feed transported over Redis Pub/Sub

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{ChangeEvent, ChangeFeed, ChannelScope, FeedStats, Result, StatsCollector, Subscription};

/// Subscriber side of the Redis change channels (`changes:<table>`)
///
/// Each subscription owns one pub/sub connection; filtering by row and kind
/// happens on receipt.
pub struct RedisChangeFeed {
    client: Client,
    stats: StatsCollector,
}

impl RedisChangeFeed {
    /// Create new change feed
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use change_feed::RedisChangeFeed;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), change_feed::ChangeFeedError> {
    /// let feed = RedisChangeFeed::new("redis://localhost:6379").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            stats: StatsCollector::new(),
        })
    }
}

#[async_trait]
impl ChangeFeed for RedisChangeFeed {
    async fn subscribe(&self, scope: ChannelScope) -> Result<Subscription> {
        let channel = scope.channel_name();
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        info!(channel = %channel, scope = %scope, "Subscribed to change events");
        self.stats.record_subscription();

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = self.stats.clone();
        let task_scope = scope.clone();

        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();

            while let Some(msg) = stream.next().await {
                let payload = match msg.get_payload::<String>() {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = ?e, "Failed to get change payload");
                        stats.record_decode_error();
                        continue;
                    }
                };

                let event: ChangeEvent = match serde_json::from_str(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        error!(error = ?e, payload = %payload, "Failed to deserialize change event");
                        stats.record_decode_error();
                        continue;
                    }
                };

                stats.record_receive();
                if !task_scope.accepts(&event) {
                    stats.record_filtered();
                    continue;
                }

                debug!(scope = %task_scope, kind = %event.kind, "Received change event");
                if tx.send(event).is_err() {
                    break;
                }
                stats.record_delivery();
            }

            warn!(scope = %task_scope, "Change subscription ended");
        });

        Ok(Subscription::new(scope, rx, task))
    }

    fn stats(&self) -> FeedStats {
        self.stats.snapshot()
    }
}
