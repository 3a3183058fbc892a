use super::decode_rows;
use crate::domain::Message;
use crate::error::RemoteResult;
use crate::remote::{DataService, Filter, Query, Table};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Repository for direct messages
#[derive(Clone)]
pub struct MessageRepository {
    remote: Arc<dyn DataService>,
}

impl MessageRepository {
    pub fn new(remote: Arc<dyn DataService>) -> Self {
        Self { remote }
    }

    /// Messages exchanged by `me` and `other`, oldest first
    pub async fn between(&self, me: Uuid, other: Uuid) -> RemoteResult<Vec<Message>> {
        let direction = |from: Uuid, to: Uuid| {
            Filter::And(vec![
                Filter::eq_id("sender_id", from),
                Filter::eq_id("receiver_id", to),
            ])
        };
        let rows = self
            .remote
            .select(
                Query::from(Table::Messages)
                    .filter(Filter::Or(vec![direction(me, other), direction(other, me)]))
                    .order_asc("created_at"),
            )
            .await?;
        Ok(decode_rows(Table::Messages, rows))
    }

    /// Every message `me` sent or received, newest first, with both profiles
    pub async fn involving(&self, me: Uuid) -> RemoteResult<Vec<Message>> {
        let rows = self
            .remote
            .select(
                Query::from(Table::Messages)
                    .embed("sender", "sender_id", Table::Profiles)
                    .embed("receiver", "receiver_id", Table::Profiles)
                    .filter(Filter::Or(vec![
                        Filter::eq_id("sender_id", me),
                        Filter::eq_id("receiver_id", me),
                    ]))
                    .order_desc("created_at"),
            )
            .await?;
        Ok(decode_rows(Table::Messages, rows))
    }

    pub async fn send(&self, sender_id: Uuid, receiver_id: Uuid, content: &str) -> RemoteResult<()> {
        self.remote
            .insert(
                Table::Messages,
                json!({
                    "sender_id": sender_id,
                    "receiver_id": receiver_id,
                    "content": content,
                }),
            )
            .await?;
        Ok(())
    }
}
