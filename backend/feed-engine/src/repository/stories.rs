use super::decode_rows;
use crate::domain::Story;
use crate::error::RemoteResult;
use crate::remote::{DataService, Query, Table};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Repository for stories
#[derive(Clone)]
pub struct StoryRepository {
    remote: Arc<dyn DataService>,
}

impl StoryRepository {
    pub fn new(remote: Arc<dyn DataService>) -> Self {
        Self { remote }
    }

    fn active(owner_id: Uuid, now: DateTime<Utc>) -> Query {
        Query::from(Table::Stories)
            .eq_id("user_id", owner_id)
            .gt("expires_at", now.to_rfc3339())
    }

    /// Non-expired stories of one owner, oldest first
    pub async fn active_for(&self, owner_id: Uuid, now: DateTime<Utc>) -> RemoteResult<Vec<Story>> {
        let rows = self
            .remote
            .select(
                Self::active(owner_id, now)
                    .embed("profiles", "user_id", Table::Profiles)
                    .order_asc("created_at"),
            )
            .await?;
        Ok(decode_rows(Table::Stories, rows))
    }

    /// Whether the owner has any story to show (avatar ring)
    pub async fn has_active(&self, owner_id: Uuid, now: DateTime<Utc>) -> RemoteResult<bool> {
        Ok(self.remote.count(Self::active(owner_id, now)).await? > 0)
    }

    /// Record an uploaded story clip; expiry is set by the service
    pub async fn create(&self, owner_id: Uuid, video_url: &str) -> RemoteResult<()> {
        self.remote
            .insert(
                Table::Stories,
                json!({ "user_id": owner_id, "video_url": video_url }),
            )
            .await?;
        Ok(())
    }
}
