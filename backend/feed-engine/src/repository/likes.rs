use super::created_or_existing;
use crate::error::RemoteResult;
use crate::remote::{DataService, Filter, Query, Table};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Repository for like edges
#[derive(Clone)]
pub struct LikeRepository {
    remote: Arc<dyn DataService>,
}

impl LikeRepository {
    pub fn new(remote: Arc<dyn DataService>) -> Self {
        Self { remote }
    }

    fn edge(user_id: Uuid, video_id: Uuid) -> Vec<Filter> {
        vec![
            Filter::eq_id("user_id", user_id),
            Filter::eq_id("video_id", video_id),
        ]
    }

    /// Create a like (idempotent - a duplicate edge counts as success)
    /// Returns true only when a new edge was written
    pub async fn create_like(&self, user_id: Uuid, video_id: Uuid) -> RemoteResult<bool> {
        let row = json!({ "user_id": user_id, "video_id": video_id });
        created_or_existing(self.remote.insert(Table::Likes, row).await)
    }

    /// Delete a like; returns whether an edge existed
    pub async fn delete_like(&self, user_id: Uuid, video_id: Uuid) -> RemoteResult<bool> {
        let removed = self
            .remote
            .delete(Table::Likes, Self::edge(user_id, video_id))
            .await?;
        Ok(removed > 0)
    }

    pub async fn check_user_liked(&self, user_id: Uuid, video_id: Uuid) -> RemoteResult<bool> {
        let mut query = Query::from(Table::Likes).columns(&["id"]).limit(1);
        query.filters = Self::edge(user_id, video_id);
        Ok(!self.remote.select(query).await?.is_empty())
    }
}
