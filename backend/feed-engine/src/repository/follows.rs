use super::created_or_existing;
use crate::error::RemoteResult;
use crate::remote::{DataService, Filter, Query, Table};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Repository for follow edges
#[derive(Clone)]
pub struct FollowRepository {
    remote: Arc<dyn DataService>,
}

impl FollowRepository {
    pub fn new(remote: Arc<dyn DataService>) -> Self {
        Self { remote }
    }

    fn edge(follower_id: Uuid, following_id: Uuid) -> Vec<Filter> {
        vec![
            Filter::eq_id("follower_id", follower_id),
            Filter::eq_id("following_id", following_id),
        ]
    }

    /// Create a follow edge; an existing edge counts as success
    pub async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> RemoteResult<bool> {
        let row = json!({ "follower_id": follower_id, "following_id": following_id });
        created_or_existing(self.remote.insert(Table::Follows, row).await)
    }

    pub async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> RemoteResult<bool> {
        let removed = self
            .remote
            .delete(Table::Follows, Self::edge(follower_id, following_id))
            .await?;
        Ok(removed > 0)
    }

    pub async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> RemoteResult<bool> {
        let mut query = Query::from(Table::Follows).columns(&["id"]).limit(1);
        query.filters = Self::edge(follower_id, following_id);
        Ok(!self.remote.select(query).await?.is_empty())
    }
}
