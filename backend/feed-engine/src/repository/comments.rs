use super::decode_rows;
use crate::domain::Comment;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{DataService, Query, Table};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Repository for video comments
#[derive(Clone)]
pub struct CommentRepository {
    remote: Arc<dyn DataService>,
}

impl CommentRepository {
    pub fn new(remote: Arc<dyn DataService>) -> Self {
        Self { remote }
    }

    /// Comments on a video, newest first, with author profiles
    pub async fn for_video(&self, video_id: Uuid) -> RemoteResult<Vec<Comment>> {
        let rows = self
            .remote
            .select(
                Query::from(Table::Comments)
                    .embed("profiles", "user_id", Table::Profiles)
                    .eq_id("video_id", video_id)
                    .order_desc("created_at"),
            )
            .await?;
        Ok(decode_rows(Table::Comments, rows))
    }

    pub async fn post(&self, video_id: Uuid, user_id: Uuid, text: &str) -> RemoteResult<Comment> {
        let row = self
            .remote
            .insert(
                Table::Comments,
                json!({ "video_id": video_id, "user_id": user_id, "text": text }),
            )
            .await?;
        serde_json::from_value(row).map_err(RemoteError::from)
    }
}
