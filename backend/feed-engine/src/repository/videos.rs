use super::decode_rows;
use crate::domain::Video;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{DataService, Filter, Procedure, Query, Table};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Repository for videos and their server-side counters
#[derive(Clone)]
pub struct VideoRepository {
    remote: Arc<dyn DataService>,
}

/// `likes` row with its embedded video
#[derive(Deserialize)]
struct LikedVideoRow {
    videos: Option<Video>,
}

impl VideoRepository {
    pub fn new(remote: Arc<dyn DataService>) -> Self {
        Self { remote }
    }

    fn with_owner() -> Query {
        Query::from(Table::Videos).embed("profiles", "user_id", Table::Profiles)
    }

    /// Newest videos across all users
    pub async fn latest(&self, limit: usize) -> RemoteResult<Vec<Video>> {
        let rows = self
            .remote
            .select(Self::with_owner().order_desc("created_at").limit(limit))
            .await?;
        Ok(decode_rows(Table::Videos, rows))
    }

    /// Videos with at least `min_views`, most viewed first
    pub async fn trending(&self, min_views: u64, limit: usize) -> RemoteResult<Vec<Video>> {
        let rows = self
            .remote
            .select(
                Self::with_owner()
                    .gte("views_count", min_views)
                    .order_desc("views_count")
                    .limit(limit),
            )
            .await?;
        Ok(decode_rows(Table::Videos, rows))
    }

    /// Most viewed videos regardless of threshold
    pub async fn most_viewed(&self, limit: usize) -> RemoteResult<Vec<Video>> {
        let rows = self
            .remote
            .select(Self::with_owner().order_desc("views_count").limit(limit))
            .await?;
        Ok(decode_rows(Table::Videos, rows))
    }

    /// An owner's grid: pinned first, then newest first
    pub async fn by_owner(&self, owner_id: Uuid) -> RemoteResult<Vec<Video>> {
        let query = Self::with_owner()
            .eq_id("user_id", owner_id)
            .order_desc("pinned")
            .order_desc("created_at");

        match self.remote.select(query).await {
            Ok(rows) => Ok(decode_rows(Table::Videos, rows)),
            // Older schemas lack `pinned`; order locally instead
            Err(RemoteError::Status { status: 400, .. }) => {
                warn!(owner_id = %owner_id, "Pinned ordering rejected, sorting locally");
                let rows = self
                    .remote
                    .select(
                        Self::with_owner()
                            .eq_id("user_id", owner_id)
                            .order_desc("created_at"),
                    )
                    .await?;
                let mut videos: Vec<Video> = decode_rows(Table::Videos, rows);
                videos.sort_by(Video::grid_order);
                Ok(videos)
            }
            Err(e) => Err(e),
        }
    }

    /// Videos liked by a user, most recent like first
    pub async fn liked_by(&self, user_id: Uuid) -> RemoteResult<Vec<Video>> {
        let rows = self
            .remote
            .select(
                Query::from(Table::Likes)
                    .columns(&["video_id"])
                    .embed("videos", "video_id", Table::Videos)
                    .eq_id("user_id", user_id)
                    .order_desc("created_at"),
            )
            .await?;
        let liked: Vec<LikedVideoRow> = decode_rows(Table::Likes, rows);
        Ok(liked.into_iter().filter_map(|row| row.videos).collect())
    }

    pub async fn find(&self, video_id: Uuid) -> RemoteResult<Option<Video>> {
        let rows = self
            .remote
            .select(Self::with_owner().eq_id("id", video_id).limit(1))
            .await?;
        Ok(decode_rows(Table::Videos, rows).into_iter().next())
    }

    pub async fn set_pinned(&self, video_id: Uuid, pinned: bool) -> RemoteResult<()> {
        let touched = self
            .remote
            .update(
                Table::Videos,
                vec![Filter::eq_id("id", video_id)],
                json!({ "pinned": pinned }),
            )
            .await?;
        if touched == 0 {
            return Err(RemoteError::NotFound(format!("video {}", video_id)));
        }
        Ok(())
    }

    /// Delete a video; likes and comments go with it
    pub async fn delete(&self, video_id: Uuid) -> RemoteResult<()> {
        self.remote
            .delete(Table::Videos, vec![Filter::eq_id("id", video_id)])
            .await?;
        Ok(())
    }

    /// Run one of the counter procedures
    pub async fn adjust_counter(&self, procedure: Procedure, video_id: Uuid) -> RemoteResult<()> {
        self.remote.rpc(procedure, video_id).await
    }
}
