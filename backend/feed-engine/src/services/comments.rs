use crate::domain::Comment;
use crate::error::{FeedError, ServiceResult};
use crate::remote::DataService;
use crate::repository::CommentRepository;
use crate::session::Session;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Comment thread under a video
#[derive(Clone)]
pub struct CommentService {
    session: Session,
    comments: CommentRepository,
}

impl CommentService {
    pub fn new(session: Session, remote: Arc<dyn DataService>) -> Self {
        Self {
            session,
            comments: CommentRepository::new(remote),
        }
    }

    /// Newest first
    pub async fn list(&self, video_id: Uuid) -> ServiceResult<Vec<Comment>> {
        Ok(self.comments.for_video(video_id).await?)
    }

    pub async fn post(&self, video_id: Uuid, text: &str) -> ServiceResult<Comment> {
        let user_id = self.session.viewer().ok_or(FeedError::Unauthenticated)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::InvalidInput("comment is empty".to_string()));
        }

        self.comments
            .post(video_id, user_id, text)
            .await
            .map_err(|e| {
                warn!(video_id = %video_id, error = %e, "Failed to post comment");
                FeedError::from(e)
            })
    }
}
