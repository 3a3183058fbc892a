//! Direct messages: inbox projection and two-party chat

use crate::domain::{Conversation, Message};
use crate::error::{FeedError, ServiceResult};
use crate::remote::DataService;
use crate::repository::MessageRepository;
use crate::session::Session;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Latest message per counterpart, newest conversation first.
///
/// Messages without the counterpart's profile embedded are skipped.
pub fn project_conversations(me: Uuid, messages: &[Message]) -> Vec<Conversation> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter_map(|message| {
            let (other_id, other) = message.counterpart(me)?;
            if !seen.insert(other_id) {
                return None;
            }
            Some(Conversation {
                other_user: other?.clone(),
                last_message: message.clone(),
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct InboxService {
    session: Session,
    messages: MessageRepository,
}

impl InboxService {
    pub fn new(session: Session, remote: Arc<dyn DataService>) -> Self {
        Self {
            session,
            messages: MessageRepository::new(remote),
        }
    }

    fn viewer(&self) -> ServiceResult<Uuid> {
        self.session.viewer().ok_or(FeedError::Unauthenticated)
    }

    pub async fn conversations(&self) -> ServiceResult<Vec<Conversation>> {
        let me = self.viewer()?;
        let messages = self.messages.involving(me).await?;
        Ok(project_conversations(me, &messages))
    }

    /// Full history with one user, oldest first
    pub async fn chat(&self, partner: Uuid) -> ServiceResult<Vec<Message>> {
        let me = self.viewer()?;
        Ok(self.messages.between(me, partner).await?)
    }

    pub async fn send(&self, partner: Uuid, content: &str) -> ServiceResult<()> {
        let me = self.viewer()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(FeedError::InvalidInput("message is empty".to_string()));
        }

        self.messages
            .send(me, partner, content)
            .await
            .map_err(|e| {
                warn!(receiver_id = %partner, error = %e, "Failed to send message");
                FeedError::from(e)
            })?;
        info!(receiver_id = %partner, "Message sent");
        Ok(())
    }
}
