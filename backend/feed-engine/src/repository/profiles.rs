use super::decode_rows;
use crate::domain::Profile;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{DataService, Query, Table};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Repository for user profiles
#[derive(Clone)]
pub struct ProfileRepository {
    remote: Arc<dyn DataService>,
}

/// Placeholder handle for a profile created client-side: `user` + 6 digits
pub fn generated_username() -> String {
    format!("user{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Deterministic avatar for a generated username
pub fn generated_avatar_url(username: &str) -> String {
    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={}", username)
}

impl ProfileRepository {
    pub fn new(remote: Arc<dyn DataService>) -> Self {
        Self { remote }
    }

    pub async fn find(&self, user_id: Uuid) -> RemoteResult<Option<Profile>> {
        let rows = self
            .remote
            .select(Query::from(Table::Profiles).eq_id("id", user_id).limit(1))
            .await?;
        Ok(decode_rows(Table::Profiles, rows).into_iter().next())
    }

    /// Load the signed-in user's profile, creating it when provisioning missed it
    pub async fn ensure_profile(&self, user_id: Uuid) -> RemoteResult<Profile> {
        if let Some(profile) = self.find(user_id).await? {
            return Ok(profile);
        }

        let username = generated_username();
        warn!(user_id = %user_id, username = %username, "Profile missing, creating one");
        let row = json!({
            "id": user_id,
            "username": username,
            "avatar_url": generated_avatar_url(&username),
        });

        match self.remote.insert(Table::Profiles, row).await {
            Ok(row) => {
                info!(user_id = %user_id, "Profile created");
                Ok(serde_json::from_value(row)?)
            }
            // Lost a race with the provisioning trigger
            Err(e) if e.is_conflict() => self
                .find(user_id)
                .await?
                .ok_or_else(|| RemoteError::NotFound(format!("profile {}", user_id))),
            Err(e) => Err(e),
        }
    }

    /// Case-insensitive username search
    pub async fn search(&self, term: &str, limit: usize) -> RemoteResult<Vec<Profile>> {
        let rows = self
            .remote
            .select(
                Query::from(Table::Profiles)
                    .ilike("username", format!("%{}%", term))
                    .limit(limit),
            )
            .await?;
        Ok(decode_rows(Table::Profiles, rows))
    }
}
