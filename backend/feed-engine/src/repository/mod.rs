pub mod comments;
pub mod follows;
pub mod likes;
pub mod messages;
pub mod profiles;
pub mod stories;
pub mod videos;

pub use comments::CommentRepository;
pub use follows::FollowRepository;
pub use likes::LikeRepository;
pub use messages::MessageRepository;
pub use profiles::ProfileRepository;
pub use stories::StoryRepository;
pub use videos::VideoRepository;

use crate::remote::Table;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Decode rows, skipping (and logging) any that do not fit the model
pub(crate) fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(table = %table, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect()
}

/// Treat a unique-constraint conflict as "already there"
pub(crate) fn created_or_existing(
    result: crate::error::RemoteResult<Value>,
) -> crate::error::RemoteResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}
