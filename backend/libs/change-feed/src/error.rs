//! Error types for change feed operations

use thiserror::Error;

/// Change feed errors
#[derive(Error, Debug)]
pub enum ChangeFeedError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid message or filter format received
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// The feed no longer accepts subscriptions
    #[error("Change feed closed: {0}")]
    Closed(String),
}
