//! Error types for the feed engine

use thiserror::Error;

/// Failure reported by the remote data service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unique-constraint violation (duplicate edge or username)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Remote status {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure injected by the in-memory data service
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl RemoteError {
    /// Postgres unique_violation
    pub const UNIQUE_VIOLATION: &'static str = "23505";
    /// PostgREST "no rows" for single-row reads
    pub const NO_ROWS: &'static str = "PGRST116";

    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

/// Why an engagement mutation did not (or could not) go through
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngagementError {
    #[error("A {0} change is already in progress")]
    InFlight(crate::services::engagement::MutationKind),

    #[error("Item {0} is not tracked")]
    NotTracked(uuid::Uuid),

    #[error("Only the owner can do that")]
    NotOwner,

    #[error("Cannot follow yourself")]
    SelfFollow,

    #[error("Sign in required")]
    Unauthenticated,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Change feed error: {0}")]
    ChangeFeed(#[from] change_feed::ChangeFeedError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, FeedError>;

/// Result type alias for remote data calls
pub type RemoteResult<T> = Result<T, RemoteError>;
