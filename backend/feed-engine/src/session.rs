//! Viewing session and viewer identity
//!
//! Authentication itself happens outside the engine; the host hands over the
//! resulting viewer id (or none) when it builds a session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one viewing session (one app launch / tab lifetime)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    viewer: Option<Uuid>,
}

impl Session {
    pub fn authenticated(viewer: Uuid) -> Self {
        Self {
            id: SessionId::new(),
            viewer: Some(viewer),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            id: SessionId::new(),
            viewer: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn viewer(&self) -> Option<Uuid> {
        self.viewer
    }

    pub fn is_viewer(&self, user_id: Uuid) -> bool {
        self.viewer == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_distinct() {
        let viewer = Uuid::new_v4();
        let a = Session::authenticated(viewer);
        let b = Session::authenticated(viewer);

        assert_ne!(a.id(), b.id());
        assert!(a.is_viewer(viewer));
        assert!(!Session::anonymous().is_viewer(viewer));
    }
}
