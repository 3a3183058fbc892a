//! Optimistic mutation protocol
//!
//! Every engagement toggle runs the same three phases:
//! 1. apply the inverted state (and its counter delta) locally, under a guard
//!    keyed by `(kind, target)` so a second toggle on the same key is rejected;
//! 2. commit remotely, reverting the local change if the commit fails;
//! 3. release the guard, whatever happened.

use super::EngagementError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Like,
    Follow,
    Pin,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Like => write!(f, "like"),
            MutationKind::Follow => write!(f, "follow"),
            MutationKind::Pin => write!(f, "pin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationKey {
    pub kind: MutationKind,
    pub target: Uuid,
}

impl MutationKey {
    pub fn new(kind: MutationKind, target: Uuid) -> Self {
        Self { kind, target }
    }
}

/// Result of one toggle, as seen by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Remote accepted the change; `active` is the new state
    Committed { active: bool },
    /// Nothing was changed
    Rejected(EngagementError),
    /// Applied locally, then rolled back
    Reverted {
        error: EngagementError,
        /// User-facing message, for mutations that surface failures
        notice: Option<String>,
    },
}

impl MutationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed { .. })
    }

    pub fn notice(&self) -> Option<&str> {
        match self {
            MutationOutcome::Reverted { notice, .. } => notice.as_deref(),
            _ => None,
        }
    }
}

/// Set of `(kind, target)` pairs with a mutation in flight
#[derive(Clone, Default)]
pub struct InFlightGuards {
    active: Arc<Mutex<HashSet<MutationKey>>>,
}

impl InFlightGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` when another mutation holds it
    pub fn try_acquire(&self, key: MutationKey) -> Option<InFlightTicket> {
        if self.active.lock().insert(key) {
            Some(InFlightTicket {
                active: self.active.clone(),
                key,
            })
        } else {
            None
        }
    }

    pub fn is_in_flight(&self, key: MutationKey) -> bool {
        self.active.lock().contains(&key)
    }
}

/// Releases its key when dropped
pub struct InFlightTicket {
    active: Arc<Mutex<HashSet<MutationKey>>>,
    key: MutationKey,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

/// Run one optimistic mutation against `state`.
///
/// `apply` flips the local state and returns the new value plus an undo
/// record; `commit` performs the remote write for that value; `revert`
/// restores the undo record. `publish` is called after every local change.
pub(crate) async fn run<S, U, Fut>(
    state: &Mutex<S>,
    guards: &InFlightGuards,
    key: MutationKey,
    apply: impl FnOnce(&mut S) -> Result<(bool, U), EngagementError>,
    commit: impl FnOnce(bool) -> Fut,
    revert: impl FnOnce(&mut S, U),
    publish: impl Fn(&S),
) -> MutationOutcome
where
    Fut: Future<Output = Result<(), EngagementError>>,
{
    let ticket = match guards.try_acquire(key) {
        Some(ticket) => ticket,
        None => {
            debug!(kind = %key.kind, target = %key.target, "Mutation already in flight");
            return MutationOutcome::Rejected(EngagementError::InFlight(key.kind));
        }
    };

    let (target, undo) = {
        let mut state = state.lock();
        match apply(&mut *state) {
            Ok(applied) => {
                publish(&*state);
                applied
            }
            Err(error) => return MutationOutcome::Rejected(error),
        }
    };

    let outcome = match commit(target).await {
        Ok(()) => MutationOutcome::Committed { active: target },
        Err(error) => {
            let mut state = state.lock();
            revert(&mut *state, undo);
            publish(&*state);
            MutationOutcome::Reverted {
                error,
                notice: None,
            }
        }
    };

    drop(ticket);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MutationKey {
        MutationKey::new(MutationKind::Like, Uuid::nil())
    }

    #[test]
    fn test_ticket_releases_on_drop() {
        let guards = InFlightGuards::new();
        let ticket = guards.try_acquire(key()).unwrap();

        assert!(guards.is_in_flight(key()));
        assert!(guards.try_acquire(key()).is_none());
        // Different kind, same target
        assert!(guards
            .try_acquire(MutationKey::new(MutationKind::Pin, Uuid::nil()))
            .is_some());

        drop(ticket);
        assert!(!guards.is_in_flight(key()));
    }

    #[tokio::test]
    async fn test_failed_commit_reverts_and_releases() {
        let state = Mutex::new(false);
        let guards = InFlightGuards::new();
        let publishes = Mutex::new(Vec::new());

        let outcome = run(
            &state,
            &guards,
            key(),
            |s| {
                let undo = *s;
                *s = !*s;
                Ok((*s, undo))
            },
            |_| async { Err(EngagementError::Unauthenticated) },
            |s, undo| *s = undo,
            |s| publishes.lock().push(*s),
        )
        .await;

        assert_eq!(
            outcome,
            MutationOutcome::Reverted {
                error: EngagementError::Unauthenticated,
                notice: None
            }
        );
        assert!(!*state.lock());
        assert_eq!(*publishes.lock(), vec![true, false]);
        assert!(!guards.is_in_flight(key()));
    }

    #[tokio::test]
    async fn test_rejected_apply_leaves_state() {
        let state = Mutex::new(7u64);
        let guards = InFlightGuards::new();

        let outcome = run(
            &state,
            &guards,
            key(),
            |_| Err::<(bool, ()), _>(EngagementError::NotOwner),
            |_| async { Ok(()) },
            |_, _| {},
            |_| {},
        )
        .await;

        assert_eq!(outcome, MutationOutcome::Rejected(EngagementError::NotOwner));
        assert_eq!(*state.lock(), 7);
        assert!(!guards.is_in_flight(key()));
    }
}
