//! First-write-wins terminal state latch.
//!
//! Every trigger that can end a session (predicate satisfied, timer, child
//! exit, cancellation, fatal error) commits its terminal state through
//! [`SessionLatch::finish`]. The atomic compare-and-set guarantees exactly one
//! winner even when two triggers race; only the winner performs teardown.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::models::session::SessionState;

/// Atomic holder of a session's [`SessionState`].
#[derive(Debug)]
pub struct SessionLatch {
    state: AtomicU8,
}

impl SessionLatch {
    /// New latch in [`SessionState::NotStarted`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::NotStarted as u8),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Failed)
    }

    /// Move `NotStarted` to `Running`. Returns `true` only for the call that
    /// performed the transition.
    pub fn start(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::NotStarted as u8,
                SessionState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Commit `terminal` if no terminal state has been committed yet.
    ///
    /// Returns the state that was replaced when this call wins, or `None`
    /// when another trigger already ended the session (or `terminal` is not
    /// a terminal state).
    pub fn finish(&self, terminal: SessionState) -> Option<SessionState> {
        if !terminal.is_terminal() {
            return None;
        }

        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let previous = SessionState::from_u8(current)?;
            if previous.is_terminal() {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// `true` once a terminal state has been committed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }
}

impl Default for SessionLatch {
    fn default() -> Self {
        Self::new()
    }
}
