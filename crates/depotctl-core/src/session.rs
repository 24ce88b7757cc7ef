//! Session lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DepotError, Result};

/// Lifecycle of one external tool process.
///
/// ```text
/// NotStarted -> Launching -> AwaitingLogin -> [AwaitingSecondFactor]* -> Authenticated
///     -> RunningOperation -> Completed { success }
/// any state -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Launching,
    AwaitingLogin,
    AwaitingSecondFactor,
    Authenticated,
    RunningOperation,
    Completed { success: bool },
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotStarted => "not_started",
            SessionState::Launching => "launching",
            SessionState::AwaitingLogin => "awaiting_login",
            SessionState::AwaitingSecondFactor => "awaiting_second_factor",
            SessionState::Authenticated => "authenticated",
            SessionState::RunningOperation => "running_operation",
            SessionState::Completed { success: true } => "completed",
            SessionState::Completed { success: false } => "failed",
            SessionState::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed { .. } | SessionState::Closed)
    }

    /// Whether `self -> next` is an allowed edge.
    pub fn can_transition(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (*self, next) {
            (_, Closed) => true,
            (NotStarted, Launching) => true,
            (Launching, AwaitingLogin) => true,
            (Launching, Completed { success: false }) => true,
            (AwaitingLogin, AwaitingSecondFactor) => true,
            (AwaitingLogin, Authenticated) => true,
            (AwaitingLogin, Completed { success: false }) => true,
            // Re-prompt after a rejected code
            (AwaitingSecondFactor, AwaitingSecondFactor) => true,
            (AwaitingSecondFactor, Authenticated) => true,
            (AwaitingSecondFactor, Completed { success: false }) => true,
            (Authenticated, RunningOperation) => true,
            (Authenticated, Completed { .. }) => true,
            (RunningOperation, Completed { .. }) => true,
            _ => false,
        }
    }

    /// Returns `next` if the edge is allowed, else `InvalidTransition`.
    pub fn transition(&self, next: SessionState) -> Result<SessionState> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(DepotError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = NotStarted;
        for next in [
            Launching,
            AwaitingLogin,
            AwaitingSecondFactor,
            AwaitingSecondFactor,
            Authenticated,
            RunningOperation,
            Completed { success: true },
            Closed,
        ] {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, Closed);
    }

    #[test]
    fn test_cannot_skip_login() {
        let err = AwaitingLogin.transition(RunningOperation).unwrap_err();
        assert!(matches!(err, DepotError::InvalidTransition { .. }));
        assert!(!Closed.can_transition(Launching));
    }

    #[test]
    fn test_close_from_anywhere() {
        for state in [NotStarted, Launching, AwaitingSecondFactor, RunningOperation, Closed] {
            assert!(state.can_transition(Closed));
        }
    }
}
