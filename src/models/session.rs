//! Session lifecycle state.

use serde::Serialize;

/// Lifecycle state of a gateway session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed; no process launched.
    Unstarted,
    /// Launch or probe in progress.
    Starting,
    /// Gateway answered the liveness probe.
    Live,
    /// Torn down. Terminal.
    Stopped,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    ///
    /// A failed start falls back from `Starting` to `Unstarted` so the same
    /// session can retry. Stopping a session that never started is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Unstarted, SessionState::Starting)
                | (
                    SessionState::Starting,
                    SessionState::Live | SessionState::Unstarted
                )
                | (
                    SessionState::Unstarted | SessionState::Live,
                    SessionState::Stopped
                )
        )
    }
}
