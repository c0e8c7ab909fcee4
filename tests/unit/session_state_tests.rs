//! Unit tests for session lifecycle transitions.

use spark_gateway::models::session::SessionState;

#[test]
fn forward_path_is_allowed() {
    assert!(SessionState::Unstarted.can_transition_to(SessionState::Starting));
    assert!(SessionState::Starting.can_transition_to(SessionState::Live));
    assert!(SessionState::Live.can_transition_to(SessionState::Stopped));
}

#[test]
fn failed_start_returns_to_unstarted() {
    assert!(SessionState::Starting.can_transition_to(SessionState::Unstarted));
}

#[test]
fn unstarted_session_may_stop() {
    assert!(SessionState::Unstarted.can_transition_to(SessionState::Stopped));
}

#[test]
fn stopped_is_terminal() {
    for next in [
        SessionState::Unstarted,
        SessionState::Starting,
        SessionState::Live,
        SessionState::Stopped,
    ] {
        assert!(!SessionState::Stopped.can_transition_to(next));
    }
}

#[test]
fn live_cannot_restart() {
    assert!(!SessionState::Live.can_transition_to(SessionState::Starting));
    assert!(!SessionState::Live.can_transition_to(SessionState::Unstarted));
}

#[test]
fn serializes_snake_case() {
    let json = serde_json::to_string(&SessionState::Live).expect("serialize");

    assert_eq!(json, "\"live\"");
}
