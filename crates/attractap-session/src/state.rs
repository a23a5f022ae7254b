//! Connection state machine of the session.
//!
//! # States
//!
//! - `Disconnected`: no transport; a connection attempt is due once the
//!   retry interval has passed
//! - `Connecting`: transport handshake in flight
//! - `Connected`: transport up, waiting out the ready delay
//! - `Authenticating`: auth or registration request sent
//! - `Authenticated`: the server accepted the reader
//! - `ErrorFailed`, `ErrorTimedOut`, `ErrorInvalidConfig`: recoverable; they
//!   relax to `Disconnected` once the retry window elapses
//!
//! # Valid Transitions
//!
//! - Disconnected → Connecting | ErrorInvalidConfig
//! - Connecting → Connected | ErrorFailed | ErrorTimedOut
//! - Connected → Authenticating | Authenticated (server answered before the
//!   ready delay ran out)
//! - Authenticating → Authenticated | ErrorFailed | ErrorTimedOut
//! - Authenticated → Authenticating (server asks again, or credentials were
//!   revoked)
//! - Connected | Authenticating | Authenticated → Disconnected | ErrorFailed
//! - Error* → Disconnected
//!
//! [`StateMachine::reset`] forces `Disconnected` from anywhere, for a server
//! change or shutdown.
//!
//! # Examples
//!
//! ```
//! use attractap_session::{SessionState, StateMachine};
//!
//! let mut machine = StateMachine::new();
//! machine.transition_to(SessionState::Connecting).unwrap();
//! machine.transition_to(SessionState::Connected).unwrap();
//! assert!(machine.transition_to(SessionState::Authenticated).is_err());
//! ```

use attractap_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Transitions kept for diagnostics.
const MAX_HISTORY_SIZE: usize = 32;

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    ErrorFailed,
    ErrorTimedOut,
    ErrorInvalidConfig,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Authenticating => "Authenticating",
            SessionState::Authenticated => "Authenticated",
            SessionState::ErrorFailed => "Error Failed",
            SessionState::ErrorTimedOut => "Error Timeout",
            SessionState::ErrorInvalidConfig => "Error Invalid Server",
        };
        f.write_str(state_str)
    }
}

impl SessionState {
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Disconnected, Connecting | ErrorInvalidConfig)
                | (Connecting, Connected | ErrorFailed | ErrorTimedOut)
                | (Connected, Authenticating | Authenticated)
                | (Authenticating, Authenticated | ErrorTimedOut)
                | (Authenticated, Authenticating)
                | (Connected | Authenticating | Authenticated, Disconnected | ErrorFailed)
                | (ErrorFailed | ErrorTimedOut | ErrorInvalidConfig, Disconnected)
        )
    }

    /// Whether a transport connection exists in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Authenticating | SessionState::Authenticated
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SessionState::ErrorFailed
                | SessionState::ErrorTimedOut
                | SessionState::ErrorInvalidConfig
        )
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    /// Why the state changed, for logs and the status line.
    pub reason: String,
    pub timestamp: Instant,
}

/// Session state plus entry time and a short history.
#[derive(Debug)]
pub struct StateMachine {
    current_state: SessionState,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SessionState::Disconnected,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> SessionState {
        self.current_state
    }

    pub fn state_entered_at(&self) -> Instant {
        self.state_entered_at
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Move to `new_state` if the edge exists.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` when `new_state` is not reachable from the
    /// current state.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<StateTransition> {
        self.transition_with_reason(new_state, new_state.to_string())
    }

    /// Like [`transition_to`](Self::transition_to), recording `reason`.
    pub fn transition_with_reason(
        &mut self,
        new_state: SessionState,
        reason: impl Into<String>,
    ) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::invalid_transition(self.current_state, new_state));
        }
        Ok(self.perform_state_change(new_state, reason.into()))
    }

    /// Force `Disconnected` regardless of the current state.
    pub fn reset(&mut self, reason: impl Into<String>) -> StateTransition {
        self.perform_state_change(SessionState::Disconnected, reason.into())
    }

    fn perform_state_change(&mut self, new_state: SessionState, reason: String) -> StateTransition {
        let now = Instant::now();
        let transition = StateTransition {
            from: self.current_state,
            to: new_state,
            reason,
            timestamp: now,
        };
        self.current_state = new_state;
        self.state_entered_at = now;

        self.history.push_back(transition.clone());
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        transition
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use SessionState::*;

    #[test]
    fn test_new_machine_starts_disconnected() {
        let machine = StateMachine::new();
        assert_eq!(machine.current_state(), Disconnected);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_full_connect_flow() {
        let mut machine = StateMachine::new();
        for state in [Connecting, Connected, Authenticating, Authenticated] {
            machine.transition_to(state).unwrap();
        }
        assert_eq!(machine.current_state(), Authenticated);
        assert_eq!(machine.history().len(), 4);
        assert_eq!(machine.history()[0].from, Disconnected);
    }

    #[rstest]
    #[case(Disconnected, Connected)]
    #[case(Disconnected, Authenticated)]
    #[case(Connecting, Authenticated)]
    #[case(Connecting, Authenticating)]
    #[case(ErrorFailed, Connecting)]
    #[case(ErrorTimedOut, Authenticated)]
    #[case(Disconnected, Disconnected)]
    fn test_invalid_transitions(#[case] from: SessionState, #[case] to: SessionState) {
        assert!(!from.can_transition_to(&to));
    }

    #[rstest]
    #[case(Disconnected, ErrorInvalidConfig)]
    #[case(Connecting, ErrorTimedOut)]
    #[case(Authenticating, ErrorTimedOut)]
    #[case(Connected, Authenticated)]
    #[case(Authenticated, Authenticating)]
    #[case(Authenticated, Disconnected)]
    #[case(ErrorInvalidConfig, Disconnected)]
    fn test_valid_transitions(#[case] from: SessionState, #[case] to: SessionState) {
        assert!(from.can_transition_to(&to));
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut machine = StateMachine::new();
        let error = machine.transition_to(Authenticated).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid state transition from Disconnected to Authenticated"
        );
        assert_eq!(machine.current_state(), Disconnected);
    }

    #[test]
    fn test_reset_from_anywhere() {
        let mut machine = StateMachine::new();
        machine.transition_to(Connecting).unwrap();
        let transition = machine.reset("server changed");
        assert_eq!(transition.from, Connecting);
        assert_eq!(transition.reason, "server changed");
        assert_eq!(machine.current_state(), Disconnected);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = StateMachine::new();
        for _ in 0..50 {
            machine.transition_to(Connecting).unwrap();
            machine.transition_to(ErrorFailed).unwrap();
            machine.transition_to(Disconnected).unwrap();
        }
        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
    }

    #[rstest]
    #[case(Disconnected, "Disconnected")]
    #[case(Authenticated, "Authenticated")]
    #[case(ErrorFailed, "Error Failed")]
    #[case(ErrorTimedOut, "Error Timeout")]
    #[case(ErrorInvalidConfig, "Error Invalid Server")]
    fn test_status_strings(#[case] state: SessionState, #[case] expected: &str) {
        assert_eq!(state.to_string(), expected);
    }

    fn any_state() -> impl Strategy<Value = SessionState> {
        prop_oneof![
            Just(Disconnected),
            Just(Connecting),
            Just(Connected),
            Just(Authenticating),
            Just(Authenticated),
            Just(ErrorFailed),
            Just(ErrorTimedOut),
            Just(ErrorInvalidConfig),
        ]
    }

    proptest! {
        #[test]
        fn prop_history_follows_valid_edges(targets in prop::collection::vec(any_state(), 0..64)) {
            let mut machine = StateMachine::new();
            for target in targets {
                let before = machine.current_state();
                match machine.transition_to(target) {
                    Ok(transition) => {
                        prop_assert!(before.can_transition_to(&target));
                        prop_assert_eq!(transition.from, before);
                        prop_assert_eq!(machine.current_state(), target);
                    }
                    Err(_) => {
                        prop_assert_eq!(machine.current_state(), before);
                    }
                }
            }

            let history = machine.history();
            prop_assert!(history.len() <= MAX_HISTORY_SIZE);
            for pair in history.iter().collect::<Vec<_>>().windows(2) {
                prop_assert_eq!(pair[0].to, pair[1].from);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_in_state() {
        let mut machine = StateMachine::new();
        machine.transition_to(Connecting).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(machine.time_in_current_state(), Duration::from_millis(250));
    }
}
