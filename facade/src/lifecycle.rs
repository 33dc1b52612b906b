//! Session Lifecycle
//!
//! ```text
//!     +------+   load_dataflow   +--------+   start   +---------+
//!     | Idle | ----------------> | Loaded | --------> | Running |
//!     +------+                   +--------+           +----+----+
//!                                    ^                     |
//!                                    |  load_dataflow      | stop
//!                                    |  / start       +----+----+
//!                                    +--------------- | Stopped |
//!                                                     +---------+
//! ```

/// Lifecycle state of a [`Facade`](crate::Facade) session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No dataflow loaded
    #[default]
    Idle,

    /// A component graph is installed, the network is not running
    Loaded,

    /// The network is running
    Running,

    /// The network was stopped; the graph is still installed
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Loaded => write!(f, "loaded"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

impl SessionState {
    /// Check if a dataflow can be (re)loaded
    pub fn can_load(&self) -> bool {
        !self.is_running()
    }

    /// Check if the network can be started
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Loaded | SessionState::Stopped)
    }

    /// Check if the network is running
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    /// Move to `next`, logging the transition
    pub fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self, to = %next, "Session state transition");
        *self = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::Running), "running");
        assert_eq!(format!("{}", SessionState::Idle), "idle");
    }

    #[test]
    fn test_session_state_transitions() {
        assert!(!SessionState::Idle.can_start());
        assert!(SessionState::Loaded.can_start());
        assert!(SessionState::Stopped.can_start());
        assert!(!SessionState::Running.can_start());
        assert!(!SessionState::Running.can_load());

        let mut state = SessionState::default();
        state.transition(SessionState::Loaded);
        assert_eq!(state, SessionState::Loaded);
    }
}
