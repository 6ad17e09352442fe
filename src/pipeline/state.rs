//! Session state management

/// Session lifecycle state machine
///
/// `Idle -> Active -> Finalizing -> Closed`, and `Closed -> Active` when a new
/// session is started after the previous one has been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started yet
    Idle,

    /// Source and sink are running, frames are being processed
    Active,

    /// Frame budget reached, waiting for the sink to flush
    Finalizing,

    /// Resources released, counters reset
    Closed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Idle, Active) | (Closed, Active) | (Active, Finalizing) | (Finalizing, Closed)
        )
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Finalizing => "finalizing",
            SessionState::Closed => "closed",
        }
    }

    /// Whether a new session may be started from this state
    pub fn accepts_start(&self) -> bool {
        self.can_transition_to(&SessionState::Active)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn is_finalizing(&self) -> bool {
        matches!(self, SessionState::Finalizing)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use SessionState::*;

        assert!(Idle.can_transition_to(&Active));
        assert!(Active.can_transition_to(&Finalizing));
        assert!(Finalizing.can_transition_to(&Closed));
        assert!(Closed.can_transition_to(&Active));
    }

    #[test]
    fn test_invalid_transitions() {
        use SessionState::*;

        assert!(!Active.can_transition_to(&Active)); // double start
        assert!(!Finalizing.can_transition_to(&Active)); // start mid-finalization
        assert!(!Idle.can_transition_to(&Finalizing));
        assert!(!Active.can_transition_to(&Closed)); // must flush first
        assert!(!Closed.can_transition_to(&Finalizing));
    }

    #[test]
    fn test_state_checks() {
        assert!(SessionState::Idle.accepts_start());
        assert!(SessionState::Closed.accepts_start());
        assert!(!SessionState::Active.accepts_start());
        assert!(!SessionState::Finalizing.accepts_start());
        assert!(SessionState::Active.is_active());
        assert!(SessionState::Finalizing.is_finalizing());
    }
}
