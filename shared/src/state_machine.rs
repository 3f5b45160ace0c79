//! Session State Machine
//!
//! Defines the lifecycle of a tracking session:
//! `NonExistent -> Active -> Closed`. `Closed` is terminal; a tracker id is
//! never reused once its session has been closed.

/// Lifecycle phase of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No record exists for the tracker id
    NonExistent,
    /// Record exists and accepts operations
    Active,
    /// Session was stopped or its admin left
    Closed,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Admin created the session
    Created,
    /// Admin re-bound a new connection
    AdminReconnected,
    /// A viewer was admitted
    ViewerJoined,
    /// A viewer left or was disconnected
    ViewerLeft,
    /// Block list or admission flag changed
    AccessChanged,
    /// Location or alarm status changed
    LocationUpdated,
    /// Admin stopped sharing explicitly
    Stopped,
    /// The bound admin connection closed
    AdminDisconnected,
    /// Session had no admin for longer than the orphan TTL
    Expired,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid; carries the new state
    Success(SessionState),
    /// Transition was invalid from current state
    Invalid { from: SessionState, event: SessionEvent },
}

impl TransitionResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// The lifecycle state machine for one session
#[derive(Debug)]
pub struct SessionStateMachine {
    current_state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Create a new state machine for a tracker id that has no record yet
    pub fn new() -> Self {
        Self {
            current_state: SessionState::NonExistent,
        }
    }

    /// Rebuild the state from what the session store currently holds
    pub fn observe(record_exists: bool) -> Self {
        let current_state = if record_exists {
            SessionState::Active
        } else {
            SessionState::NonExistent
        };
        Self { current_state }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        match self.next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn next_state(&self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self.current_state, event) {
            (NonExistent, Created) => Some(Active),

            (Active, AdminReconnected | ViewerJoined | ViewerLeft | AccessChanged | LocationUpdated) => {
                Some(Active)
            }
            (Active, Stopped | AdminDisconnected | Expired) => Some(Closed),

            // Closed is terminal; NonExistent only accepts creation
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = SessionStateMachine::new();
        assert_eq!(fsm.state(), SessionState::NonExistent);
    }

    #[test]
    fn test_normal_session_flow() {
        let mut fsm = SessionStateMachine::new();

        let result = fsm.process_event(SessionEvent::Created);
        assert_eq!(result, TransitionResult::Success(SessionState::Active));

        let result = fsm.process_event(SessionEvent::ViewerJoined);
        assert_eq!(result, TransitionResult::Success(SessionState::Active));

        let result = fsm.process_event(SessionEvent::LocationUpdated);
        assert_eq!(result, TransitionResult::Success(SessionState::Active));

        let result = fsm.process_event(SessionEvent::Stopped);
        assert_eq!(result, TransitionResult::Success(SessionState::Closed));
    }

    #[test]
    fn test_operations_need_existing_session() {
        let mut fsm = SessionStateMachine::observe(false);

        for event in [SessionEvent::AdminReconnected, SessionEvent::ViewerJoined, SessionEvent::Stopped] {
            let result = fsm.process_event(event);
            assert!(matches!(result, TransitionResult::Invalid { from: SessionState::NonExistent, .. }));
        }
        assert_eq!(fsm.state(), SessionState::NonExistent);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut fsm = SessionStateMachine::observe(true);
        assert!(fsm.process_event(SessionEvent::AdminDisconnected).is_valid());

        assert!(!fsm.process_event(SessionEvent::Created).is_valid());
        assert!(!fsm.process_event(SessionEvent::AdminReconnected).is_valid());
        assert_eq!(fsm.state(), SessionState::Closed);
    }

    #[test]
    fn test_cannot_create_twice() {
        let mut fsm = SessionStateMachine::observe(true);
        let result = fsm.process_event(SessionEvent::Created);
        assert_eq!(
            result,
            TransitionResult::Invalid {
                from: SessionState::Active,
                event: SessionEvent::Created
            }
        );
    }
}
